//! Persistence seams.
//!
//! The engine only talks to storage through [`RecordStore`] and
//! [`AgentDirectory`]. Raw records are written by the upload flow and read back
//! page by page during aggregation; aggregation rows are upserted by key.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use crate::error::StoreResult;
use crate::records::{Agent, AggregationRecord, NormalizedRecord};
use crate::utils::PeriodMonth;
use log::debug;

/// Agent-number filter of a record query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentFilter {
    Any,
    In(Vec<String>),
    /// Also admits records without an agent number.
    NotIn(Vec<String>),
}

impl AgentFilter {
    pub fn admits(&self, agent_number: Option<&str>) -> bool {
        match self {
            Self::Any => true,
            Self::In(tokens) => agent_number.is_some_and(|n| tokens.iter().any(|t| t == n)),
            Self::NotIn(tokens) => agent_number.map_or(true, |n| !tokens.iter().any(|t| t == n)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    pub carrier_id: i64,
    pub period_month: PeriodMonth,
    pub agents: AgentFilter,
    /// Records whose agent name equals this are left out.
    pub exclude_agent_name: Option<String>,
}

impl RecordQuery {
    pub fn new(carrier_id: i64, period_month: PeriodMonth) -> Self {
        Self {
            carrier_id,
            period_month,
            agents: AgentFilter::Any,
            exclude_agent_name: None,
        }
    }

    pub fn with_agents(mut self, agents: AgentFilter) -> Self {
        self.agents = agents;
        self
    }

    pub fn excluding_agent_name(mut self, name: impl Into<String>) -> Self {
        self.exclude_agent_name = Some(name.into());
        self
    }

    pub fn matches(&self, record: &NormalizedRecord) -> bool {
        record.carrier_id == self.carrier_id
            && record.period_month == self.period_month
            && self.agents.admits(record.agent_number.as_deref())
            && self
                .exclude_agent_name
                .as_deref()
                .map_or(true, |name| !record.is_placeholder(name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

/// Aggregation rows of one carrier within an inclusive month range.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationQuery {
    pub carrier_id: i64,
    pub agent_ids: Option<Vec<i64>>,
    pub from: PeriodMonth,
    pub to: PeriodMonth,
}

impl AggregationQuery {
    pub fn matches(&self, row: &AggregationRecord) -> bool {
        row.carrier_id == self.carrier_id
            && row.period_month >= self.from
            && row.period_month <= self.to
            && self
                .agent_ids
                .as_ref()
                .map_or(true, |ids| ids.contains(&row.agent_id))
    }
}

/// Raw-record and aggregation tables.
pub trait RecordStore {
    fn insert_records(&self, records: &[NormalizedRecord]) -> StoreResult<usize>;

    /// Removes the raw records of `(carrier_id, period_month)` produced by
    /// `layout_id`. `None` matches records without a layout (placeholders).
    fn delete_records(
        &self,
        carrier_id: i64,
        period_month: PeriodMonth,
        layout_id: Option<&str>,
    ) -> StoreResult<usize>;

    /// One page of matching records, in insertion order.
    fn fetch_records(&self, query: &RecordQuery, page: Page) -> StoreResult<Vec<NormalizedRecord>>;

    /// Replace-on-conflict keyed by `(agent_id, carrier_id, period_month)`.
    fn upsert_aggregations(&self, rows: &[AggregationRecord]) -> StoreResult<usize>;

    fn fetch_aggregations(&self, query: &AggregationQuery) -> StoreResult<Vec<AggregationRecord>>;
}

/// Read-only view of the agent registry.
pub trait AgentDirectory {
    /// Agents holding at least one agent number at `carrier_id`. Sentinels excluded.
    fn agents_for_carrier(&self, carrier_id: i64) -> StoreResult<Vec<Agent>>;

    /// The pseudo-agent absorbing unknown agent numbers at `carrier_id`.
    fn unmapped_sentinel(&self, carrier_id: i64) -> StoreResult<Option<Agent>>;
}

/// Reads every matching record, `batch_size` rows per call.
pub fn fetch_all<S: RecordStore + ?Sized>(
    store: &S,
    query: &RecordQuery,
    batch_size: usize,
) -> StoreResult<Vec<NormalizedRecord>> {
    let limit = batch_size.max(1);
    let mut all = Vec::new();
    let mut offset = 0;

    loop {
        let batch = store.fetch_records(query, Page { offset, limit })?;
        let fetched = batch.len();
        all.extend(batch);
        debug!(
            "Fetched batch: {} rows (total so far: {})",
            fetched,
            all.len()
        );
        if fetched < limit {
            break;
        }
        offset += limit;
    }

    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(agent: Option<&str>, name: &str) -> NormalizedRecord {
        NormalizedRecord {
            carrier_id: 4,
            period_month: PeriodMonth::parse("2025-02").unwrap(),
            agent_number: agent.map(str::to_string),
            agent_name: Some(name.to_string()),
            current_amount: Some(1.0),
            previous_amount: None,
            change_pct: None,
            category: None,
            source_row: 2,
            layout_id: Some("main".to_string()),
            extras: Default::default(),
        }
    }

    #[test]
    fn test_agent_filter_semantics() {
        let tokens = vec!["111".to_string()];
        assert!(AgentFilter::In(tokens.clone()).admits(Some("111")));
        assert!(!AgentFilter::In(tokens.clone()).admits(None));
        assert!(AgentFilter::NotIn(tokens.clone()).admits(Some("999")));
        assert!(AgentFilter::NotIn(tokens.clone()).admits(None));
        assert!(!AgentFilter::NotIn(tokens).admits(Some("111")));
    }

    #[test]
    fn test_query_excludes_placeholder_rows() {
        let month = PeriodMonth::parse("2025-02").unwrap();
        let query = RecordQuery::new(4, month).excluding_agent_name("No Data - Empty File");
        assert!(query.matches(&record(Some("1"), "דני")));
        assert!(!query.matches(&record(Some("1"), "No Data - Empty File")));
    }

    #[test]
    fn test_fetch_all_paginates_past_batch_size() {
        let store = MemoryStore::new();
        let rows: Vec<_> = (0..7).map(|i| record(Some(&i.to_string()), "x")).collect();
        store.insert_records(&rows).unwrap();

        let month = PeriodMonth::parse("2025-02").unwrap();
        let all = fetch_all(&store, &RecordQuery::new(4, month), 3).unwrap();
        assert_eq!(all.len(), 7);
        assert_eq!(all[6].agent_number.as_deref(), Some("6"));
    }
}
