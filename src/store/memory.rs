use super::{AgentDirectory, AggregationQuery, Page, RecordQuery, RecordStore};
use crate::error::{StoreError, StoreResult};
use crate::records::{Agent, AggregationRecord, NormalizedRecord};
use crate::utils::PeriodMonth;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<NormalizedRecord>,
    aggregations: BTreeMap<(i64, i64, PeriodMonth), AggregationRecord>,
    agents: BTreeMap<i64, Agent>,
    sentinels: BTreeMap<i64, i64>,
}

/// In-process store holding raw records, aggregations and the agent registry.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    pub fn add_agent(&self, agent: Agent) -> StoreResult<()> {
        self.lock()?.agents.insert(agent.id, agent);
        Ok(())
    }

    /// Registers `agent` as the unmapped sentinel of `carrier_id`.
    pub fn set_unmapped_sentinel(&self, carrier_id: i64, agent: Agent) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.sentinels.insert(carrier_id, agent.id);
        state.agents.insert(agent.id, agent);
        Ok(())
    }

    pub fn records(&self) -> StoreResult<Vec<NormalizedRecord>> {
        Ok(self.lock()?.records.clone())
    }

    pub fn aggregation(
        &self,
        agent_id: i64,
        carrier_id: i64,
        period_month: PeriodMonth,
    ) -> StoreResult<Option<AggregationRecord>> {
        Ok(self
            .lock()?
            .aggregations
            .get(&(agent_id, carrier_id, period_month))
            .cloned())
    }

    pub fn aggregations(&self) -> StoreResult<Vec<AggregationRecord>> {
        Ok(self.lock()?.aggregations.values().cloned().collect())
    }
}

impl RecordStore for MemoryStore {
    fn insert_records(&self, records: &[NormalizedRecord]) -> StoreResult<usize> {
        self.lock()?.records.extend_from_slice(records);
        Ok(records.len())
    }

    fn delete_records(
        &self,
        carrier_id: i64,
        period_month: PeriodMonth,
        layout_id: Option<&str>,
    ) -> StoreResult<usize> {
        let mut state = self.lock()?;
        let before = state.records.len();
        state.records.retain(|r| {
            !(r.carrier_id == carrier_id
                && r.period_month == period_month
                && r.layout_id.as_deref() == layout_id)
        });
        Ok(before - state.records.len())
    }

    fn fetch_records(&self, query: &RecordQuery, page: Page) -> StoreResult<Vec<NormalizedRecord>> {
        Ok(self
            .lock()?
            .records
            .iter()
            .filter(|r| query.matches(r))
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }

    fn upsert_aggregations(&self, rows: &[AggregationRecord]) -> StoreResult<usize> {
        let mut state = self.lock()?;
        for row in rows {
            state.aggregations.insert(row.key(), row.clone());
        }
        Ok(rows.len())
    }

    fn fetch_aggregations(&self, query: &AggregationQuery) -> StoreResult<Vec<AggregationRecord>> {
        Ok(self
            .lock()?
            .aggregations
            .values()
            .filter(|row| query.matches(row))
            .cloned()
            .collect())
    }
}

impl AgentDirectory for MemoryStore {
    fn agents_for_carrier(&self, carrier_id: i64) -> StoreResult<Vec<Agent>> {
        let state = self.lock()?;
        let sentinel_ids: Vec<i64> = state.sentinels.values().copied().collect();
        Ok(state
            .agents
            .values()
            .filter(|a| !sentinel_ids.contains(&a.id))
            .filter(|a| {
                a.carrier_numbers
                    .get(&carrier_id)
                    .is_some_and(|list| !list.trim().is_empty())
            })
            .cloned()
            .collect())
    }

    fn unmapped_sentinel(&self, carrier_id: i64) -> StoreResult<Option<Agent>> {
        let state = self.lock()?;
        Ok(state
            .sentinels
            .get(&carrier_id)
            .and_then(|id| state.agents.get(id))
            .cloned())
    }
}
