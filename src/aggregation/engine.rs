use super::cumulative::subtract_prior_months;
use super::rules::AggregationProfile;
use crate::config::IngestConfig;
use crate::error::{IngestError, Result, StoreError};
use crate::records::{Agent, AggregateTotals, AggregationRecord, NormalizedRecord};
use crate::registry::{CarrierMapping, MappingRegistry};
use crate::store::{fetch_all, AgentDirectory, AgentFilter, RecordQuery, RecordStore};
use crate::utils::PeriodMonth;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of one `aggregate` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSummary {
    /// Aggregation rows written, the unmapped sentinel included.
    pub agents_processed: usize,
    pub raw_rows_considered: usize,
    pub unmapped_row_count: usize,
    /// Unmapped rows existed but the carrier has no sentinel agent.
    pub sentinel_missing: bool,
}

/// Raw rows of one agent number that no registered agent owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmappedAgent {
    pub agent_number: Option<String>,
    pub agent_name: Option<String>,
    pub total_current: f64,
    pub total_previous: f64,
    pub row_count: usize,
    pub products: Vec<String>,
}

/// Rolls persisted records up into per-agent totals.
pub struct AggregationEngine<'a, S: ?Sized> {
    store: &'a S,
    registry: &'a MappingRegistry,
    config: &'a IngestConfig,
}

struct AgentRollup<'a> {
    agent: &'a Agent,
    totals: AggregateTotals,
    had_data: bool,
}

impl<'a, S> AggregationEngine<'a, S>
where
    S: RecordStore + AgentDirectory + ?Sized,
{
    pub fn new(store: &'a S, registry: &'a MappingRegistry, config: &'a IngestConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    fn fetch_error(carrier_id: i64, month: PeriodMonth) -> impl Fn(StoreError) -> IngestError {
        move |source| IngestError::AggregationFetch {
            carrier_id,
            month: month.to_string(),
            source,
        }
    }

    fn known_tokens(agents: &[Agent], carrier_id: i64) -> Vec<String> {
        let tokens: BTreeSet<String> = agents
            .iter()
            .flat_map(|a| a.tokens_for(carrier_id))
            .collect();
        tokens.into_iter().collect()
    }

    fn base_query(&self, carrier_id: i64, month: PeriodMonth) -> RecordQuery {
        RecordQuery::new(carrier_id, month)
            .excluding_agent_name(self.config.placeholder_agent_name.clone())
    }

    /// Recomputes and replaces every aggregation row of `(carrier_id, month)`.
    pub fn aggregate(&self, carrier_id: i64, month: PeriodMonth) -> Result<AggregationSummary> {
        let carrier = self.registry.carrier_by_id(carrier_id)?;
        let profile = &carrier.aggregation;
        let fetch_err = Self::fetch_error(carrier_id, month);

        info!(
            "Starting aggregation for carrier {} ({}), month {}",
            carrier_id, carrier.name, month
        );

        let agents = self.store.agents_for_carrier(carrier_id).map_err(&fetch_err)?;
        let tokens = Self::known_tokens(&agents, carrier_id);
        debug!(
            "Found {} agents with {} agent numbers for carrier {}",
            agents.len(),
            tokens.len(),
            carrier_id
        );

        let known = if tokens.is_empty() {
            Vec::new()
        } else {
            let query = self
                .base_query(carrier_id, month)
                .with_agents(AgentFilter::In(tokens.clone()));
            fetch_all(self.store, &query, self.config.batch_size).map_err(&fetch_err)?
        };
        debug!("Processing {} raw rows of known agents", known.len());

        let (known_ytd, known_monthly): (Vec<_>, Vec<_>) = known
            .iter()
            .partition(|record| Self::is_year_to_date(carrier, record));
        let monthly = Self::agent_rollups(profile, &agents, carrier_id, &known_monthly);
        let ytd = Self::agent_rollups(profile, &agents, carrier_id, &known_ytd);

        let mut written: BTreeMap<(i64, i64, PeriodMonth), AggregationRecord> = BTreeMap::new();
        let mut push = |record: AggregationRecord| {
            written
                .entry(record.key())
                .and_modify(|existing| existing.absorb(&record))
                .or_insert(record);
        };

        for (monthly, ytd) in monthly.into_iter().zip(ytd) {
            if profile.excludes_agent(Some(&monthly.agent.name)) {
                debug!("Skipping excluded agent {}", monthly.agent.name);
                continue;
            }
            push(AggregationRecord::new(
                monthly.agent.id,
                carrier_id,
                month,
                monthly.totals,
            ));
            if ytd.had_data {
                push(Self::year_to_date_row(ytd.agent.id, carrier_id, month, ytd.totals));
            }
        }

        let unmapped_query = self
            .base_query(carrier_id, month)
            .with_agents(AgentFilter::NotIn(tokens));
        let unmapped =
            fetch_all(self.store, &unmapped_query, self.config.batch_size).map_err(&fetch_err)?;

        let mut sentinel_missing = false;
        match self.store.unmapped_sentinel(carrier_id).map_err(&fetch_err)? {
            Some(sentinel) => {
                let mut monthly_totals = profile.empty_totals();
                let mut ytd_totals: Option<AggregateTotals> = None;
                for record in &unmapped {
                    let Some(contribution) = profile.classify(record) else {
                        continue;
                    };
                    if Self::is_year_to_date(carrier, record) {
                        ytd_totals
                            .get_or_insert_with(|| profile.empty_totals())
                            .merge(&contribution);
                    } else {
                        monthly_totals.merge(&contribution);
                    }
                }
                if !unmapped.is_empty() {
                    info!(
                        "Bucketing {} unmapped rows under sentinel agent {} for carrier {}",
                        unmapped.len(),
                        sentinel.id,
                        carrier_id
                    );
                }
                push(AggregationRecord::new(sentinel.id, carrier_id, month, monthly_totals));
                if let Some(totals) = ytd_totals {
                    push(Self::year_to_date_row(sentinel.id, carrier_id, month, totals));
                }
            }
            None if !unmapped.is_empty() => {
                warn!(
                    "Carrier {} has {} unmapped rows for {} but no unmapped sentinel agent; dropping them",
                    carrier_id,
                    unmapped.len(),
                    month
                );
                sentinel_missing = true;
            }
            None => {}
        }

        let mut rows: Vec<AggregationRecord> = written.into_values().collect();
        subtract_prior_months(
            self.store,
            carrier_id,
            month,
            &mut rows,
            self.config.strict_cumulative,
        )?;

        if !rows.is_empty() {
            self.store.upsert_aggregations(&rows)?;
            info!(
                "Successfully aggregated {} agent records for carrier {} month {}",
                rows.len(),
                carrier_id,
                month
            );
        }

        Ok(AggregationSummary {
            agents_processed: rows.len(),
            raw_rows_considered: known.len() + unmapped.len(),
            unmapped_row_count: unmapped.len(),
            sentinel_missing,
        })
    }

    /// Unknown agent numbers of `(carrier_id, month)` with their row totals.
    pub fn unmapped_summary(&self, carrier_id: i64, month: PeriodMonth) -> Result<Vec<UnmappedAgent>> {
        let fetch_err = Self::fetch_error(carrier_id, month);
        let agents = self.store.agents_for_carrier(carrier_id).map_err(&fetch_err)?;
        let query = self
            .base_query(carrier_id, month)
            .with_agents(AgentFilter::NotIn(Self::known_tokens(&agents, carrier_id)));
        let rows = fetch_all(self.store, &query, self.config.batch_size).map_err(&fetch_err)?;

        let mut summary: Vec<UnmappedAgent> = Vec::new();
        for row in &rows {
            let idx = match summary
                .iter()
                .position(|s| s.agent_number == row.agent_number)
            {
                Some(idx) => idx,
                None => {
                    summary.push(UnmappedAgent {
                        agent_number: row.agent_number.clone(),
                        agent_name: row.agent_name.clone(),
                        total_current: 0.0,
                        total_previous: 0.0,
                        row_count: 0,
                        products: Vec::new(),
                    });
                    summary.len() - 1
                }
            };
            let entry = &mut summary[idx];
            entry.total_current += row.current_amount.unwrap_or(0.0);
            entry.total_previous += row.previous_amount.unwrap_or(0.0);
            entry.row_count += 1;
            if let Some(product) = row.text("product").filter(|p| !p.is_empty()) {
                if !entry.products.contains(&product) {
                    entry.products.push(product);
                }
            }
        }

        Ok(summary)
    }

    /// Whether a record carries year-to-date figures. Records of an unknown
    /// layout follow the carrier profile.
    fn is_year_to_date(carrier: &CarrierMapping, record: &NormalizedRecord) -> bool {
        match record.layout_id.as_deref().and_then(|id| carrier.descriptor(id)) {
            Some(descriptor) => descriptor.cumulative,
            None => carrier.aggregation.cumulative,
        }
    }

    fn year_to_date_row(
        agent_id: i64,
        carrier_id: i64,
        month: PeriodMonth,
        totals: AggregateTotals,
    ) -> AggregationRecord {
        let mut row = AggregationRecord::new(agent_id, carrier_id, month, totals);
        row.cumulative_share = Some(totals);
        row
    }

    fn agent_rollups<'b>(
        profile: &AggregationProfile,
        agents: &'b [Agent],
        carrier_id: i64,
        records: &[&NormalizedRecord],
    ) -> Vec<AgentRollup<'b>> {
        let per_token = Self::sum_per_token(profile, records);
        let mut rollups = Self::roll_up(profile, agents, carrier_id, &per_token);
        Self::apply_umbrella(profile, &mut rollups);
        rollups
    }

    fn sum_per_token(
        profile: &AggregationProfile,
        records: &[&NormalizedRecord],
    ) -> BTreeMap<String, AggregateTotals> {
        let mut per_token: BTreeMap<String, AggregateTotals> = BTreeMap::new();
        for record in records {
            let Some(token) = record.agent_number.as_ref() else {
                continue;
            };
            if let Some(contribution) = profile.classify(record) {
                per_token
                    .entry(token.clone())
                    .or_insert_with(|| profile.empty_totals())
                    .merge(&contribution);
            }
        }
        per_token
    }

    fn roll_up<'b>(
        profile: &AggregationProfile,
        agents: &'b [Agent],
        carrier_id: i64,
        per_token: &BTreeMap<String, AggregateTotals>,
    ) -> Vec<AgentRollup<'b>> {
        agents
            .iter()
            .map(|agent| {
                let mut totals = profile.empty_totals();
                let mut had_data = false;
                for token in agent.tokens_for(carrier_id) {
                    if let Some(token_totals) = per_token.get(&token) {
                        totals.merge(token_totals);
                        had_data = true;
                    }
                }
                AgentRollup {
                    agent,
                    totals,
                    had_data,
                }
            })
            .collect()
    }

    fn apply_umbrella(profile: &AggregationProfile, rollups: &mut [AgentRollup<'_>]) {
        let Some(umbrella) = &profile.umbrella else {
            return;
        };
        let Some(target) = rollups
            .iter()
            .position(|r| r.agent.name.contains(umbrella.umbrella_name_contains.as_str()))
        else {
            debug!(
                "Umbrella agent '{}' not registered; no adjustment",
                umbrella.umbrella_name_contains
            );
            return;
        };

        let mut deduction = profile.empty_totals();
        for (idx, rollup) in rollups.iter().enumerate() {
            let named = umbrella
                .subtract_agents
                .iter()
                .any(|name| rollup.agent.name.contains(name.as_str()));
            if idx != target && named && rollup.had_data {
                deduction.merge(&rollup.totals);
            }
        }

        let umbrella_rollup = &mut rollups[target];
        if umbrella_rollup.had_data {
            umbrella_rollup.totals.subtract(&deduction);
        }
    }
}
