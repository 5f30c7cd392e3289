//! Year-to-date to monthly conversion.
//!
//! Cumulative layouts report running totals since January. A row's
//! `cumulative_share` holds that year-to-date figure; the monthly figure of
//! month M is it minus the shares already stored for months 1..M-1 of the same
//! year. Monthly layouts of the same carrier only live in `totals` and are
//! never subtracted. January is always taken as-is.

use crate::error::{IngestError, Result};
use crate::records::{AggregateTotals, AggregationRecord};
use crate::store::{AggregationQuery, RecordStore};
use crate::utils::PeriodMonth;
use log::{debug, info, warn};
use std::collections::BTreeMap;

/// Replaces the YTD share of every row that has one with its monthly delta,
/// adjusting `totals` by the same amount. Returns the number of rows adjusted.
pub fn subtract_prior_months<S: RecordStore + ?Sized>(
    store: &S,
    carrier_id: i64,
    period_month: PeriodMonth,
    rows: &mut [AggregationRecord],
    strict: bool,
) -> Result<usize> {
    let agent_ids: Vec<i64> = rows
        .iter()
        .filter(|r| r.cumulative_share.is_some())
        .map(|r| r.agent_id)
        .collect();

    if period_month.is_january() || agent_ids.is_empty() {
        debug!(
            "Cumulative carrier {} month {}: no subtraction needed",
            carrier_id, period_month
        );
        return Ok(0);
    }

    let query = AggregationQuery {
        carrier_id,
        agent_ids: Some(agent_ids),
        from: period_month.year_start(),
        to: period_month.previous(),
    };
    let prior = store
        .fetch_aggregations(&query)
        .map_err(|source| IngestError::AggregationFetch {
            carrier_id,
            month: period_month.to_string(),
            source,
        })?;

    let mut prior_by_agent: BTreeMap<i64, AggregateTotals> = BTreeMap::new();
    for (agent_id, share) in prior
        .iter()
        .filter_map(|row| row.cumulative_share.map(|share| (row.agent_id, share)))
    {
        prior_by_agent
            .entry(agent_id)
            .and_modify(|t| t.merge(&share))
            .or_insert(share);
    }

    if prior_by_agent.is_empty() {
        let details = format!(
            "no stored months between {} and {} to subtract from the YTD totals of {}",
            query.from, query.to, period_month
        );
        if strict {
            return Err(IngestError::configuration(
                format!("carrier {}", carrier_id),
                details,
            ));
        }
        warn!(
            "Cumulative carrier {}: {}; keeping YTD figures",
            carrier_id, details
        );
        return Ok(0);
    }

    let mut adjusted = 0;
    for row in rows.iter_mut() {
        let (Some(share), Some(previous)) =
            (row.cumulative_share.as_mut(), prior_by_agent.get(&row.agent_id))
        else {
            continue;
        };
        share.subtract(previous);
        row.totals.subtract(previous);
        adjusted += 1;
    }

    info!(
        "Converted {} cumulative rows to monthly values for carrier {} month {}",
        adjusted, carrier_id, period_month
    );
    Ok(adjusted)
}
