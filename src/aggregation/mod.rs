//! Per-agent rollup of normalized records.

pub mod cumulative;
pub mod engine;
pub mod rules;

pub use cumulative::subtract_prior_months;
pub use engine::{AggregationEngine, AggregationSummary, UnmappedAgent};
pub use rules::{
    AggregationProfile, AggregationRule, Formula, SheetFormulas, StatusFilter, UmbrellaAdjustment,
};
