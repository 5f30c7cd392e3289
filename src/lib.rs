//! # Carrier Ingest
//!
//! A library for turning insurance carriers' Excel exports into per-agent
//! monthly totals.
//!
//! ## Core Concepts
//!
//! - **Mapping Descriptor**: One physical file layout of one carrier: where the header sits,
//!   which column holds which field, and how rows are classified
//! - **Mapping Registry**: Every carrier's layouts, aliases and aggregation profile, as data
//! - **Selection**: Picks the layout a sheet was exported with from its headers, with a typed
//!   confidence (`EXACT`, `FALLBACK`, `AMBIGUOUS`)
//! - **Normalization**: Raw rows become [`NormalizedRecord`]s under one of four parse modes
//!   (standard, agent-grouped, three-row groups, policy level)
//! - **Aggregation**: Records are summed per agent into category totals (life carriers) or
//!   premium figures (elementary carriers); unknown agent numbers land on the carrier's
//!   unmapped sentinel, and year-to-date feeds are converted to monthly values
//!
//! ## Example
//!
//! ```rust,ignore
//! use carrier_ingest::*;
//!
//! let registry = MappingRegistry::builtin()?;
//! let config = IngestConfig::default();
//! let store = MemoryStore::new();
//! store.add_agent(Agent::new(1, "דני כהן").with_numbers(113, "224350"))?;
//!
//! let month = PeriodMonth::parse("2025-07")?;
//! let sheets: Vec<RawSheet> = decode_workbook("shlomo_july.xlsx");
//!
//! let processor = UploadProcessor::new(&store, &registry, &config);
//! let report = processor.process_upload("Shlomo", &sheets, month, None)?;
//! println!("{} records, {} agents", report.records_inserted, report.aggregation.agents_processed);
//! ```

pub mod aggregation;
pub mod cell;
pub mod config;
pub mod error;
pub mod normalizer;
pub mod orchestrator;
pub mod records;
pub mod registry;
pub mod schema;
pub mod selector;
pub mod store;
pub mod utils;

pub use aggregation::{
    AggregationEngine, AggregationProfile, AggregationRule, AggregationSummary, Formula,
    SheetFormulas, StatusFilter, UmbrellaAdjustment, UnmappedAgent,
};
pub use cell::{CellValue, HeaderIndex, RawSheet, RowRef, SheetView};
pub use config::IngestConfig;
pub use error::{IngestError, Result, RowParseError, StoreError, StoreResult};
pub use normalizer::{normalize, NormalizeOutcome, NormalizeStats, RowNormalizer};
pub use orchestrator::{
    SheetNormalization, SheetReport, UploadGate, UploadGuard, UploadProcessor, UploadReport,
};
pub use records::{
    Agent, AggregateTotals, AggregationRecord, CategoryTotals, NormalizedRecord, PremiumTotals,
    UNMAPPED_TOKEN,
};
pub use registry::{CarrierMapping, MappingRegistry, RegistryConfig, TieBreak};
pub use schema::*;
pub use selector::{MappingSelection, MappingSelector, SelectionConfidence};
pub use store::{AgentDirectory, AgentFilter, MemoryStore, RecordQuery, RecordStore};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
pub use utils::PeriodMonth;

use log::info;

/// Normalizes one sheet of `carrier_name` without touching storage.
pub fn normalize_sheet(
    registry: &MappingRegistry,
    config: &IngestConfig,
    carrier_name: &str,
    sheet: &RawSheet,
    month: PeriodMonth,
    hint: Option<&str>,
) -> Result<NormalizeOutcome> {
    let selection = MappingSelector::new(registry, config).select_for_sheet(carrier_name, sheet, hint)?;
    info!(
        "Normalizing '{}' for {} with layout '{}'",
        sheet.name, selection.carrier.name, selection.descriptor.id
    );
    normalize(sheet, selection.descriptor, selection.carrier.id, month)
}

/// Re-runs aggregation of `(carrier_id, month)` against `store`.
pub fn aggregate<S>(
    store: &S,
    registry: &MappingRegistry,
    config: &IngestConfig,
    carrier_id: i64,
    month: PeriodMonth,
) -> Result<AggregationSummary>
where
    S: RecordStore + AgentDirectory + ?Sized,
{
    AggregationEngine::new(store, registry, config).aggregate(carrier_id, month)
}
