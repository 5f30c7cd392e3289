//! Upload flow: select a layout per sheet, normalize, replace the stored raw
//! records those layouts produced for `(carrier, month)`, then aggregate.

use crate::aggregation::{AggregationEngine, AggregationSummary};
use crate::cell::RawSheet;
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::normalizer::{NormalizeOutcome, NormalizeStats, RowNormalizer};
use crate::records::NormalizedRecord;
use crate::registry::MappingRegistry;
use crate::selector::{MappingSelection, MappingSelector, SelectionConfidence};
use crate::store::{AgentDirectory, RecordStore};
use crate::utils::PeriodMonth;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Rejects a second upload of the same `(carrier_id, month)` while one is in
/// flight. Different keys never block each other.
#[derive(Debug, Default)]
pub struct UploadGate {
    in_flight: Mutex<HashSet<(i64, PeriodMonth)>>,
}

impl UploadGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn keys(&self) -> MutexGuard<'_, HashSet<(i64, PeriodMonth)>> {
        // the set stays consistent even if a holder panicked
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn acquire(&self, carrier_id: i64, month: PeriodMonth) -> Result<UploadGuard<'_>> {
        if !self.keys().insert((carrier_id, month)) {
            return Err(IngestError::UploadInProgress {
                carrier_id,
                month: month.to_string(),
            });
        }
        debug!("Upload gate acquired for carrier {} month {}", carrier_id, month);
        Ok(UploadGuard {
            gate: self,
            key: (carrier_id, month),
        })
    }

    pub fn is_busy(&self, carrier_id: i64, month: PeriodMonth) -> bool {
        self.keys().contains(&(carrier_id, month))
    }
}

/// Releases its key when dropped.
#[derive(Debug)]
pub struct UploadGuard<'a> {
    gate: &'a UploadGate,
    key: (i64, PeriodMonth),
}

impl Drop for UploadGuard<'_> {
    fn drop(&mut self) {
        self.gate.keys().remove(&self.key);
    }
}

/// One sheet normalized with its selected layout.
#[derive(Debug, Clone)]
pub struct SheetNormalization<'a> {
    pub selection: MappingSelection<'a>,
    pub outcome: NormalizeOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SheetReport {
    pub sheet_name: String,
    pub descriptor_id: Option<String>,
    pub confidence: Option<SelectionConfidence>,
    pub records: usize,
    pub errors: Vec<String>,
    pub stats: NormalizeStats,
    /// Set when the sheet could not be processed at all.
    pub failure: Option<String>,
}

impl SheetReport {
    fn failed(sheet_name: &str, reason: String) -> Self {
        Self {
            sheet_name: sheet_name.to_string(),
            descriptor_id: None,
            confidence: None,
            records: 0,
            errors: Vec::new(),
            stats: NormalizeStats::default(),
            failure: Some(reason),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub carrier_id: i64,
    pub period_month: PeriodMonth,
    pub sheets: Vec<SheetReport>,
    pub records_deleted: usize,
    pub records_inserted: usize,
    /// No sheet produced a record; a placeholder row marks the upload.
    pub placeholder_written: bool,
    pub aggregation: AggregationSummary,
}

impl UploadReport {
    pub fn total_errors(&self) -> usize {
        self.sheets.iter().map(|s| s.errors.len()).sum()
    }
}

/// Drives uploads against one store.
///
/// Uploads are serialized per `(carrier, month)` through the processor's
/// [`UploadGate`]. Processors built over the same store must share one gate
/// via [`UploadProcessor::with_gate`]; separate gates do not see each other.
pub struct UploadProcessor<'a, S: ?Sized> {
    store: &'a S,
    registry: &'a MappingRegistry,
    config: &'a IngestConfig,
    gate: Arc<UploadGate>,
}

impl<'a, S> UploadProcessor<'a, S>
where
    S: RecordStore + AgentDirectory + ?Sized,
{
    pub fn new(store: &'a S, registry: &'a MappingRegistry, config: &'a IngestConfig) -> Self {
        Self {
            store,
            registry,
            config,
            gate: Arc::new(UploadGate::new()),
        }
    }

    /// Uses `gate` instead of a private one.
    pub fn with_gate(mut self, gate: Arc<UploadGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn gate(&self) -> &UploadGate {
        &self.gate
    }

    /// Selects the layout of one sheet and normalizes it. Touches no storage.
    pub fn normalize(
        &self,
        carrier_name: &str,
        sheet: &RawSheet,
        month: PeriodMonth,
        hint: Option<&str>,
    ) -> Result<SheetNormalization<'a>> {
        let selection =
            MappingSelector::new(self.registry, self.config).select_for_sheet(carrier_name, sheet, hint)?;
        let outcome =
            RowNormalizer::new(selection.descriptor).normalize(sheet, selection.carrier.id, month)?;
        Ok(SheetNormalization { selection, outcome })
    }

    /// Recomputes the aggregation rows of `(carrier_id, month)`.
    pub fn aggregate(&self, carrier_id: i64, month: PeriodMonth) -> Result<AggregationSummary> {
        AggregationEngine::new(self.store, self.registry, self.config).aggregate(carrier_id, month)
    }

    /// Full upload of one workbook.
    ///
    /// A sheet whose layout cannot be applied is reported and skipped; the
    /// remaining sheets are still stored. Records of the month that came from
    /// the layouts in this upload are replaced, never appended to, so
    /// re-uploading a file is safe. Records of other layouts stay.
    pub fn process_upload(
        &self,
        carrier_name: &str,
        sheets: &[RawSheet],
        month: PeriodMonth,
        hint: Option<&str>,
    ) -> Result<UploadReport> {
        let carrier = self.registry.carrier(carrier_name)?;
        let _guard = self.gate.acquire(carrier.id, month)?;

        info!(
            "Processing upload for {} ({} sheets), month {}",
            carrier.name,
            sheets.len(),
            month
        );

        let mut reports = Vec::with_capacity(sheets.len());
        let mut records: Vec<NormalizedRecord> = Vec::new();
        let mut layouts: BTreeSet<String> = BTreeSet::new();

        for sheet in sheets {
            if sheet.rows.iter().all(|row| row.iter().all(|cell| cell.is_blank())) {
                debug!("Sheet '{}' is empty, skipping", sheet.name);
                continue;
            }

            match self.normalize(carrier_name, sheet, month, hint) {
                Ok(SheetNormalization { selection, outcome }) => {
                    reports.push(SheetReport {
                        sheet_name: sheet.name.clone(),
                        descriptor_id: Some(selection.descriptor.id.clone()),
                        confidence: Some(selection.confidence),
                        records: outcome.records.len(),
                        errors: outcome.errors,
                        stats: outcome.stats,
                        failure: None,
                    });
                    layouts.insert(selection.descriptor.id.clone());
                    records.extend(outcome.records);
                }
                Err(e @ IngestError::Configuration { .. }) => {
                    warn!("Sheet '{}' skipped: {}", sheet.name, e);
                    reports.push(SheetReport::failed(&sheet.name, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        // placeholders (no layout) never outlive the next upload
        let mut records_deleted = self.store.delete_records(carrier.id, month, None)?;
        for layout in &layouts {
            let deleted = self.store.delete_records(carrier.id, month, Some(layout))?;
            if deleted > 0 {
                info!(
                    "Replaced {} stored '{}' records of carrier {} month {}",
                    deleted, layout, carrier.id, month
                );
            }
            records_deleted += deleted;
        }

        let placeholder_written = records.is_empty();
        if placeholder_written {
            warn!(
                "Upload for {} month {} produced no records; writing placeholder row",
                carrier.name, month
            );
            records.push(self.placeholder(carrier.id, month));
        }

        let mut records_inserted = 0;
        for batch in records.chunks(self.config.batch_size.max(1)) {
            records_inserted += self.store.insert_records(batch)?;
        }

        let aggregation = self.aggregate(carrier.id, month)?;

        Ok(UploadReport {
            carrier_id: carrier.id,
            period_month: month,
            sheets: reports,
            records_deleted,
            records_inserted,
            placeholder_written,
            aggregation,
        })
    }

    fn placeholder(&self, carrier_id: i64, month: PeriodMonth) -> NormalizedRecord {
        NormalizedRecord {
            carrier_id,
            period_month: month,
            agent_number: None,
            agent_name: Some(self.config.placeholder_agent_name.clone()),
            current_amount: None,
            previous_amount: None,
            change_pct: None,
            category: None,
            source_row: 0,
            layout_id: None,
            extras: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{AggregationProfile, AggregationRule};
    use crate::cell::CellValue;
    use crate::records::Agent;
    use crate::registry::CarrierMapping;
    use crate::schema::{Addressing, Category, ColumnSelector, FieldMap, MappingDescriptor, ParseMode};
    use crate::store::MemoryStore;

    const CARRIER: i64 = 7;

    fn month() -> PeriodMonth {
        PeriodMonth::parse("2025-04").unwrap()
    }

    fn registry() -> MappingRegistry {
        let mut monthly = MappingDescriptor::new(
            "monthly",
            Addressing::Mixed,
            ParseMode::Standard,
            1,
            2,
            FieldMap {
                agent_number: Some(ColumnSelector::index(0)),
                current_amount: Some(ColumnSelector::PeriodMonth { year_offset: 0 }),
                ..Default::default()
            },
        );
        monthly.sheet_name = Some("monthly".to_string());

        let mut standard = MappingDescriptor::new(
            "standard",
            Addressing::ByName,
            ParseMode::Standard,
            1,
            2,
            FieldMap {
                agent_number: Some(ColumnSelector::name("מספר סוכן")),
                current_amount: Some(ColumnSelector::name("תפוקה")),
                ..Default::default()
            },
        );
        standard.signature_columns = vec!["מספר סוכן".to_string(), "תפוקה".to_string()];

        let carrier = CarrierMapping::new(
            CARRIER,
            "Clal",
            "כלל",
            AggregationProfile::new(AggregationRule::Simple {
                amount_field: "current_amount".to_string(),
                category: Category::Risk,
            }),
        )
        .with_descriptor(standard)
        .with_descriptor(monthly);
        MappingRegistry::new(vec![carrier]).unwrap()
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .add_agent(Agent::new(1, "דני").with_numbers(CARRIER, "111"))
            .unwrap();
        store
    }

    fn standard_sheet(amount: f64) -> RawSheet {
        RawSheet::new(
            "Sheet1",
            vec![
                vec![CellValue::from("מספר סוכן"), CellValue::from("תפוקה")],
                vec![CellValue::Number(111.0), CellValue::Number(amount)],
            ],
        )
    }

    #[test]
    fn test_gate_rejects_same_key_until_released() {
        let gate = UploadGate::new();
        let guard = gate.acquire(CARRIER, month()).unwrap();
        assert!(gate.is_busy(CARRIER, month()));

        let err = gate.acquire(CARRIER, month()).unwrap_err();
        assert!(matches!(err, IngestError::UploadInProgress { carrier_id: 7, .. }));
        assert!(gate.acquire(CARRIER, month().previous()).is_ok());

        drop(guard);
        assert!(!gate.is_busy(CARRIER, month()));
        assert!(gate.acquire(CARRIER, month()).is_ok());
    }

    #[test]
    fn test_upload_rejected_while_in_flight() {
        let store = store();
        let registry = registry();
        let config = IngestConfig::default();
        let processor = UploadProcessor::new(&store, &registry, &config);

        let _held = processor.gate().acquire(CARRIER, month()).unwrap();
        let err = processor
            .process_upload("Clal", &[standard_sheet(10.0)], month(), None)
            .unwrap_err();
        assert!(matches!(err, IngestError::UploadInProgress { .. }));
        assert!(store.records().unwrap().is_empty());
    }

    #[test]
    fn test_reupload_replaces_raw_records() {
        let store = store();
        let registry = registry();
        let config = IngestConfig::default();
        let processor = UploadProcessor::new(&store, &registry, &config);

        processor
            .process_upload("Clal", &[standard_sheet(10.0)], month(), None)
            .unwrap();
        let report = processor
            .process_upload("Clal", &[standard_sheet(25.0)], month(), None)
            .unwrap();

        assert_eq!(report.records_deleted, 1);
        assert_eq!(report.records_inserted, 1);
        assert_eq!(store.records().unwrap().len(), 1);
        let row = store.aggregation(1, CARRIER, month()).unwrap().unwrap();
        assert_eq!(row.totals.as_categories().unwrap().risk, 25.0);
    }

    #[test]
    fn test_upload_keeps_records_of_other_layouts() {
        let store = store();
        let registry = registry();
        let config = IngestConfig::default();
        let processor = UploadProcessor::new(&store, &registry, &config);

        processor
            .process_upload("Clal", &[standard_sheet(10.0)], month(), None)
            .unwrap();
        let monthly = RawSheet::new(
            "monthly",
            vec![
                vec![CellValue::from("סוכן"), CellValue::from("אפריל 2025")],
                vec![CellValue::Number(111.0), CellValue::Number(5.0)],
            ],
        );
        let report = processor
            .process_upload("Clal", &[monthly.clone()], month(), None)
            .unwrap();
        assert_eq!(report.records_deleted, 0);
        assert_eq!(store.records().unwrap().len(), 2);

        processor
            .process_upload("Clal", &[monthly], month(), None)
            .unwrap();
        assert_eq!(store.records().unwrap().len(), 2);
        let row = store.aggregation(1, CARRIER, month()).unwrap().unwrap();
        assert_eq!(row.totals.as_categories().unwrap().risk, 15.0);
    }

    #[test]
    fn test_data_upload_clears_placeholder() {
        let store = store();
        let registry = registry();
        let config = IngestConfig::default();
        let processor = UploadProcessor::new(&store, &registry, &config);

        let header_only = RawSheet::new(
            "Sheet1",
            vec![vec![CellValue::from("מספר סוכן"), CellValue::from("תפוקה")]],
        );
        processor
            .process_upload("Clal", &[header_only], month(), None)
            .unwrap();
        processor
            .process_upload("Clal", &[standard_sheet(10.0)], month(), None)
            .unwrap();

        let stored = store.records().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].layout_id.as_deref(), Some("standard"));
    }

    #[test]
    fn test_processors_sharing_a_gate_serialize_uploads() {
        let store = store();
        let registry = registry();
        let config = IngestConfig::default();
        let gate = Arc::new(UploadGate::new());
        let first = UploadProcessor::new(&store, &registry, &config).with_gate(Arc::clone(&gate));
        let second = UploadProcessor::new(&store, &registry, &config).with_gate(Arc::clone(&gate));

        let _held = first.gate().acquire(CARRIER, month()).unwrap();
        let err = second
            .process_upload("Clal", &[standard_sheet(10.0)], month(), None)
            .unwrap_err();
        assert!(matches!(err, IngestError::UploadInProgress { .. }));
    }

    #[test]
    fn test_configuration_error_skips_only_that_sheet() {
        let store = store();
        let registry = registry();
        let config = IngestConfig::default();
        let processor = UploadProcessor::new(&store, &registry, &config);

        let broken = RawSheet::new(
            "monthly",
            vec![
                vec![CellValue::from("סוכן"), CellValue::from("מרץ 2025")],
                vec![CellValue::Number(111.0), CellValue::Number(5.0)],
            ],
        );
        let report = processor
            .process_upload("Clal", &[broken, standard_sheet(40.0)], month(), None)
            .unwrap();

        assert_eq!(report.sheets.len(), 2);
        assert!(report.sheets[0].failure.as_deref().unwrap().contains("אפריל 2025"));
        assert_eq!(report.sheets[1].records, 1);
        assert_eq!(report.sheets[1].confidence, Some(SelectionConfidence::Exact));
        assert_eq!(report.records_inserted, 1);
    }

    #[test]
    fn test_empty_upload_writes_placeholder_not_aggregated() {
        let store = store();
        let registry = registry();
        let config = IngestConfig::default();
        let processor = UploadProcessor::new(&store, &registry, &config);

        let header_only = RawSheet::new(
            "Sheet1",
            vec![vec![CellValue::from("מספר סוכן"), CellValue::from("תפוקה")]],
        );
        let report = processor
            .process_upload("Clal", &[header_only], month(), None)
            .unwrap();

        assert!(report.placeholder_written);
        assert_eq!(report.aggregation.raw_rows_considered, 0);
        let stored = store.records().unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].is_placeholder(&config.placeholder_agent_name));
    }

    #[test]
    fn test_unknown_carrier() {
        let store = store();
        let registry = registry();
        let config = IngestConfig::default();
        let processor = UploadProcessor::new(&store, &registry, &config);
        let err = processor
            .process_upload("Nobody", &[standard_sheet(1.0)], month(), None)
            .unwrap_err();
        assert!(matches!(err, IngestError::UnknownCarrier(_)));
    }
}
