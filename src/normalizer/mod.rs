//! Raw sheet rows → [`NormalizedRecord`]s.
//!
//! One entry point, four scanning loops selected by the descriptor's parse
//! mode. A bad row never aborts the sheet: it is recorded as `"Row N: ..."`
//! and the scan continues.

mod context;
mod grouped;
mod policy;
mod standard;
pub mod state;
mod three_row;

pub use context::AgentIdentity;

use crate::cell::{RawSheet, RowRef, SheetView};
use crate::error::{Result, RowParseError};
use crate::records::NormalizedRecord;
use crate::schema::{MappingDescriptor, ParseMode};
use crate::utils::PeriodMonth;
use context::SheetContext;
use log::{debug, info, warn};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeStats {
    /// Rows in the sheet, header and preamble included.
    pub total_rows: usize,
    /// Non-empty rows examined from the data start row on.
    pub rows_scanned: usize,
    pub rows_skipped: usize,
    pub records: usize,
    pub errors: usize,
    /// Row that ended the scan early, if a stop rule fired.
    pub stopped_at_row: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NormalizeOutcome {
    pub records: Vec<NormalizedRecord>,
    pub errors: Vec<String>,
    pub stats: NormalizeStats,
    /// At least one record was produced.
    pub success: bool,
}

/// Accumulates a scan's results.
#[derive(Debug, Default)]
pub(crate) struct Collector {
    records: Vec<NormalizedRecord>,
    errors: Vec<String>,
    stats: NormalizeStats,
}

impl Collector {
    fn scanned(&mut self) {
        self.stats.rows_scanned += 1;
    }

    fn skip(&mut self, row: &RowRef, reason: &str) {
        debug!("Row {}: skipped ({})", row.number, reason);
        self.stats.rows_skipped += 1;
    }

    fn stop(&mut self, row: &RowRef) {
        debug!("Row {}: stop rule reached, ending scan", row.number);
        self.stats.stopped_at_row = Some(row.number);
    }

    fn push(&mut self, record: NormalizedRecord) {
        self.records.push(record);
    }

    fn error(&mut self, error: RowParseError) {
        warn!("{}", error);
        self.errors.push(error.to_string());
    }

    fn finish(mut self, total_rows: usize) -> NormalizeOutcome {
        self.stats.total_rows = total_rows;
        self.stats.records = self.records.len();
        self.stats.errors = self.errors.len();
        let success = !self.records.is_empty();
        NormalizeOutcome {
            records: self.records,
            errors: self.errors,
            stats: self.stats,
            success,
        }
    }
}

/// Why a STANDARD or POLICY_LEVEL row is passed over, if it is.
fn skip_reason(ctx: &SheetContext, row: &RowRef) -> Option<&'static str> {
    if ctx.is_skip_row(row) {
        Some("skip rule")
    } else if ctx.fails_numeric_sanity(row) {
        Some("non-numeric amount cell")
    } else if !ctx.in_upload_month(row) {
        Some("other month")
    } else if ctx.is_zero_amount_row(row) {
        Some("zero amount")
    } else if ctx.is_unclassified(row) {
        Some("unclassified product")
    } else {
        None
    }
}

pub struct RowNormalizer<'a> {
    descriptor: &'a MappingDescriptor,
}

impl<'a> RowNormalizer<'a> {
    pub fn new(descriptor: &'a MappingDescriptor) -> Self {
        Self { descriptor }
    }

    /// Normalizes one decoded sheet. Fails only when the layout cannot be
    /// applied to the sheet at all: an invalid descriptor, or a MIXED layout
    /// missing its current-period column.
    pub fn normalize(
        &self,
        sheet: &RawSheet,
        carrier_id: i64,
        period_month: PeriodMonth,
    ) -> Result<NormalizeOutcome> {
        let descriptor = self.descriptor;
        descriptor.validate()?;
        let view = SheetView::new(sheet, descriptor.header_row_index);
        let ctx = SheetContext::new(descriptor, view.headers(), carrier_id, period_month)?;

        info!(
            "Normalizing sheet '{}' with layout {} ({:?}), {} rows",
            view.name(),
            descriptor.qualified_id(),
            descriptor.parse_mode,
            view.row_count()
        );

        let mut collector = Collector::default();
        let rows = view.rows_from(descriptor.data_start_row_index);
        match descriptor.parse_mode {
            ParseMode::Standard => standard::scan(&ctx, rows, &mut collector),
            ParseMode::AgentGrouped => grouped::scan(&ctx, rows, &mut collector),
            ParseMode::ThreeRowGroup => three_row::scan(&ctx, rows, &mut collector),
            ParseMode::PolicyLevel => policy::scan(&ctx, rows, &mut collector),
        }

        let outcome = collector.finish(view.row_count());
        info!(
            "Sheet '{}': {} records, {} skipped, {} errors",
            view.name(),
            outcome.stats.records,
            outcome.stats.rows_skipped,
            outcome.stats.errors
        );
        Ok(outcome)
    }
}

/// Normalizes `sheet` with `descriptor`.
pub fn normalize(
    sheet: &RawSheet,
    descriptor: &MappingDescriptor,
    carrier_id: i64,
    period_month: PeriodMonth,
) -> Result<NormalizeOutcome> {
    RowNormalizer::new(descriptor).normalize(sheet, carrier_id, period_month)
}


#[cfg(test)]
mod tests {
    use super::test_support::{n, sheet, t};
    use super::*;
    use crate::cell::CellValue;
    use crate::error::IngestError;
    use crate::schema::{Addressing, ColumnSelector, FieldMap};

    fn month() -> PeriodMonth {
        PeriodMonth::parse("2025-07").unwrap()
    }

    #[test]
    fn test_mixed_layout_missing_current_column_fails() {
        let descriptor = MappingDescriptor::new(
            "monthly",
            Addressing::Mixed,
            ParseMode::AgentGrouped,
            1,
            2,
            FieldMap {
                agent_string: Some(ColumnSelector::index(0)),
                branch: Some(ColumnSelector::index(1)),
                current_amount: Some(ColumnSelector::PeriodMonth { year_offset: 0 }),
                previous_amount: Some(ColumnSelector::PeriodMonth { year_offset: -1 }),
                ..Default::default()
            },
        );
        let data = sheet(&["סוכן", "ענף", "יוני 2025"], vec![vec![t("1 - A"), t("רכב"), n(5.0)]]);

        let err = normalize(&data, &descriptor, 113, month()).unwrap_err();
        assert!(matches!(err, IngestError::Configuration { .. }));
        assert!(err.to_string().contains("יולי 2025"));
    }

    #[test]
    fn test_mixed_layout_missing_previous_column_only_warns() {
        let descriptor = MappingDescriptor::new(
            "monthly",
            Addressing::Mixed,
            ParseMode::AgentGrouped,
            1,
            2,
            FieldMap {
                agent_string: Some(ColumnSelector::index(0)),
                branch: Some(ColumnSelector::index(1)),
                current_amount: Some(ColumnSelector::PeriodMonth { year_offset: 0 }),
                previous_amount: Some(ColumnSelector::PeriodMonth { year_offset: -1 }),
                ..Default::default()
            },
        );
        let data = sheet(
            &["סוכן", "ענף", "יולי 2025"],
            vec![vec![t("1 - A"), t("רכב"), n(5.0)]],
        );

        let outcome = normalize(&data, &descriptor, 113, month()).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.records[0].current_amount, Some(5.0));
        assert_eq!(outcome.records[0].previous_amount, None);
    }

    #[test]
    fn test_empty_sheet_is_not_success() {
        let descriptor = MappingDescriptor::new(
            "main",
            Addressing::ByName,
            ParseMode::Standard,
            1,
            2,
            FieldMap {
                agent_number: Some(ColumnSelector::name("מספר סוכן")),
                current_amount: Some(ColumnSelector::name("סכום")),
                ..Default::default()
            },
        );
        let data = sheet(&["מספר סוכן", "סכום"], vec![vec![CellValue::Empty, CellValue::Empty]]);

        let outcome = normalize(&data, &descriptor, 1, month()).unwrap();
        assert!(!outcome.success);
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.stats.total_rows, 2);
        assert_eq!(outcome.stats.rows_scanned, 0);
    }

    #[test]
    fn test_invalid_descriptor_is_rejected_before_scanning() {
        let no_amount = MappingDescriptor::new(
            "main",
            Addressing::ByName,
            ParseMode::Standard,
            1,
            2,
            FieldMap {
                agent_number: Some(ColumnSelector::name("מספר סוכן")),
                ..Default::default()
            },
        );
        let data = sheet(&["מספר סוכן", "סכום"], vec![vec![n(111.0), n(5.0)]]);
        let err = normalize(&data, &no_amount, 1, month()).unwrap_err();
        assert!(matches!(err, IngestError::Configuration { .. }));

        let data_before_header = MappingDescriptor::new(
            "main",
            Addressing::ByName,
            ParseMode::Standard,
            2,
            2,
            FieldMap {
                agent_number: Some(ColumnSelector::name("מספר סוכן")),
                current_amount: Some(ColumnSelector::name("סכום")),
                ..Default::default()
            },
        );
        let err = RowNormalizer::new(&data_before_header)
            .normalize(&data, 1, month())
            .unwrap_err();
        assert!(err.to_string().contains("data_start_row_index"));
    }

    #[test]
    fn test_records_carry_layout_id() {
        let descriptor = MappingDescriptor::new(
            "financial",
            Addressing::ByName,
            ParseMode::Standard,
            1,
            2,
            FieldMap {
                agent_number: Some(ColumnSelector::name("מספר סוכן")),
                current_amount: Some(ColumnSelector::name("סכום")),
                ..Default::default()
            },
        );
        let data = sheet(&["מספר סוכן", "סכום"], vec![vec![n(111.0), n(5.0)]]);
        let outcome = normalize(&data, &descriptor, 1, month()).unwrap();
        assert_eq!(outcome.records[0].layout_id.as_deref(), Some("financial"));
    }
}
