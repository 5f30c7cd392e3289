//! Picks the layout a sheet was exported with.

use crate::cell::{CellValue, RawSheet};
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::registry::{CarrierMapping, MappingRegistry, TieBreak};
use crate::schema::{ColumnSelector, MappingDescriptor};
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionConfidence {
    /// Hint, unique signature match or resolved tie-break.
    Exact,
    /// Nothing matched; the carrier's default layout was used.
    Fallback,
    /// Several layouts matched and no tie-break decided; the first was used.
    Ambiguous,
}

impl fmt::Display for SelectionConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Exact => "EXACT",
            Self::Fallback => "FALLBACK",
            Self::Ambiguous => "AMBIGUOUS",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MappingSelection<'a> {
    pub carrier: &'a CarrierMapping,
    pub descriptor: &'a MappingDescriptor,
    pub confidence: SelectionConfidence,
}

impl<'a> MappingSelection<'a> {
    pub fn is_exact(&self) -> bool {
        self.confidence == SelectionConfidence::Exact
    }
}

pub struct MappingSelector<'a> {
    registry: &'a MappingRegistry,
    config: &'a IngestConfig,
}

impl<'a> MappingSelector<'a> {
    pub fn new(registry: &'a MappingRegistry, config: &'a IngestConfig) -> Self {
        Self { registry, config }
    }

    /// Selects the layout of `carrier_name` that matches `headers`.
    ///
    /// `headers` is every header-like text found at the top of the sheet;
    /// `sample_rows` are the leading raw rows, used only by tie-breaks.
    pub fn select(
        &self,
        carrier_name: &str,
        headers: &[String],
        sample_rows: &[Vec<CellValue>],
        hint: Option<&str>,
    ) -> Result<MappingSelection<'a>> {
        let carrier = self.registry.carrier(carrier_name)?;
        let selection = self.select_in(carrier, headers, sample_rows, hint)?;

        if selection.confidence != SelectionConfidence::Exact && self.config.strict_selection {
            return Err(IngestError::configuration(
                &carrier.name,
                format!(
                    "layout selection was {} (would use '{}'); rejected by strict selection",
                    selection.confidence, selection.descriptor.id
                ),
            ));
        }

        info!(
            "Selected layout '{}' for {} ({})",
            selection.descriptor.id, carrier.name, selection.confidence
        );
        Ok(selection)
    }

    /// Probes the sheet's leading rows for headers and samples, then selects.
    /// Without an explicit hint the sheet name is tried as one.
    pub fn select_for_sheet(
        &self,
        carrier_name: &str,
        sheet: &RawSheet,
        hint: Option<&str>,
    ) -> Result<MappingSelection<'a>> {
        let depth = self.config.header_probe_rows;
        let headers = sheet.probe_headers(depth);
        let samples: Vec<Vec<CellValue>> = sheet.rows.iter().take(depth).cloned().collect();

        let hint = match hint {
            Some(h) => Some(h),
            None => {
                let carrier = self.registry.carrier(carrier_name)?;
                find_hinted(carrier, &sheet.name).map(|_| sheet.name.as_str())
            }
        };
        self.select(carrier_name, &headers, &samples, hint)
    }

    fn select_in(
        &self,
        carrier: &'a CarrierMapping,
        headers: &[String],
        sample_rows: &[Vec<CellValue>],
        hint: Option<&str>,
    ) -> Result<MappingSelection<'a>> {
        let selection = |descriptor: &'a MappingDescriptor, confidence| MappingSelection {
            carrier,
            descriptor,
            confidence,
        };

        if let Some(hint) = hint {
            match find_hinted(carrier, hint) {
                Some(descriptor) => {
                    debug!("Hint '{}' maps to layout '{}'", hint, descriptor.id);
                    return Ok(selection(descriptor, SelectionConfidence::Exact));
                }
                None => warn!(
                    "Hint '{}' does not name a layout of {}; detecting from headers",
                    hint, carrier.name
                ),
            }
        }

        if let [only] = carrier.descriptors.as_slice() {
            if only.signature_columns.is_empty() || only.signature_matches(headers) {
                return Ok(selection(only, SelectionConfidence::Exact));
            }
            warn!(
                "Signature columns of {} not found; proceeding with its only layout",
                only.qualified_id()
            );
            return Ok(selection(only, SelectionConfidence::Fallback));
        }

        let matches: Vec<&MappingDescriptor> = carrier
            .descriptors
            .iter()
            .filter(|d| d.signature_matches(headers))
            .collect();

        match matches.as_slice() {
            [single] => Ok(selection(*single, SelectionConfidence::Exact)),
            [first, ..] => {
                let resolved = carrier.tie_breaks.iter().find_map(|tb| {
                    let candidate = matches.iter().find(|d| d.id == tb.descriptor)?;
                    tie_break_applies(tb, sample_rows).then_some(*candidate)
                });
                match resolved {
                    Some(descriptor) => {
                        debug!("Tie-break selected layout '{}'", descriptor.id);
                        Ok(selection(descriptor, SelectionConfidence::Exact))
                    }
                    None => {
                        let ids: Vec<&str> = matches.iter().map(|d| d.id.as_str()).collect();
                        warn!(
                            "Layouts {:?} of {} all match; using '{}'",
                            ids, carrier.name, first.id
                        );
                        Ok(selection(*first, SelectionConfidence::Ambiguous))
                    }
                }
            }
            [] => {
                let fallback = carrier.default_layout().ok_or_else(|| {
                    IngestError::configuration(&carrier.name, "carrier has no mapping descriptors")
                })?;
                warn!(
                    "No layout of {} matches the sheet headers; falling back to '{}'",
                    carrier.name, fallback.id
                );
                Ok(selection(fallback, SelectionConfidence::Fallback))
            }
        }
    }
}

fn find_hinted<'a>(carrier: &'a CarrierMapping, hint: &str) -> Option<&'a MappingDescriptor> {
    let hint = hint.trim();
    carrier.descriptor(hint).or_else(|| {
        carrier
            .descriptors
            .iter()
            .find(|d| d.sheet_name.as_deref().is_some_and(|name| name.trim() == hint))
    })
}

/// True when a sample row's cell under the tie-break column contains its text.
/// Name columns are located by the first sample row holding that header.
fn tie_break_applies(tie_break: &TieBreak, sample_rows: &[Vec<CellValue>]) -> bool {
    let hit = |cell: Option<&CellValue>| cell.is_some_and(|c| c.contains(&tie_break.contains));

    match &tie_break.column {
        ColumnSelector::Index(idx) => sample_rows.iter().any(|row| hit(row.get(*idx))),
        ColumnSelector::Name(name) => {
            let located = sample_rows.iter().enumerate().find_map(|(r, row)| {
                row.iter()
                    .position(|c| c.render().as_deref() == Some(name.as_str()))
                    .map(|col| (r, col))
            });
            match located {
                Some((header_row, col)) => sample_rows[header_row + 1..]
                    .iter()
                    .any(|row| hit(row.get(col))),
                None => false,
            }
        }
        ColumnSelector::PeriodMonth { .. } => false,
    }
}
