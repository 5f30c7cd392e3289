//! Per-sheet view of a descriptor: columns resolved once against the header
//! row, plus the row predicates and field extraction every mode shares.

use crate::cell::{CellValue, HeaderIndex, RowRef};
use crate::error::{IngestError, Result, RowParseError};
use crate::records::NormalizedRecord;
use crate::schema::{
    Addressing, AgentParseRule, Category, CellPredicate, ColumnSelector, ExtraKind,
    MappingDescriptor, NameCleanup,
};
use crate::utils::{
    agent_number_from_cell, clean_agent_name, derive_change_pct, format_date_cell,
    leading_digits, looks_numeric, parse_amount, strip_trailing_number, PeriodMonth,
};
use chrono::Datelike;
use log::{debug, warn};
use serde_json::Value;
use std::collections::BTreeMap;

static BLANK: CellValue = CellValue::Empty;

/// Agent number and name as read from a row or an agent token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentIdentity {
    pub number: Option<String>,
    pub name: Option<String>,
}

impl AgentIdentity {
    pub fn is_empty(&self) -> bool {
        self.number.is_none() && self.name.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Columns {
    agent_string: Option<usize>,
    agent_number: Option<usize>,
    agent_name: Option<usize>,
    current: Option<usize>,
    previous: Option<usize>,
    change: Option<usize>,
    branch: Option<usize>,
    label: Option<usize>,
    month_filter: Option<usize>,
    category: Option<usize>,
}

pub(crate) struct SheetContext<'a> {
    pub descriptor: &'a MappingDescriptor,
    pub carrier_id: i64,
    pub period_month: PeriodMonth,
    headers: &'a HeaderIndex,
    columns: Columns,
    extras: Vec<(String, Option<usize>, ExtraKind)>,
}

impl<'a> SheetContext<'a> {
    /// Resolves every mapped column. MIXED layouts must find their current
    /// amount column; a missing previous column only warns.
    pub fn new(
        descriptor: &'a MappingDescriptor,
        headers: &'a HeaderIndex,
        carrier_id: i64,
        period_month: PeriodMonth,
    ) -> Result<Self> {
        let fm = &descriptor.field_map;
        let resolve = |selector: &Option<ColumnSelector>, field: &str| -> Option<usize> {
            let selector = selector.as_ref()?;
            let idx = selector.resolve(headers, period_month);
            if idx.is_none() {
                debug!(
                    "{}: column {} for {} not in header row",
                    descriptor.qualified_id(),
                    selector,
                    field
                );
            }
            idx
        };

        let columns = Columns {
            agent_string: resolve(&fm.agent_string, "agent_string"),
            agent_number: resolve(&fm.agent_number, "agent_number"),
            agent_name: resolve(&fm.agent_name, "agent_name"),
            current: resolve(&fm.current_amount, "current_amount"),
            previous: resolve(&fm.previous_amount, "previous_amount"),
            change: resolve(&fm.change_pct, "change_pct"),
            branch: resolve(&fm.branch, "branch"),
            label: resolve(&fm.label, "label"),
            month_filter: resolve(&descriptor.month_filter_column, "month_filter_column"),
            category: resolve(&descriptor.category_column, "category_column"),
        };

        if descriptor.addressing == Addressing::Mixed {
            if let (Some(selector), None) = (&fm.current_amount, columns.current) {
                return Err(IngestError::configuration(
                    descriptor.qualified_id(),
                    format!(
                        "current-period column {} not found; available columns: {}",
                        selector
                            .header_name(period_month)
                            .unwrap_or_else(|| selector.to_string()),
                        headers.keys().join(", ")
                    ),
                ));
            }
            if let (Some(selector), None) = (&fm.previous_amount, columns.previous) {
                warn!(
                    "{}: previous-period column {} not found; previous amounts will be empty",
                    descriptor.qualified_id(),
                    selector
                        .header_name(period_month)
                        .unwrap_or_else(|| selector.to_string())
                );
            }
        }

        let extras = descriptor
            .extra_columns
            .iter()
            .map(|extra| {
                (
                    extra.key.clone(),
                    extra.column.resolve(headers, period_month),
                    extra.kind,
                )
            })
            .collect();

        Ok(Self {
            descriptor,
            carrier_id,
            period_month,
            headers,
            columns,
            extras,
        })
    }

    fn cell<'r>(row: &RowRef<'r>, idx: Option<usize>) -> &'r CellValue {
        match idx {
            Some(i) => row.at(i),
            None => &BLANK,
        }
    }

    fn predicate_cell<'r>(&self, row: &RowRef<'r>, predicate: &CellPredicate) -> &'r CellValue {
        Self::cell(row, predicate.column.resolve(self.headers, self.period_month))
    }

    fn predicate_holds(&self, row: &RowRef, predicate: &CellPredicate) -> bool {
        let cell = self.predicate_cell(row, predicate);
        !cell.is_blank() && predicate.test.matches(&cell.to_string())
    }

    pub fn agent_string_cell<'r>(&self, row: &RowRef<'r>) -> &'r CellValue {
        Self::cell(row, self.columns.agent_string)
    }

    pub fn branch_cell<'r>(&self, row: &RowRef<'r>) -> &'r CellValue {
        Self::cell(row, self.columns.branch)
    }

    pub fn label_cell<'r>(&self, row: &RowRef<'r>) -> &'r CellValue {
        Self::cell(row, self.columns.label)
    }

    pub fn current_cell<'r>(&self, row: &RowRef<'r>) -> &'r CellValue {
        Self::cell(row, self.columns.current)
    }

    // ── Row predicates ─────────────────────────────────────

    /// A footer or metadata row that ends the scan.
    pub fn is_stop_row(&self, row: &RowRef) -> bool {
        let rules = &self.descriptor.row_rules;
        let keyword_hit = !rules.stop_keywords.is_empty()
            && row.cells.iter().any(|cell| {
                cell.as_str()
                    .is_some_and(|text| rules.stop_keywords.iter().any(|k| text.contains(k.as_str())))
            });
        keyword_hit || rules.stop_when.iter().any(|p| self.predicate_holds(row, p))
    }

    /// A total or noise row that is passed over.
    pub fn is_skip_row(&self, row: &RowRef) -> bool {
        let rules = &self.descriptor.row_rules;
        if rules.skip_when.iter().any(|p| self.predicate_holds(row, p)) {
            return true;
        }
        if rules.skip_keywords.is_empty() {
            return false;
        }
        [
            self.columns.agent_string,
            self.columns.agent_number,
            self.columns.agent_name,
        ]
        .into_iter()
        .map(|idx| Self::cell(row, idx))
        .any(|cell| rules.skip_keywords.iter().any(|k| cell.contains(k)))
    }

    /// An AGENT_GROUPED subtotal row that closes the open group.
    pub fn is_subtotal_row(&self, row: &RowRef) -> bool {
        self.descriptor
            .row_rules
            .subtotal_when
            .iter()
            .any(|p| self.predicate_holds(row, p))
    }

    /// Amount cells holding stray text such as a repeated header label.
    pub fn fails_numeric_sanity(&self, row: &RowRef) -> bool {
        if !self.descriptor.row_rules.numeric_sanity {
            return false;
        }
        let core = [self.columns.current, self.columns.previous, self.columns.change];
        let numeric_extras = self
            .extras
            .iter()
            .filter(|(_, _, kind)| *kind == ExtraKind::Number)
            .map(|(_, idx, _)| *idx);
        core.into_iter()
            .chain(numeric_extras)
            .flatten()
            .any(|idx| !looks_numeric(row.at(idx)))
    }

    /// Blank or zero current amount, when the layout drops those rows.
    pub fn is_zero_amount_row(&self, row: &RowRef) -> bool {
        self.descriptor.row_rules.skip_zero_amount
            && parse_amount(self.current_cell(row)).unwrap_or(0.0) == 0.0
    }

    /// False when the month filter column names another month.
    pub fn in_upload_month(&self, row: &RowRef) -> bool {
        if self.descriptor.month_filter_column.is_none() {
            return true;
        }
        month_of_cell(Self::cell(row, self.columns.month_filter)) == Some(self.period_month.month())
    }

    // ── Field extraction ───────────────────────────────────

    /// Splits a combined agent token by the layout's parse rule.
    pub fn parse_agent_token(&self, token: &str) -> AgentIdentity {
        parse_agent_token(&self.descriptor.agent_parse, token)
    }

    /// Agent identity of a row: fixed agent, agent token or separate columns.
    pub fn agent_identity(&self, row: &RowRef) -> std::result::Result<AgentIdentity, RowParseError> {
        if let Some(fixed) = &self.descriptor.fixed_agent {
            return Ok(AgentIdentity {
                number: Some(fixed.number.clone()),
                name: fixed.name.clone(),
            });
        }

        let token_cell = self.agent_string_cell(row);
        if self.columns.agent_string.is_some() && !token_cell.is_blank() {
            let token = agent_number_from_cell(token_cell).unwrap_or_default();
            let identity = self.parse_agent_token(&token);
            if identity.is_empty() {
                return Err(RowParseError::MalformedAgent {
                    row: row.number,
                    token,
                });
            }
            return Ok(identity);
        }

        let mut number = agent_number_from_cell(Self::cell(row, self.columns.agent_number))
            .map(|n| apply_cleanup(self.descriptor.number_cleanup, &n))
            .filter(|n| !n.is_empty());
        let raw_name = Self::cell(row, self.columns.agent_name).render();
        let name = raw_name
            .as_deref()
            .map(|n| apply_cleanup(self.descriptor.name_cleanup, n))
            .filter(|n| !n.is_empty());

        if self.descriptor.name_cleanup == NameCleanup::Clean {
            if let Some(digits) = raw_name.as_deref().and_then(leading_digits) {
                number = Some(digits.to_string());
            }
        }

        Ok(AgentIdentity { number, name })
    }

    /// Reads an amount cell. A non-numeric value is a row error when the
    /// numeric sanity rule is off (with it on, such rows never get here).
    pub fn amount(
        &self,
        row: &RowRef,
        idx: Option<usize>,
        field: &str,
    ) -> std::result::Result<Option<f64>, RowParseError> {
        let cell = Self::cell(row, idx);
        match parse_amount(cell) {
            Some(v) => Ok(Some(v)),
            None if cell.is_blank() => Ok(None),
            None => Err(RowParseError::NonNumericAmount {
                row: row.number,
                column: field.to_string(),
                value: cell.to_string(),
            }),
        }
    }

    pub fn current_amount(&self, row: &RowRef) -> std::result::Result<Option<f64>, RowParseError> {
        self.amount(row, self.columns.current, "current_amount")
    }

    pub fn previous_amount(&self, row: &RowRef) -> std::result::Result<Option<f64>, RowParseError> {
        self.amount(row, self.columns.previous, "previous_amount")
    }

    /// Mapped change column, else the derived growth when enabled.
    pub fn change_pct(
        &self,
        row: &RowRef,
        current: Option<f64>,
        previous: Option<f64>,
    ) -> std::result::Result<Option<f64>, RowParseError> {
        if self.columns.change.is_some() {
            return self.amount(row, self.columns.change, "change_pct");
        }
        Ok(if self.descriptor.derive_change {
            derive_change_pct(current, previous)
        } else {
            None
        })
    }

    /// Fixed category, or the classified product of a categorized layout.
    pub fn category(&self, row: &RowRef) -> Option<Category> {
        if let Some(fixed) = self.descriptor.fixed_category {
            return Some(fixed);
        }
        self.descriptor.category_column.as_ref()?;
        let product = Self::cell(row, self.columns.category).render()?;
        self.descriptor.classification.get(&product).copied()
    }

    /// A categorized layout whose product cell is missing from the
    /// classification table. Such rows are dropped.
    pub fn is_unclassified(&self, row: &RowRef) -> bool {
        if self.descriptor.fixed_category.is_some() || self.descriptor.category_column.is_none() {
            return false;
        }
        let unknown = self.category(row).is_none();
        if unknown {
            debug!(
                "Row {}: product {:?} not in classification table",
                row.number,
                Self::cell(row, self.columns.category).render()
            );
        }
        unknown
    }

    pub fn extras(&self, row: &RowRef) -> BTreeMap<String, Value> {
        self.extras
            .iter()
            .map(|(key, idx, kind)| {
                let cell = Self::cell(row, *idx);
                let value = match kind {
                    ExtraKind::Text => cell.render().map(Value::String).unwrap_or(Value::Null),
                    ExtraKind::Number => parse_amount(cell).map(Value::from).unwrap_or(Value::Null),
                    ExtraKind::Date => format_date_cell(cell).map(Value::String).unwrap_or(Value::Null),
                };
                (key.clone(), value)
            })
            .collect()
    }

    pub fn record(
        &self,
        source_row: usize,
        agent: AgentIdentity,
        current_amount: Option<f64>,
        previous_amount: Option<f64>,
        change_pct: Option<f64>,
        category: Option<Category>,
        extras: BTreeMap<String, Value>,
    ) -> NormalizedRecord {
        NormalizedRecord {
            carrier_id: self.carrier_id,
            period_month: self.period_month,
            agent_number: agent.number,
            agent_name: agent.name,
            current_amount,
            previous_amount,
            change_pct,
            category,
            source_row,
            layout_id: Some(self.descriptor.id.clone()),
            extras,
        }
    }
}

fn apply_cleanup(cleanup: NameCleanup, raw: &str) -> String {
    match cleanup {
        NameCleanup::None => raw.trim().to_string(),
        NameCleanup::StripTrailingNumber => strip_trailing_number(raw),
        NameCleanup::Clean => clean_agent_name(raw),
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Token without a delimiter: all digits is a number, anything else a name.
fn undelimited(token: &str) -> AgentIdentity {
    let token = token.trim();
    if !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()) {
        AgentIdentity {
            number: Some(token.to_string()),
            name: None,
        }
    } else {
        AgentIdentity {
            number: None,
            name: non_empty(token),
        }
    }
}

pub(crate) fn parse_agent_token(rule: &AgentParseRule, token: &str) -> AgentIdentity {
    let token = token.trim();
    match rule {
        AgentParseRule::SplitFirst { delimiter } => match token.split_once(delimiter.as_str()) {
            Some((number, name)) => AgentIdentity {
                number: non_empty(number),
                name: non_empty(name),
            },
            None => undelimited(token),
        },
        AgentParseRule::SplitLast { delimiter } => match token.rsplit_once(delimiter.as_str()) {
            Some((name, number)) => AgentIdentity {
                number: non_empty(number),
                name: non_empty(name),
            },
            None => undelimited(token),
        },
        AgentParseRule::CleanName => AgentIdentity {
            number: leading_digits(token).map(str::to_string),
            name: non_empty(&clean_agent_name(token)),
        },
        AgentParseRule::NumberOnly => AgentIdentity {
            number: non_empty(token),
            name: None,
        },
    }
}

/// Month number held by a month-filter cell: `7`, `"07"`, a date, `MM/YYYY`
/// or `YYYY-MM[-DD]`.
pub(crate) fn month_of_cell(cell: &CellValue) -> Option<u32> {
    let month = match cell {
        CellValue::Number(n) if n.fract() == 0.0 => Some(*n as u32),
        CellValue::Date(d) => Some(d.month()),
        CellValue::Text(s) => s.trim().parse::<u32>().ok().or_else(|| {
            let formatted = format_date_cell(cell)?;
            formatted.split('-').nth(1)?.parse::<u32>().ok()
        }),
        _ => None,
    };
    month.filter(|m| (1..=12).contains(m))
}
