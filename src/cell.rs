//! Decoded worksheet cells.
//!
//! The workbook decoder is outside this crate. It hands over each sheet as an
//! ordered list of rows (row 1 first), every row an ordered list of raw cells.
//! Cells keep their decoded type so that numbers, dates and text are never
//! reformatted through a locale.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
    Date(NaiveDate),
    Bool(bool),
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Empty cells and whitespace-only text both count as blank.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Borrow the trimmed text of a text cell. Numbers and dates are not text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.trim()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Render the cell as a display string, `None` when blank.
    pub fn render(&self) -> Option<String> {
        if self.is_blank() {
            return None;
        }
        Some(self.to_string())
    }

    pub fn contains(&self, needle: &str) -> bool {
        match self {
            Self::Text(s) => s.contains(needle),
            Self::Number(_) | Self::Date(_) => self.to_string().contains(needle),
            _ => false,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Empty => serde_json::Value::Null,
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Text(s) if s.trim().is_empty() => serde_json::Value::Null,
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            Self::Bool(b) => serde_json::Value::Bool(*b),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s.trim()),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Self::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            Self::Empty
        } else {
            Self::Text(value.to_string())
        }
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        if value.is_empty() {
            Self::Empty
        } else {
            Self::Text(value)
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Empty)
    }
}

/// One decoded worksheet.
#[derive(Debug, Clone, Default)]
pub struct RawSheet {
    pub name: String,
    pub rows: Vec<Vec<CellValue>>,
}

impl RawSheet {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    /// Row by 1-based sheet row number.
    pub fn row(&self, number: usize) -> Option<&[CellValue]> {
        number
            .checked_sub(1)
            .and_then(|idx| self.rows.get(idx))
            .map(Vec::as_slice)
    }

    /// Every non-blank text cell in the first `depth` rows. Used for signature
    /// detection before the header row of the layout is known.
    pub fn probe_headers(&self, depth: usize) -> Vec<String> {
        let mut seen = Vec::new();
        for row in self.rows.iter().take(depth) {
            for cell in row {
                if let Some(text) = cell.render() {
                    if !seen.contains(&text) {
                        seen.push(text);
                    }
                }
            }
        }
        seen
    }
}

/// Column-name index built from one header row.
///
/// Header keys follow the decoder's naming convention: blank headers become
/// `__EMPTY`, `__EMPTY_1`, ... and repeated names get `_1`, `_2` suffixes in
/// order of appearance.
#[derive(Debug, Clone, Default)]
pub struct HeaderIndex {
    keys: Vec<String>,
    positions: HashMap<String, usize>,
}

impl HeaderIndex {
    pub fn from_cells(cells: &[CellValue]) -> Self {
        let mut keys = Vec::with_capacity(cells.len());
        let mut positions = HashMap::new();
        let mut occurrences: HashMap<String, usize> = HashMap::new();

        for (idx, cell) in cells.iter().enumerate() {
            let base = cell.render().unwrap_or_else(|| "__EMPTY".to_string());
            let count = occurrences.entry(base.clone()).or_insert(0);
            let key = if *count == 0 {
                base.clone()
            } else {
                format!("{}_{}", base, count)
            };
            *count += 1;
            positions.insert(key.clone(), idx);
            keys.push(key);
        }

        Self { keys, positions }
    }

    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let cells: Vec<CellValue> = names.iter().map(|n| CellValue::from(n.as_ref())).collect();
        Self::from_cells(&cells)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

/// One data row together with its 1-based sheet row number.
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    pub number: usize,
    pub cells: &'a [CellValue],
}

static EMPTY_CELL: CellValue = CellValue::Empty;

impl<'a> RowRef<'a> {
    pub fn new(number: usize, cells: &'a [CellValue]) -> Self {
        Self { number, cells }
    }

    pub fn at(&self, index: usize) -> &'a CellValue {
        self.cells.get(index).unwrap_or(&EMPTY_CELL)
    }

    pub fn by_name(&self, headers: &HeaderIndex, name: &str) -> &'a CellValue {
        headers
            .position(name)
            .map(|idx| self.at(idx))
            .unwrap_or(&EMPTY_CELL)
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(CellValue::is_blank)
    }
}

/// A sheet with its header row resolved, so rows can be read both by
/// position and by header name.
#[derive(Debug, Clone)]
pub struct SheetView<'a> {
    sheet: &'a RawSheet,
    headers: HeaderIndex,
}

impl<'a> SheetView<'a> {
    /// `header_row` is 1-based. A header row past the end of the sheet yields
    /// an empty header index.
    pub fn new(sheet: &'a RawSheet, header_row: usize) -> Self {
        let headers = sheet
            .row(header_row)
            .map(HeaderIndex::from_cells)
            .unwrap_or_default();
        Self { sheet, headers }
    }

    pub fn name(&self) -> &str {
        &self.sheet.name
    }

    pub fn headers(&self) -> &HeaderIndex {
        &self.headers
    }

    pub fn row_count(&self) -> usize {
        self.sheet.rows.len()
    }

    /// Rows from 1-based row `start` to the end of the sheet.
    pub fn rows_from(&self, start: usize) -> impl Iterator<Item = RowRef<'a>> + '_ {
        let skip = start.saturating_sub(1);
        self.sheet
            .rows
            .iter()
            .enumerate()
            .skip(skip)
            .map(|(idx, cells)| RowRef::new(idx + 1, cells))
    }
}
