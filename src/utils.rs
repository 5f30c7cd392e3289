use crate::cell::CellValue;
use crate::error::{IngestError, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const HEBREW_MONTHS: [&str; 12] = [
    "ינואר",
    "פברואר",
    "מרץ",
    "אפריל",
    "מאי",
    "יוני",
    "יולי",
    "אוגוסט",
    "ספטמבר",
    "אוקטובר",
    "נובמבר",
    "דצמבר",
];

/// A reporting month, written `YYYY-MM` everywhere it crosses a boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeriodMonth {
    year: i32,
    month: u32,
}

impl PeriodMonth {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(IngestError::InvalidPeriod(format!("{:04}-{:02}", year, month)));
        }
        Ok(Self { year, month })
    }

    /// Parses a period string in the format "YYYY-MM"
    pub fn parse(period: &str) -> Result<Self> {
        let start_str = format!("{}-01", period.trim());
        let date = NaiveDate::parse_from_str(&start_str, "%Y-%m-%d")
            .map_err(|_| IngestError::InvalidPeriod(period.to_string()))?;
        Ok(Self {
            year: date.year(),
            month: date.month(),
        })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn is_january(&self) -> bool {
        self.month == 1
    }

    pub fn first_day(&self) -> NaiveDate {
        // month is validated on construction
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    /// January of the same year.
    pub fn year_start(&self) -> Self {
        Self {
            year: self.year,
            month: 1,
        }
    }

    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    /// Same month one year earlier.
    pub fn year_earlier(&self) -> Self {
        Self {
            year: self.year - 1,
            month: self.month,
        }
    }

    /// January through the month before this one, oldest first.
    pub fn prior_months_in_year(&self) -> Vec<PeriodMonth> {
        (1..self.month)
            .map(|month| Self {
                year: self.year,
                month,
            })
            .collect()
    }

    pub fn hebrew_month_name(&self) -> &'static str {
        HEBREW_MONTHS[(self.month - 1) as usize]
    }
}

impl fmt::Display for PeriodMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for PeriodMonth {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PeriodMonth {
    type Error = IngestError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PeriodMonth> for String {
    fn from(value: PeriodMonth) -> Self {
        value.to_string()
    }
}

const STRIPPED_GLYPHS: [char; 9] = [',', '"', '\'', '₪', '$', '€', '£', '%', '\u{00A0}'];

/// Coerces a raw cell into an amount.
///
/// Numbers pass through. Text loses thousands separators, quotes, currency
/// glyphs and whitespace; `(123)` reads as `-123`. Anything that still does not
/// parse, and every blank cell, is `None` rather than zero.
pub fn parse_amount(cell: &CellValue) -> Option<f64> {
    match cell {
        CellValue::Number(n) if n.is_finite() => Some(*n),
        CellValue::Text(s) => parse_amount_str(s),
        _ => None,
    }
}

pub fn parse_amount_str(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !STRIPPED_GLYPHS.contains(c))
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let (negative, body) = match cleaned.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, cleaned.as_str()),
    };

    body.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| if negative { -v } else { v })
}

/// True when the cell is blank or coerces to a number.
pub fn looks_numeric(cell: &CellValue) -> bool {
    cell.is_blank() || parse_amount(cell).is_some()
}

/// Growth of `current` over `previous` as a fraction.
///
/// A zero previous figure with positive current growth counts as 100%.
pub fn derive_change_pct(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    match (current, previous) {
        (Some(cur), Some(prev)) if prev != 0.0 => Some((cur - prev) / prev),
        (Some(cur), Some(prev)) if prev == 0.0 && cur > 0.0 => Some(1.0),
        _ => None,
    }
}

/// Formats a date-like cell as `YYYY-MM-DD`.
///
/// Accepts real dates, `MM/YYYY` (first of month) and `DD/MM/YYYY`. A lone
/// dash or blank is `None`; other text is passed through unchanged.
pub fn format_date_cell(cell: &CellValue) -> Option<String> {
    match cell {
        CellValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        CellValue::Text(s) => {
            let s = s.trim();
            if s.is_empty() || s == "-" {
                return None;
            }
            let parts: Vec<&str> = s.split('/').collect();
            match parts.as_slice() {
                [month, year] if month.len() == 2 && year.len() == 4 => {
                    Some(format!("{}-{}-01", year, month))
                }
                [day, month, year] => Some(format!("{}-{:0>2}-{:0>2}", year, month, day)),
                _ => Some(s.to_string()),
            }
        }
        CellValue::Empty => None,
        other => other.render(),
    }
}

/// Leading ASCII digits of `s`, if any.
pub fn leading_digits(s: &str) -> Option<&str> {
    let end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    if end == 0 {
        None
    } else {
        Some(&s[..end])
    }
}

/// Strips agent-number decorations from a display name:
/// `70504-(2020)Name`, `70504-Name`, `Name (2020)`, `(Name`.
pub fn clean_agent_name(raw: &str) -> String {
    let mut name = raw.trim().to_string();

    if let Some(digits) = leading_digits(&name) {
        let rest = &name[digits.len()..];
        if let Some(after_dash) = rest.strip_prefix('-') {
            let stripped = match after_dash.strip_prefix('(').and_then(|s| s.find(')').map(|i| (s, i))) {
                Some((s, close)) => s[close + 1..].to_string(),
                None => after_dash.to_string(),
            };
            name = stripped;
        }
    }

    name = strip_numeric_parens(&name);
    if let Some(rest) = name.strip_prefix('(') {
        name = rest.to_string();
    }
    // trailing "(123" left by truncated exports
    if let Some(open) = name.rfind('(') {
        let tail = &name[open + 1..];
        if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) {
            name.truncate(open);
        }
    }

    name.trim().to_string()
}

fn strip_numeric_parens(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(open) = rest.find('(') {
        let after = &rest[open + 1..];
        match after.find(')') {
            Some(close)
                if close > 0 && after[..close].chars().all(|c| c.is_ascii_digit()) =>
            {
                out.push_str(rest[..open].trim_end());
                rest = after[close + 1..].trim_start();
                if !out.is_empty() && !rest.is_empty() {
                    out.push(' ');
                }
            }
            _ => {
                out.push_str(&rest[..=open]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Removes a trailing `-digits` suffix: `"וסים חאטר-72846"` → `"וסים חאטר"`.
pub fn strip_trailing_number(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.rfind('-') {
        Some(idx) => trimmed[..idx].trim().to_string(),
        None => trimmed.to_string(),
    }
}

/// Agent numbers arrive as numbers (`72846.0`) or text (`"1/1/44962"`).
pub fn agent_number_from_cell(cell: &CellValue) -> Option<String> {
    match cell {
        CellValue::Number(n) => Some(format!("{}", n.trunc() as i64)),
        other => other.render(),
    }
}

/// Splits a comma-joined agent number list, dropping blanks.
pub fn split_number_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
