use crate::cell::HeaderIndex;
use crate::error::{IngestError, Result};
use crate::utils::PeriodMonth;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Rollup dimension for life carriers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    #[schemars(description = "Pension products (פנסיוני)")]
    Pension,
    #[schemars(description = "Risk and health products (סיכונים)")]
    Risk,
    #[schemars(description = "Savings and investment products (פיננסים)")]
    Financial,
    #[schemars(description = "Net pension fund transfers (ניודי פנסיה)")]
    PensionTransfer,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Pension,
        Category::Risk,
        Category::Financial,
        Category::PensionTransfer,
    ];

    pub fn local_name(&self) -> &'static str {
        match self {
            Category::Pension => "פנסיוני",
            Category::Risk => "סיכונים",
            Category::Financial => "פיננסים",
            Category::PensionTransfer => "ניודי פנסיה",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Pension => "PENSION",
            Category::Risk => "RISK",
            Category::Financial => "FINANCIAL",
            Category::PensionTransfer => "PENSION_TRANSFER",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Addressing {
    #[schemars(description = "Every field is looked up by header name in the header row.")]
    ByName,

    #[schemars(description = "Every field is a 0-based column position.")]
    ByIndex,

    #[schemars(
        description = "Structural fields (agent, branch) by position, amounts by name. Needed when amount headers carry the reporting month."
    )]
    Mixed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParseMode {
    #[schemars(description = "One record per eligible row.")]
    Standard,

    #[schemars(
        description = "An agent header row opens a group of branch rows that is closed by a subtotal row. One record per branch row."
    )]
    AgentGrouped,

    #[schemars(
        description = "Fixed three-row cadence per agent: previous-year row, current-year row, change row."
    )]
    ThreeRowGroup,

    #[schemars(
        description = "Transaction or policy rows, one record each, summed per agent during aggregation. No previous-period amount."
    )]
    PolicyLevel,
}

/// Where a field's value lives in a row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ColumnSelector {
    #[schemars(description = "Header text as it appears in the header row (after duplicate-name suffixing).")]
    Name(String),

    #[schemars(description = "0-based column position.")]
    Index(usize),

    #[schemars(
        description = "Header computed from the upload month as '<Hebrew month> <year>', e.g. 'יולי 2025'. year_offset -1 selects the previous year's column."
    )]
    PeriodMonth {
        #[serde(default)]
        year_offset: i32,
    },
}

impl ColumnSelector {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    pub fn index(index: usize) -> Self {
        Self::Index(index)
    }

    /// Header text this selector looks for, if it is name-based.
    pub fn header_name(&self, month: PeriodMonth) -> Option<String> {
        match self {
            Self::Name(name) => Some(name.clone()),
            Self::Index(_) => None,
            Self::PeriodMonth { year_offset } => Some(format!(
                "{} {}",
                month.hebrew_month_name(),
                month.year() + year_offset
            )),
        }
    }

    pub fn resolve(&self, headers: &HeaderIndex, month: PeriodMonth) -> Option<usize> {
        match self {
            Self::Index(idx) => Some(*idx),
            _ => self
                .header_name(month)
                .and_then(|name| headers.position(&name)),
        }
    }

    fn is_positional(&self) -> bool {
        matches!(self, Self::Index(_))
    }
}

impl fmt::Display for ColumnSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "'{}'", name),
            Self::Index(idx) => write!(f, "#{}", idx),
            Self::PeriodMonth { year_offset } => write!(f, "<month {:+}>", year_offset),
        }
    }
}

/// Normalized field name → column. Absent fields are unavailable for the layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct FieldMap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Combined 'number - name' agent token, split by the descriptor's agent_parse rule.")]
    pub agent_string: Option<ColumnSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_number: Option<ColumnSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<ColumnSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Current-period amount (premium, output, deposit).")]
    pub current_amount: Option<ColumnSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Same period one year earlier.")]
    pub previous_amount: Option<ColumnSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_pct: Option<ColumnSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Branch cell of AGENT_GROUPED layouts; a non-blank branch marks a detail row.")]
    pub branch: Option<ColumnSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Label cell of THREE_ROW_GROUP layouts holding the year marker.")]
    pub label: Option<ColumnSelector>,
}

impl FieldMap {
    pub fn has_agent_source(&self) -> bool {
        self.agent_string.is_some() || self.agent_number.is_some()
    }

    pub fn has_amount(&self) -> bool {
        self.current_amount.is_some() || self.previous_amount.is_some()
    }

    fn selectors(&self) -> impl Iterator<Item = (&'static str, &ColumnSelector)> + '_ {
        [
            ("agent_string", &self.agent_string),
            ("agent_number", &self.agent_number),
            ("agent_name", &self.agent_name),
            ("current_amount", &self.current_amount),
            ("previous_amount", &self.previous_amount),
            ("change_pct", &self.change_pct),
            ("branch", &self.branch),
            ("label", &self.label),
        ]
        .into_iter()
        .filter_map(|(field, sel)| sel.as_ref().map(|s| (field, s)))
    }
}

/// How a combined agent token splits into number and name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum AgentParseRule {
    /// Number before the first delimiter, name after: `"224350 - Name"`.
    SplitFirst { delimiter: String },

    /// Name before the last delimiter, number after: `"Name - 85646"`.
    SplitLast { delimiter: String },

    /// Leading digits are the number; the rest is cleaned of number decorations.
    CleanName,

    /// The whole token is the agent number.
    NumberOnly,
}

impl Default for AgentParseRule {
    fn default() -> Self {
        Self::SplitFirst {
            delimiter: " - ".to_string(),
        }
    }
}

/// Post-processing for a separately mapped agent name or number.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NameCleanup {
    #[default]
    None,
    /// `"וסים חאטר-72846"` → `"וסים חאטר"`
    StripTrailingNumber,
    /// Strip `digits-`, `digits-(...)` and `(digits)` decorations.
    Clean,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TextTest {
    Equals(String),
    Contains(String),
    StartsWith(String),
}

impl TextTest {
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Self::Equals(expected) => text == expected,
            Self::Contains(needle) => text.contains(needle.as_str()),
            Self::StartsWith(prefix) => text.starts_with(prefix.as_str()),
        }
    }
}

/// A test on one cell of a row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct CellPredicate {
    pub column: ColumnSelector,
    pub test: TextTest,
}

impl CellPredicate {
    pub fn new(column: ColumnSelector, test: TextTest) -> Self {
        Self { column, test }
    }
}

fn default_true() -> bool {
    true
}

/// Row classification rules shared by every parse mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct RowRules {
    #[serde(default)]
    #[schemars(description = "Any text cell containing one of these ends the scan (report footers, export metadata).")]
    pub stop_keywords: Vec<String>,

    #[serde(default)]
    #[schemars(description = "Cell tests that end the scan.")]
    pub stop_when: Vec<CellPredicate>,

    #[serde(default)]
    #[schemars(description = "Rows whose agent cells contain one of these are skipped (total rows).")]
    pub skip_keywords: Vec<String>,

    #[serde(default)]
    pub skip_when: Vec<CellPredicate>,

    #[serde(default)]
    #[schemars(description = "Cell tests marking an AGENT_GROUPED subtotal row.")]
    pub subtotal_when: Vec<CellPredicate>,

    #[serde(default = "default_true")]
    #[schemars(
        description = "Skip rows whose mapped amount cells hold non-numeric text such as repeated header labels."
    )]
    pub numeric_sanity: bool,

    #[serde(default)]
    #[schemars(description = "Skip rows whose current amount is blank or zero.")]
    pub skip_zero_amount: bool,
}

impl Default for RowRules {
    fn default() -> Self {
        Self {
            stop_keywords: Vec::new(),
            stop_when: Vec::new(),
            skip_keywords: Vec::new(),
            skip_when: Vec::new(),
            subtotal_when: Vec::new(),
            numeric_sanity: true,
            skip_zero_amount: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct GroupRules {
    #[serde(default)]
    #[schemars(description = "Text the agent cell must contain to open a group, e.g. ' - '.")]
    pub agent_marker: Option<String>,

    #[serde(default)]
    #[schemars(description = "Branch cells containing one of these are never detail rows.")]
    pub detail_excludes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct ThreeRowRules {
    #[serde(default)]
    #[schemars(description = "An agent row's token must contain one of these separators.")]
    pub agent_markers: Vec<String>,

    #[serde(default)]
    #[schemars(description = "Tokens containing one of these are header or metadata rows, not agents.")]
    pub agent_excludes: Vec<String>,

    #[serde(default)]
    #[schemars(description = "Tokens naming a Hebrew month are date labels, not agents.")]
    pub reject_month_names: bool,

    #[serde(default)]
    pub change_row_label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct FixedAgent {
    pub number: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExtraKind {
    #[default]
    Text,
    Number,
    Date,
}

/// A carrier attribute carried through to the record untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct ExtraColumn {
    #[schemars(description = "Key in the record's extras map.")]
    pub key: String,
    pub column: ColumnSelector,
    #[serde(default)]
    pub kind: ExtraKind,
}

impl ExtraColumn {
    pub fn new(key: impl Into<String>, column: ColumnSelector, kind: ExtraKind) -> Self {
        Self {
            key: key.into(),
            column,
            kind,
        }
    }
}

/// One physical file layout of one carrier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct MappingDescriptor {
    #[schemars(description = "Stable key of this layout, unique within the carrier. Also accepted as a selection hint.")]
    pub id: String,

    #[serde(default)]
    pub carrier_name: String,

    #[serde(default)]
    pub carrier_name_local: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    #[schemars(description = "Worksheet name this layout is exported under. Also accepted as a selection hint.")]
    pub sheet_name: Option<String>,

    #[schemars(description = "1-based row holding the column headers.")]
    pub header_row_index: usize,

    #[schemars(description = "1-based row where data begins. Must be greater than header_row_index.")]
    pub data_start_row_index: usize,

    #[serde(default)]
    #[schemars(description = "Columns whose simultaneous presence identifies this layout among the carrier's layouts.")]
    pub signature_columns: Vec<String>,

    pub addressing: Addressing,

    pub field_map: FieldMap,

    pub parse_mode: ParseMode,

    #[serde(default)]
    pub agent_parse: AgentParseRule,

    #[serde(default)]
    pub name_cleanup: NameCleanup,

    #[serde(default)]
    pub number_cleanup: NameCleanup,

    #[serde(default)]
    pub row_rules: RowRules,

    #[serde(default)]
    pub grouping: GroupRules,

    #[serde(default)]
    pub three_row: ThreeRowRules,

    #[serde(default)]
    #[schemars(description = "Hardcoded agent when the file represents exactly one agent.")]
    pub fixed_agent: Option<FixedAgent>,

    #[serde(default)]
    #[schemars(description = "Category every record of this layout maps to.")]
    pub fixed_category: Option<Category>,

    #[serde(default)]
    #[schemars(description = "Amounts are year-to-date running totals.")]
    pub cumulative: bool,

    #[serde(default)]
    #[schemars(description = "Product column classified through the classification table at normalize time.")]
    pub category_column: Option<ColumnSelector>,

    #[serde(default)]
    pub classification: BTreeMap<String, Category>,

    #[serde(default)]
    #[schemars(description = "Keep only rows whose month cell equals the upload month.")]
    pub month_filter_column: Option<ColumnSelector>,

    #[serde(default)]
    pub extra_columns: Vec<ExtraColumn>,

    #[serde(default)]
    #[schemars(
        description = "Derive change_pct from the amounts when no change column is mapped: (cur-prev)/prev, or 1.0 when prev is 0 and cur is positive."
    )]
    pub derive_change: bool,
}

impl MappingDescriptor {
    pub fn new(
        id: impl Into<String>,
        addressing: Addressing,
        parse_mode: ParseMode,
        header_row_index: usize,
        data_start_row_index: usize,
        field_map: FieldMap,
    ) -> Self {
        Self {
            id: id.into(),
            carrier_name: String::new(),
            carrier_name_local: String::new(),
            description: String::new(),
            sheet_name: None,
            header_row_index,
            data_start_row_index,
            signature_columns: Vec::new(),
            addressing,
            field_map,
            parse_mode,
            agent_parse: AgentParseRule::default(),
            name_cleanup: NameCleanup::None,
            number_cleanup: NameCleanup::None,
            row_rules: RowRules::default(),
            grouping: GroupRules::default(),
            three_row: ThreeRowRules::default(),
            fixed_agent: None,
            fixed_category: None,
            cumulative: false,
            category_column: None,
            classification: BTreeMap::new(),
            month_filter_column: None,
            extra_columns: Vec::new(),
            derive_change: false,
        }
    }

    /// Structural checks run when a registry is built or loaded.
    pub fn validate(&self) -> Result<()> {
        let fail = |details: String| -> Result<()> {
            Err(IngestError::configuration(self.qualified_id(), details))
        };

        if self.header_row_index == 0 {
            return fail("header_row_index is 1-based and must be at least 1".to_string());
        }
        if self.data_start_row_index <= self.header_row_index {
            return fail(format!(
                "data_start_row_index ({}) must be greater than header_row_index ({})",
                self.data_start_row_index, self.header_row_index
            ));
        }
        if !self.field_map.has_agent_source() && self.fixed_agent.is_none() {
            return fail("field map supplies neither agent_string, agent_number nor a fixed_agent".to_string());
        }
        if !self.field_map.has_amount() {
            return fail("field map supplies no amount field".to_string());
        }

        for (field, selector) in self.field_map.selectors() {
            let legal = match (self.addressing, selector) {
                (Addressing::ByName, ColumnSelector::Index(_)) => false,
                (Addressing::ByIndex, sel) => sel.is_positional(),
                _ => true,
            };
            if !legal {
                return fail(format!(
                    "field {} uses selector {} which {:?} addressing does not allow",
                    field, selector, self.addressing
                ));
            }
        }

        match self.parse_mode {
            ParseMode::AgentGrouped => {
                if self.field_map.agent_string.is_none() || self.field_map.branch.is_none() {
                    return fail("AGENT_GROUPED layouts need agent_string and branch columns".to_string());
                }
            }
            ParseMode::ThreeRowGroup => {
                if self.field_map.agent_string.is_none()
                    || self.field_map.label.is_none()
                    || self.field_map.current_amount.is_none()
                {
                    return fail(
                        "THREE_ROW_GROUP layouts need agent_string, label and current_amount columns"
                            .to_string(),
                    );
                }
            }
            ParseMode::PolicyLevel => {
                if self.field_map.current_amount.is_none() {
                    return fail("POLICY_LEVEL layouts need a current_amount column".to_string());
                }
            }
            ParseMode::Standard => {}
        }

        if self.category_column.is_some() && self.classification.is_empty() {
            return fail("category_column is set but the classification table is empty".to_string());
        }

        Ok(())
    }

    pub fn qualified_id(&self) -> String {
        if self.carrier_name.is_empty() {
            self.id.clone()
        } else {
            format!("{}/{}", self.carrier_name, self.id)
        }
    }

    /// True when every signature column is among `headers`. Empty signatures match nothing.
    pub fn signature_matches<S: AsRef<str>>(&self, headers: &[S]) -> bool {
        !self.signature_columns.is_empty()
            && self
                .signature_columns
                .iter()
                .all(|sig| headers.iter().any(|h| h.as_ref().trim() == sig.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grouped_descriptor() -> MappingDescriptor {
        MappingDescriptor::new(
            "grouped",
            Addressing::ByIndex,
            ParseMode::AgentGrouped,
            1,
            2,
            FieldMap {
                agent_string: Some(ColumnSelector::index(0)),
                branch: Some(ColumnSelector::index(1)),
                current_amount: Some(ColumnSelector::index(2)),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_valid_descriptor_passes() {
        assert!(grouped_descriptor().validate().is_ok());
    }

    #[test]
    fn test_data_start_must_follow_header() {
        let mut d = grouped_descriptor();
        d.data_start_row_index = 1;
        let err = d.validate().unwrap_err();
        assert!(matches!(err, IngestError::Configuration { .. }));
    }

    #[test]
    fn test_missing_agent_source_rejected() {
        let mut d = grouped_descriptor();
        d.parse_mode = ParseMode::Standard;
        d.field_map.agent_string = None;
        assert!(d.validate().is_err());

        d.fixed_agent = Some(FixedAgent {
            number: "438".to_string(),
            name: None,
        });
        assert!(d.validate().is_ok());
    }

    #[test]
    fn test_missing_amount_rejected() {
        let mut d = grouped_descriptor();
        d.field_map.current_amount = None;
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_period_month_selector_illegal_by_index() {
        let mut d = grouped_descriptor();
        d.field_map.current_amount = Some(ColumnSelector::PeriodMonth { year_offset: 0 });
        assert!(d.validate().is_err());

        d.addressing = Addressing::Mixed;
        assert!(d.validate().is_ok());
    }

    #[test]
    fn test_period_month_selector_resolves_hebrew_header() {
        let month = PeriodMonth::parse("2025-07").unwrap();
        let headers = HeaderIndex::from_names(&["סוכן", "ענף", "יולי 2025", "יולי 2024"]);
        let current = ColumnSelector::PeriodMonth { year_offset: 0 };
        let previous = ColumnSelector::PeriodMonth { year_offset: -1 };
        assert_eq!(current.resolve(&headers, month), Some(2));
        assert_eq!(previous.resolve(&headers, month), Some(3));
        assert_eq!(current.header_name(month).as_deref(), Some("יולי 2025"));
    }

    #[test]
    fn test_signature_matching_all_must_be_present() {
        let mut d = grouped_descriptor();
        d.signature_columns = vec!["סוכן".to_string(), "פרמיה ברוטו".to_string()];
        assert!(d.signature_matches(&["סוכן", "ענף", "פרמיה ברוטו"]));
        assert!(!d.signature_matches(&["סוכן", "ענף"]));
    }

    #[test]
    fn test_descriptor_json_defaults() {
        let json = r#"{
            "id": "policy",
            "header_row_index": 1,
            "data_start_row_index": 2,
            "addressing": "BY_NAME",
            "parse_mode": "POLICY_LEVEL",
            "field_map": {
                "agent_number": {"name": "מס סוכן"},
                "current_amount": {"name": "פרמיה ברוטו"}
            },
            "agent_parse": {"rule": "split_last", "delimiter": "-"},
            "fixed_category": "PENSION_TRANSFER"
        }"#;
        let d: MappingDescriptor = serde_json::from_str(json).unwrap();
        assert!(d.row_rules.numeric_sanity);
        assert_eq!(d.fixed_category, Some(Category::PensionTransfer));
        assert_eq!(
            d.agent_parse,
            AgentParseRule::SplitLast {
                delimiter: "-".to_string()
            }
        );
        assert!(d.validate().is_ok());
    }
}
