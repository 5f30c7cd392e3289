use crate::schema::Category;
use crate::utils::{derive_change_pct, parse_amount_str, split_number_list, PeriodMonth};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Agent-number token that marks a registry entry as a placeholder, never data.
pub const UNMAPPED_TOKEN: &str = "UNMAPPED";

/// One source row mapped to the common schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub carrier_id: i64,
    pub period_month: PeriodMonth,
    pub agent_number: Option<String>,
    pub agent_name: Option<String>,
    pub current_amount: Option<f64>,
    pub previous_amount: Option<f64>,
    pub change_pct: Option<f64>,
    pub category: Option<Category>,
    /// 1-based sheet row the record was built from.
    pub source_row: usize,
    /// Id of the layout that produced the record. `None` for placeholders.
    #[serde(default)]
    pub layout_id: Option<String>,
    #[serde(default)]
    pub extras: BTreeMap<String, Value>,
}

impl NormalizedRecord {
    /// Numeric value of a core amount field or an extras key.
    pub fn number(&self, field: &str) -> Option<f64> {
        match field {
            "current_amount" => self.current_amount,
            "previous_amount" => self.previous_amount,
            "change_pct" => self.change_pct,
            key => match self.extras.get(key)? {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => parse_amount_str(s),
                _ => None,
            },
        }
    }

    /// Text value of an identity field or an extras key.
    pub fn text(&self, field: &str) -> Option<String> {
        match field {
            "agent_number" => self.agent_number.clone(),
            "agent_name" => self.agent_name.clone(),
            key => match self.extras.get(key)? {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            },
        }
    }

    /// Whether a field carries a non-null value.
    pub fn has_field(&self, field: &str) -> bool {
        match field {
            "current_amount" => self.current_amount.is_some(),
            "previous_amount" => self.previous_amount.is_some(),
            "change_pct" => self.change_pct.is_some(),
            "agent_number" => self.agent_number.is_some(),
            "agent_name" => self.agent_name.is_some(),
            key => self.extras.get(key).is_some_and(|v| !v.is_null()),
        }
    }

    pub fn is_placeholder(&self, placeholder_name: &str) -> bool {
        self.agent_name.as_deref() == Some(placeholder_name)
    }
}

/// Canonical agent as supplied by the agent registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    pub name: String,
    /// Carrier id → comma-joined agent number list at that carrier.
    #[serde(default)]
    pub carrier_numbers: BTreeMap<i64, String>,
    #[serde(default)]
    pub life: bool,
    #[serde(default)]
    pub elementary: bool,
}

impl Agent {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            carrier_numbers: BTreeMap::new(),
            life: false,
            elementary: false,
        }
    }

    pub fn with_numbers(mut self, carrier_id: i64, numbers: impl Into<String>) -> Self {
        self.carrier_numbers.insert(carrier_id, numbers.into());
        self
    }

    /// Agent-number tokens at one carrier, trimmed, placeholders removed.
    pub fn tokens_for(&self, carrier_id: i64) -> Vec<String> {
        self.carrier_numbers
            .get(&carrier_id)
            .map(|list| {
                split_number_list(list)
                    .into_iter()
                    .filter(|token| token != UNMAPPED_TOKEN)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub pension: f64,
    pub risk: f64,
    pub financial: f64,
    pub pension_transfer: f64,
}

impl CategoryTotals {
    pub fn add(&mut self, category: Category, amount: f64) {
        *self.slot_mut(category) += amount;
    }

    pub fn get(&self, category: Category) -> f64 {
        match category {
            Category::Pension => self.pension,
            Category::Risk => self.risk,
            Category::Financial => self.financial,
            Category::PensionTransfer => self.pension_transfer,
        }
    }

    fn slot_mut(&mut self, category: Category) -> &mut f64 {
        match category {
            Category::Pension => &mut self.pension,
            Category::Risk => &mut self.risk,
            Category::Financial => &mut self.financial,
            Category::PensionTransfer => &mut self.pension_transfer,
        }
    }

    pub fn merge(&mut self, other: &CategoryTotals) {
        for category in Category::ALL {
            self.add(category, other.get(category));
        }
    }

    pub fn subtract(&mut self, other: &CategoryTotals) {
        for category in Category::ALL {
            self.add(category, -other.get(category));
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PremiumTotals {
    pub current_premium: f64,
    pub previous_premium: f64,
    pub change_pct: Option<f64>,
}

impl PremiumTotals {
    pub fn add(&mut self, current: f64, previous: f64) {
        self.current_premium += current;
        self.previous_premium += previous;
        self.recompute_change();
    }

    pub fn recompute_change(&mut self) {
        self.change_pct = derive_change_pct(Some(self.current_premium), Some(self.previous_premium));
    }
}

/// Per-agent rollup: category totals for life carriers, premium figures for
/// elementary carriers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregateTotals {
    Categories(CategoryTotals),
    Premium(PremiumTotals),
}

impl AggregateTotals {
    pub fn empty_like(&self) -> Self {
        match self {
            Self::Categories(_) => Self::Categories(CategoryTotals::default()),
            Self::Premium(_) => Self::Premium(PremiumTotals::default()),
        }
    }

    pub fn merge(&mut self, other: &AggregateTotals) {
        match (self, other) {
            (Self::Categories(a), Self::Categories(b)) => a.merge(b),
            (Self::Premium(a), Self::Premium(b)) => a.add(b.current_premium, b.previous_premium),
            (mine, theirs) => {
                log::warn!("Cannot merge {:?} into {:?}; keeping the original", theirs, mine);
            }
        }
    }

    pub fn subtract(&mut self, other: &AggregateTotals) {
        match (self, other) {
            (Self::Categories(a), Self::Categories(b)) => a.subtract(b),
            (Self::Premium(a), Self::Premium(b)) => {
                a.add(-b.current_premium, -b.previous_premium)
            }
            (mine, theirs) => {
                log::warn!("Cannot subtract {:?} from {:?}; keeping the original", theirs, mine);
            }
        }
    }

    pub fn as_categories(&self) -> Option<&CategoryTotals> {
        match self {
            Self::Categories(c) => Some(c),
            Self::Premium(_) => None,
        }
    }

    pub fn as_premium(&self) -> Option<&PremiumTotals> {
        match self {
            Self::Premium(p) => Some(p),
            Self::Categories(_) => None,
        }
    }
}

/// One row of the aggregation store, unique per `(agent_id, carrier_id, period_month)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationRecord {
    pub agent_id: i64,
    pub carrier_id: i64,
    pub period_month: PeriodMonth,
    pub totals: AggregateTotals,
    /// Part of `totals` fed by year-to-date layouts, as a monthly figure.
    /// Later months of the year subtract it.
    #[serde(default)]
    pub cumulative_share: Option<AggregateTotals>,
}

impl AggregationRecord {
    pub fn new(agent_id: i64, carrier_id: i64, period_month: PeriodMonth, totals: AggregateTotals) -> Self {
        Self {
            agent_id,
            carrier_id,
            period_month,
            totals,
            cumulative_share: None,
        }
    }

    pub fn key(&self) -> (i64, i64, PeriodMonth) {
        (self.agent_id, self.carrier_id, self.period_month)
    }

    /// Adds another row of the same key into this one.
    pub fn absorb(&mut self, other: &AggregationRecord) {
        self.totals.merge(&other.totals);
        self.cumulative_share = match (self.cumulative_share, other.cumulative_share) {
            (Some(mut mine), Some(theirs)) => {
                mine.merge(&theirs);
                Some(mine)
            }
            (mine, theirs) => mine.or(theirs),
        };
    }
}
