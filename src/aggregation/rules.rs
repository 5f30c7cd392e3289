use crate::records::{AggregateTotals, CategoryTotals, NormalizedRecord, PremiumTotals};
use crate::schema::Category;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `sum(columns) - sum(subtract)` over a record's numeric fields. Missing
/// fields count as zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Formula {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub subtract: Vec<String>,
}

impl Formula {
    pub fn sum<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            subtract: Vec::new(),
        }
    }

    pub fn minus<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.subtract.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn evaluate(&self, record: &NormalizedRecord) -> f64 {
        let value = |field: &String| record.number(field).unwrap_or(0.0);
        self.columns.iter().map(value).sum::<f64>() - self.subtract.iter().map(value).sum::<f64>()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct StatusFilter {
    pub field: String,
    pub equals: String,
}

/// Formula set applied to records carrying `marker_field`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct SheetFormulas {
    pub name: String,
    pub marker_field: String,
    pub formulas: BTreeMap<Category, Formula>,
}

/// How a carrier's records turn into per-agent totals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregationRule {
    #[schemars(description = "One amount field always maps to one category.")]
    Simple {
        amount_field: String,
        category: Category,
    },

    #[schemars(
        description = "A product field selects the category through a lookup table. Unknown or excluded products and zero amounts are dropped."
    )]
    FilterByProduct {
        product_field: String,
        amount_field: String,
        categories: BTreeMap<String, Category>,
        #[serde(default)]
        exclude_products: Vec<String>,
    },

    #[schemars(description = "Each category is a sum of amount fields, optionally after a status filter.")]
    ColumnBased {
        formulas: BTreeMap<Category, Formula>,
        #[serde(default)]
        status_filter: Option<StatusFilter>,
    },

    #[schemars(description = "Each category is a base field minus component fields.")]
    ColumnBasedWithSubtraction {
        formulas: BTreeMap<Category, Formula>,
    },

    #[schemars(
        description = "Records from several source sheets share one table; the first sheet whose marker field is present supplies the formulas."
    )]
    MultiSheetFormulas { sheets: Vec<SheetFormulas> },

    #[schemars(description = "Records already carry their category; current_amount is summed into it.")]
    PolicyLevel,

    #[schemars(description = "Current and previous premium sums with change % recomputed on the rollup.")]
    Premium,
}

/// Umbrella agent whose totals are reduced by named sub-agents' totals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct UmbrellaAdjustment {
    #[schemars(description = "Substring of the umbrella agent's registry name.")]
    pub umbrella_name_contains: String,
    #[schemars(description = "Substrings of the sub-agents' registry names.")]
    pub subtract_agents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct AggregationProfile {
    pub rule: AggregationRule,

    #[serde(default)]
    #[schemars(description = "Feed is year-to-date; prior months of the year are subtracted.")]
    pub cumulative: bool,

    #[serde(default)]
    #[schemars(description = "Agents whose name contains one of these are neither counted nor written.")]
    pub exclude_agents: Vec<String>,

    #[serde(default)]
    pub umbrella: Option<UmbrellaAdjustment>,
}

impl Default for AggregationProfile {
    fn default() -> Self {
        Self::new(AggregationRule::Premium)
    }
}

impl AggregationProfile {
    pub fn new(rule: AggregationRule) -> Self {
        Self {
            rule,
            cumulative: false,
            exclude_agents: Vec::new(),
            umbrella: None,
        }
    }

    pub fn is_premium(&self) -> bool {
        matches!(self.rule, AggregationRule::Premium)
    }

    /// Zero totals of the shape this profile produces.
    pub fn empty_totals(&self) -> AggregateTotals {
        if self.is_premium() {
            AggregateTotals::Premium(PremiumTotals::default())
        } else {
            AggregateTotals::Categories(CategoryTotals::default())
        }
    }

    pub fn excludes_agent(&self, name: Option<&str>) -> bool {
        name.is_some_and(|n| self.exclude_agents.iter().any(|ex| n.contains(ex.as_str())))
    }

    /// Contribution of one record, `None` when the rule drops it.
    pub fn classify(&self, record: &NormalizedRecord) -> Option<AggregateTotals> {
        if self.excludes_agent(record.agent_name.as_deref()) {
            return None;
        }

        if self.is_premium() {
            let mut totals = PremiumTotals::default();
            totals.add(
                record.current_amount.unwrap_or(0.0),
                record.previous_amount.unwrap_or(0.0),
            );
            return Some(AggregateTotals::Premium(totals));
        }

        let mut totals = CategoryTotals::default();

        if let Some(category) = record.category {
            totals.add(category, record.current_amount.unwrap_or(0.0));
            return Some(AggregateTotals::Categories(totals));
        }

        match &self.rule {
            AggregationRule::Simple {
                amount_field,
                category,
            } => {
                totals.add(*category, record.number(amount_field).unwrap_or(0.0));
            }
            AggregationRule::FilterByProduct {
                product_field,
                amount_field,
                categories,
                exclude_products,
            } => {
                let amount = record.number(amount_field).unwrap_or(0.0);
                if amount == 0.0 {
                    return None;
                }
                let product = record.text(product_field)?;
                if exclude_products.iter().any(|p| p == &product) {
                    return None;
                }
                totals.add(*categories.get(&product)?, amount);
            }
            AggregationRule::ColumnBased {
                formulas,
                status_filter,
            } => {
                if let Some(filter) = status_filter {
                    if record.text(&filter.field).as_deref() != Some(filter.equals.as_str()) {
                        return None;
                    }
                }
                apply_formulas(formulas, record, &mut totals);
            }
            AggregationRule::ColumnBasedWithSubtraction { formulas } => {
                apply_formulas(formulas, record, &mut totals);
            }
            AggregationRule::MultiSheetFormulas { sheets } => {
                let Some(sheet) = sheets.iter().find(|s| record.has_field(&s.marker_field)) else {
                    debug!(
                        "Could not determine source sheet for record of agent {:?} (row {})",
                        record.agent_number, record.source_row
                    );
                    return None;
                };
                apply_formulas(&sheet.formulas, record, &mut totals);
            }
            AggregationRule::PolicyLevel => {
                debug!(
                    "Policy-level record without category for agent {:?} (row {})",
                    record.agent_number, record.source_row
                );
                return None;
            }
            // returned early above
            AggregationRule::Premium => {}
        }

        Some(AggregateTotals::Categories(totals))
    }
}

fn apply_formulas(
    formulas: &BTreeMap<Category, Formula>,
    record: &NormalizedRecord,
    totals: &mut CategoryTotals,
) {
    for (category, formula) in formulas {
        totals.add(*category, formula.evaluate(record));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::PeriodMonth;
    use serde_json::Value;

    fn record(amount: f64, extras: &[(&str, Value)]) -> NormalizedRecord {
        NormalizedRecord {
            carrier_id: 1,
            period_month: PeriodMonth::parse("2025-05").unwrap(),
            agent_number: Some("111".to_string()),
            agent_name: Some("דני כהן".to_string()),
            current_amount: Some(amount),
            previous_amount: None,
            change_pct: None,
            category: None,
            source_row: 2,
            layout_id: None,
            extras: extras
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    fn product_rule() -> AggregationProfile {
        let mut categories = BTreeMap::new();
        categories.insert("ריסק".to_string(), Category::Risk);
        categories.insert("גמל".to_string(), Category::Financial);
        AggregationProfile::new(AggregationRule::FilterByProduct {
            product_field: "product".to_string(),
            amount_field: "current_amount".to_string(),
            categories,
            exclude_products: vec!["בסיס מדידה".to_string()],
        })
    }

    #[test]
    fn test_filter_by_product_classifies() {
        let profile = product_rule();
        let totals = profile
            .classify(&record(200.0, &[("product", Value::from("גמל"))]))
            .unwrap();
        assert_eq!(totals.as_categories().unwrap().financial, 200.0);
    }

    #[test]
    fn test_filter_by_product_drops_unknown_excluded_and_zero() {
        let profile = product_rule();
        assert!(profile
            .classify(&record(200.0, &[("product", Value::from("לא ידוע"))]))
            .is_none());
        assert!(profile
            .classify(&record(200.0, &[("product", Value::from("בסיס מדידה"))]))
            .is_none());
        assert!(profile
            .classify(&record(0.0, &[("product", Value::from("ריסק"))]))
            .is_none());
    }

    #[test]
    fn test_excluded_agent_names_dropped() {
        let mut profile = product_rule();
        profile.exclude_agents = vec!["כהן".to_string()];
        assert!(profile
            .classify(&record(200.0, &[("product", Value::from("ריסק"))]))
            .is_none());
    }

    #[test]
    fn test_column_based_with_status_filter() {
        let mut formulas = BTreeMap::new();
        formulas.insert(Category::Risk, Formula::sum(["health_business", "risk_business"]));
        let profile = AggregationProfile::new(AggregationRule::ColumnBased {
            formulas,
            status_filter: Some(StatusFilter {
                field: "status".to_string(),
                equals: "פעיל".to_string(),
            }),
        });
        let active = record(
            0.0,
            &[
                ("health_business", Value::from(10.0)),
                ("risk_business", Value::from(5.0)),
                ("status", Value::from("פעיל")),
            ],
        );
        let cancelled = record(0.0, &[("health_business", Value::from(10.0)), ("status", Value::from("מבוטל"))]);
        assert_eq!(profile.classify(&active).unwrap().as_categories().unwrap().risk, 15.0);
        assert!(profile.classify(&cancelled).is_none());
    }

    #[test]
    fn test_subtraction_formula() {
        let mut formulas = BTreeMap::new();
        formulas.insert(Category::Pension, Formula::sum(["total_pension"]).minus(["pension_transfer"]));
        let profile = AggregationProfile::new(AggregationRule::ColumnBasedWithSubtraction { formulas });
        let r = record(
            0.0,
            &[("total_pension", Value::from(900.0)), ("pension_transfer", Value::from(400.0))],
        );
        assert_eq!(profile.classify(&r).unwrap().as_categories().unwrap().pension, 500.0);
    }

    #[test]
    fn test_multi_sheet_marker_selects_formulas() {
        let mut gemel = BTreeMap::new();
        gemel.insert(Category::Financial, Formula::sum(["one_time_premium", "cancellations_year_a"]));
        let mut pension = BTreeMap::new();
        pension.insert(Category::Pension, Formula::sum(["gross_annual_premium"]));
        let profile = AggregationProfile::new(AggregationRule::MultiSheetFormulas {
            sheets: vec![
                SheetFormulas {
                    name: "gemel".to_string(),
                    marker_field: "one_time_premium".to_string(),
                    formulas: gemel,
                },
                SheetFormulas {
                    name: "pension".to_string(),
                    marker_field: "gross_annual_premium".to_string(),
                    formulas: pension,
                },
            ],
        });

        let gemel_row = record(
            0.0,
            &[("one_time_premium", Value::from(100.0)), ("cancellations_year_a", Value::from(-20.0))],
        );
        let pension_row = record(0.0, &[("gross_annual_premium", Value::from(50.0))]);
        let unknown_row = record(0.0, &[]);

        assert_eq!(profile.classify(&gemel_row).unwrap().as_categories().unwrap().financial, 80.0);
        assert_eq!(profile.classify(&pension_row).unwrap().as_categories().unwrap().pension, 50.0);
        assert!(profile.classify(&unknown_row).is_none());
    }

    #[test]
    fn test_categorized_record_summed_directly() {
        let profile = AggregationProfile::new(AggregationRule::PolicyLevel);
        let mut r = record(75.0, &[]);
        assert!(profile.classify(&r).is_none());
        r.category = Some(Category::PensionTransfer);
        assert_eq!(
            profile.classify(&r).unwrap().as_categories().unwrap().pension_transfer,
            75.0
        );
    }

    #[test]
    fn test_premium_rule_sums_both_amounts() {
        let profile = AggregationProfile::default();
        let mut r = record(150.0, &[]);
        r.previous_amount = Some(100.0);
        let totals = profile.classify(&r).unwrap();
        let premium = totals.as_premium().unwrap();
        assert_eq!(premium.current_premium, 150.0);
        assert_eq!(premium.previous_premium, 100.0);
    }

    #[test]
    fn test_profile_json_roundtrip_shape() {
        let json = r#"{
            "rule": {"type": "SIMPLE", "amount_field": "current_amount", "category": "RISK"},
            "exclude_agents": ["אורלי יונאי"]
        }"#;
        let profile: AggregationProfile = serde_json::from_str(json).unwrap();
        assert!(!profile.cumulative);
        assert!(matches!(
            profile.rule,
            AggregationRule::Simple {
                category: Category::Risk,
                ..
            }
        ));
    }
}
