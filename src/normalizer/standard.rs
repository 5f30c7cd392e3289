//! STANDARD mode: one record per eligible row.

use super::context::SheetContext;
use super::{skip_reason, Collector};
use crate::cell::RowRef;
use crate::error::RowParseError;
use crate::records::NormalizedRecord;

pub(super) fn scan<'r>(
    ctx: &SheetContext,
    rows: impl Iterator<Item = RowRef<'r>>,
    out: &mut Collector,
) {
    for row in rows {
        if row.is_blank() {
            continue;
        }
        out.scanned();

        if ctx.is_stop_row(&row) {
            out.stop(&row);
            break;
        }
        if let Some(reason) = skip_reason(ctx, &row) {
            out.skip(&row, reason);
            continue;
        }

        match record_for(ctx, &row) {
            Ok(Some(record)) => out.push(record),
            Ok(None) => out.skip(&row, "no agent"),
            Err(e) => out.error(e),
        }
    }
}

fn record_for(ctx: &SheetContext, row: &RowRef) -> Result<Option<NormalizedRecord>, RowParseError> {
    let agent = ctx.agent_identity(row)?;
    if agent.is_empty() {
        return Ok(None);
    }

    let current = ctx.current_amount(row)?;
    let previous = ctx.previous_amount(row)?;
    let change = ctx.change_pct(row, current, previous)?;

    Ok(Some(ctx.record(
        row.number,
        agent,
        current,
        previous,
        change,
        ctx.category(row),
        ctx.extras(row),
    )))
}

#[cfg(test)]
mod tests {
    use super::super::normalize;
    use super::super::test_support::{n, sheet, t};
    use crate::cell::{CellValue, RawSheet};
    use crate::schema::{
        AgentParseRule, Addressing, Category, CellPredicate, ColumnSelector, ExtraColumn,
        ExtraKind, FieldMap, FixedAgent, MappingDescriptor, NameCleanup, ParseMode, TextTest,
    };
    use crate::utils::PeriodMonth;
    use chrono::NaiveDate;

    fn month() -> PeriodMonth {
        PeriodMonth::parse("2025-05").unwrap()
    }

    fn harel_like() -> MappingDescriptor {
        let mut d = MappingDescriptor::new(
            "main",
            Addressing::ByName,
            ParseMode::Standard,
            1,
            2,
            FieldMap {
                agent_string: Some(ColumnSelector::name("__EMPTY")),
                current_amount: Some(ColumnSelector::name("סיכוני פרט")),
                ..Default::default()
            },
        );
        d.agent_parse = AgentParseRule::SplitLast {
            delimiter: "-".to_string(),
        };
        d.row_rules.skip_keywords = vec!["סה\"כ".to_string()];
        d
    }

    #[test]
    fn test_trailing_number_split_and_amount_coercion() {
        let data = sheet(
            &["", "סיכוני פרט"],
            vec![vec![t("Name - 85646"), t("1,200.50")]],
        );
        let outcome = normalize(&data, &harel_like(), 6, month()).unwrap();

        assert!(outcome.success);
        let record = &outcome.records[0];
        assert_eq!(record.agent_number.as_deref(), Some("85646"));
        assert_eq!(record.agent_name.as_deref(), Some("Name"));
        assert_eq!(record.current_amount, Some(1200.50));
        assert_eq!(record.source_row, 2);
    }

    #[test]
    fn test_total_and_header_text_rows_skipped() {
        let data = sheet(
            &["", "סיכוני פרט"],
            vec![
                vec![t("Name - 1"), n(10.0)],
                vec![t("סה\"כ"), n(10.0)],
                vec![t("Other - 2"), t("נטו")],
                vec![CellValue::Empty, CellValue::Empty],
                vec![t("Last - 3"), n(5.0)],
            ],
        );
        let outcome = normalize(&data, &harel_like(), 6, month()).unwrap();

        let numbers: Vec<_> = outcome
            .records
            .iter()
            .map(|r| r.agent_number.clone().unwrap())
            .collect();
        assert_eq!(numbers, vec!["1", "3"]);
        assert_eq!(outcome.stats.rows_skipped, 2);
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn test_stop_keyword_ends_scan() {
        let mut d = MappingDescriptor::new(
            "sales",
            Addressing::ByIndex,
            ParseMode::Standard,
            1,
            2,
            FieldMap {
                agent_string: Some(ColumnSelector::index(0)),
                previous_amount: Some(ColumnSelector::index(1)),
                current_amount: Some(ColumnSelector::index(2)),
                change_pct: Some(ColumnSelector::index(3)),
                ..Default::default()
            },
        );
        d.row_rules.stop_keywords = vec!["המשתמש המייצא".to_string()];

        let data = sheet(
            &["סוכן א'", "אשתקד", "השנה", "אחוז גידול"],
            vec![
                vec![t("224350 - אבי"), n(100.0), n(150.0), n(0.5)],
                vec![t("המשתמש המייצא: x")],
                vec![t("999 - late"), n(1.0), n(2.0), n(1.0)],
            ],
        );
        let outcome = normalize(&data, &d, 101, month()).unwrap();

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].change_pct, Some(0.5));
        assert_eq!(outcome.stats.stopped_at_row, Some(3));
    }

    #[test]
    fn test_separate_columns_with_clean_name_and_extras() {
        let mut d = MappingDescriptor::new(
            "main",
            Addressing::ByName,
            ParseMode::Standard,
            1,
            2,
            FieldMap {
                agent_number: Some(ColumnSelector::name("מספר סוכן")),
                agent_name: Some(ColumnSelector::name("שם סוכן")),
                current_amount: Some(ColumnSelector::name("פרמיה")),
                ..Default::default()
            },
        );
        d.name_cleanup = NameCleanup::Clean;
        d.extra_columns = vec![
            ExtraColumn::new("product", ColumnSelector::name("מוצר"), ExtraKind::Text),
            ExtraColumn::new("join_date", ColumnSelector::name("תאריך"), ExtraKind::Date),
        ];

        let data = sheet(
            &["מספר סוכן", "שם סוכן", "פרמיה", "מוצר", "תאריך"],
            vec![
                vec![
                    n(11.0),
                    t("70504-(2020)ישראל ישראלי"),
                    n(300.0),
                    t("ריסק"),
                    t("14/5/2025"),
                ],
                vec![
                    n(12.0),
                    t("רונית לוי"),
                    n(50.0),
                    CellValue::Empty,
                    CellValue::Date(NaiveDate::from_ymd_opt(2025, 5, 2).unwrap()),
                ],
            ],
        );
        let outcome = normalize(&data, &d, 1, month()).unwrap();

        let first = &outcome.records[0];
        assert_eq!(first.agent_number.as_deref(), Some("70504"));
        assert_eq!(first.agent_name.as_deref(), Some("ישראל ישראלי"));
        assert_eq!(first.text("product").as_deref(), Some("ריסק"));
        assert_eq!(first.text("join_date").as_deref(), Some("2025-05-14"));

        let second = &outcome.records[1];
        assert_eq!(second.agent_number.as_deref(), Some("12"));
        assert!(!second.has_field("product"));
        assert_eq!(second.text("join_date").as_deref(), Some("2025-05-02"));
    }

    #[test]
    fn test_fixed_agent_and_zero_amount_rule() {
        let mut d = MappingDescriptor::new(
            "single",
            Addressing::ByIndex,
            ParseMode::Standard,
            1,
            2,
            FieldMap {
                current_amount: Some(ColumnSelector::index(1)),
                ..Default::default()
            },
        );
        d.fixed_agent = Some(FixedAgent {
            number: "438".to_string(),
            name: Some("גל אלמגור-סוכנים".to_string()),
        });
        d.row_rules.skip_zero_amount = true;

        let data = sheet(
            &["פוליסה", "פרמיה ברוטו"],
            vec![vec![t("a"), n(0.0)], vec![t("b"), n(80.0)]],
        );
        let outcome = normalize(&data, &d, 123, month()).unwrap();

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].agent_number.as_deref(), Some("438"));
        assert_eq!(outcome.records[0].current_amount, Some(80.0));
    }

    #[test]
    fn test_non_numeric_amount_is_row_error_when_sanity_off() {
        let mut d = harel_like();
        d.row_rules.numeric_sanity = false;
        d.fixed_category = Some(Category::Risk);
        let data = sheet(
            &["", "סיכוני פרט"],
            vec![vec![t("A - 1"), t("abc")], vec![t("B - 2"), n(4.0)]],
        );
        let outcome = normalize(&data, &d, 6, month()).unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].category, Some(Category::Risk));
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with("Row 2:"));
    }

    #[test]
    fn test_skip_predicate_and_month_filter() {
        let mut d = MappingDescriptor::new(
            "tab",
            Addressing::ByName,
            ParseMode::Standard,
            1,
            2,
            FieldMap {
                agent_number: Some(ColumnSelector::name("רישיון סוכן")),
                current_amount: Some(ColumnSelector::name("סכום")),
                ..Default::default()
            },
        );
        d.month_filter_column = Some(ColumnSelector::name("חודש"));
        d.row_rules.skip_when = vec![CellPredicate::new(
            ColumnSelector::name("רישיון סוכן"),
            TextTest::Equals("-".to_string()),
        )];

        let data = sheet(
            &["רישיון סוכן", "חודש", "סכום"],
            vec![
                vec![n(1.0), n(5.0), n(10.0)],
                vec![n(2.0), n(4.0), n(20.0)],
                vec![t("-"), n(5.0), n(30.0)],
            ],
        );
        let outcome = normalize(&data, &d, 2, month()).unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].agent_number.as_deref(), Some("1"));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let data: RawSheet = sheet(
            &["", "סיכוני פרט"],
            vec![vec![t("A - 1"), n(1.0)], vec![t("B - 2"), n(2.0)]],
        );
        let first = normalize(&data, &harel_like(), 6, month()).unwrap();
        let second = normalize(&data, &harel_like(), 6, month()).unwrap();
        assert_eq!(first.records, second.records);
    }
}
