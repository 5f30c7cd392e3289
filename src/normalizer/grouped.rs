//! AGENT_GROUPED mode.
//!
//! An agent header row opens a group, branch rows under it each become a
//! record carrying the header's identity, and a subtotal row closes the group.

use super::context::SheetContext;
use super::state::{GroupAction, GroupState, GroupedRow};
use super::{skip_reason, Collector};
use crate::cell::RowRef;
use crate::error::RowParseError;
use crate::records::NormalizedRecord;

fn has_branch(ctx: &SheetContext, row: &RowRef) -> bool {
    let branch = ctx.branch_cell(row);
    !branch.is_blank()
        && !ctx
            .descriptor
            .grouping
            .detail_excludes
            .iter()
            .any(|exclude| branch.contains(exclude))
}

fn classify(ctx: &SheetContext, row: &RowRef) -> GroupedRow {
    if ctx.is_stop_row(row) {
        return GroupedRow::Stop;
    }
    if ctx.is_skip_row(row) {
        return GroupedRow::Noise;
    }
    if ctx.is_subtotal_row(row) {
        return GroupedRow::Subtotal;
    }

    match ctx.agent_string_cell(row).render() {
        Some(token) => {
            let marked = ctx
                .descriptor
                .grouping
                .agent_marker
                .as_deref()
                .map_or(true, |marker| token.contains(marker));
            if marked {
                GroupedRow::AgentHeader {
                    token,
                    has_detail: has_branch(ctx, row),
                }
            } else {
                GroupedRow::Noise
            }
        }
        None if has_branch(ctx, row) => GroupedRow::Detail,
        None => GroupedRow::Noise,
    }
}

fn detail_record(
    ctx: &SheetContext,
    row: &RowRef,
    agent_token: &str,
) -> Result<NormalizedRecord, RowParseError> {
    let agent = ctx.parse_agent_token(agent_token);
    if agent.is_empty() {
        return Err(RowParseError::MalformedAgent {
            row: row.number,
            token: agent_token.to_string(),
        });
    }

    let current = ctx.current_amount(row)?;
    let previous = ctx.previous_amount(row)?;
    let change = ctx.change_pct(row, current, previous)?;

    Ok(ctx.record(
        row.number,
        agent,
        current,
        previous,
        change,
        ctx.category(row),
        ctx.extras(row),
    ))
}

pub(super) fn scan<'r>(
    ctx: &SheetContext,
    rows: impl Iterator<Item = RowRef<'r>>,
    out: &mut Collector,
) {
    let mut state = GroupState::default();

    for row in rows {
        if row.is_blank() {
            continue;
        }
        out.scanned();

        let kind = classify(ctx, &row);
        let is_subtotal = kind == GroupedRow::Subtotal;
        let (next, action) = state.step(kind);
        state = next;

        match action {
            GroupAction::Stop => {
                out.stop(&row);
                break;
            }
            GroupAction::Ignore if is_subtotal => out.skip(&row, "subtotal"),
            GroupAction::Ignore => {
                if state.pending_agent_token.is_none() {
                    out.skip(&row, "outside agent group");
                }
            }
            GroupAction::Orphan => out.error(RowParseError::OrphanDetailRow { row: row.number }),
            GroupAction::Emit { agent_token } => {
                if let Some(reason) = skip_reason(ctx, &row) {
                    out.skip(&row, reason);
                    continue;
                }
                match detail_record(ctx, &row, &agent_token) {
                    Ok(record) => out.push(record),
                    Err(e) => out.error(e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::normalize;
    use super::super::test_support::{n, sheet, t};
    use crate::cell::CellValue;
    use crate::schema::{
        Addressing, CellPredicate, ColumnSelector, FieldMap, MappingDescriptor, ParseMode,
        TextTest,
    };
    use crate::utils::PeriodMonth;

    fn month() -> PeriodMonth {
        PeriodMonth::parse("2025-07").unwrap()
    }

    fn grouped() -> MappingDescriptor {
        let mut d = MappingDescriptor::new(
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
        );
        d.row_rules.subtotal_when = vec![CellPredicate::new(
            ColumnSelector::index(1),
            TextTest::Contains("Total for".to_string()),
        )];
        d
    }

    #[test]
    fn test_branch_rows_inherit_header_identity() {
        let data = sheet(
            &["agent", "branch", "amount"],
            vec![
                vec![t("100 - Alice"), t("BranchA"), n(500.0)],
                vec![CellValue::Empty, t("BranchB"), n(300.0)],
                vec![CellValue::Empty, t("Total for Alice"), n(800.0)],
            ],
        );
        let outcome = normalize(&data, &grouped(), 113, month()).unwrap();

        assert_eq!(outcome.records.len(), 2);
        for (record, amount) in outcome.records.iter().zip([500.0, 300.0]) {
            assert_eq!(record.agent_number.as_deref(), Some("100"));
            assert_eq!(record.agent_name.as_deref(), Some("Alice"));
            assert_eq!(record.current_amount, Some(amount));
        }
        assert!(outcome.errors.is_empty());
    }

    #[test]
    fn test_header_only_row_opens_group() {
        let data = sheet(
            &["agent", "branch", "amount"],
            vec![
                vec![t("200 - Bob"), CellValue::Empty, CellValue::Empty],
                vec![CellValue::Empty, t("רכב"), n(40.0)],
                vec![CellValue::Empty, t("דירה"), n(60.0)],
                vec![CellValue::Empty, t("Total for Bob"), n(100.0)],
                vec![t("300 - Carol"), t("רכב"), n(7.0)],
            ],
        );
        let outcome = normalize(&data, &grouped(), 113, month()).unwrap();

        let summary: Vec<_> = outcome
            .records
            .iter()
            .map(|r| (r.agent_number.clone().unwrap(), r.current_amount.unwrap()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("200".to_string(), 40.0),
                ("200".to_string(), 60.0),
                ("300".to_string(), 7.0),
            ]
        );
    }

    #[test]
    fn test_detail_row_without_open_group_is_orphan() {
        let data = sheet(
            &["agent", "branch", "amount"],
            vec![
                vec![CellValue::Empty, t("רכב"), n(40.0)],
                vec![t("100 - Alice"), t("רכב"), n(5.0)],
                vec![CellValue::Empty, t("Total for Alice"), n(5.0)],
                vec![CellValue::Empty, t("דירה"), n(9.0)],
            ],
        );
        let outcome = normalize(&data, &grouped(), 113, month()).unwrap();

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.errors.len(), 2);
        assert!(outcome.errors[0].starts_with("Row 2:"));
        assert!(outcome.errors[1].starts_with("Row 5:"));
    }

    #[test]
    fn test_agent_marker_and_detail_excludes() {
        let mut d = grouped();
        d.grouping.agent_marker = Some(" - ".to_string());
        d.grouping.detail_excludes = vec!["סה\"כ".to_string()];
        d.row_rules.stop_keywords = vec!["סה\"כ כללי".to_string()];

        let data = sheet(
            &["agent", "branch", "amount"],
            vec![
                vec![t("דוח תפוקה"), CellValue::Empty, CellValue::Empty],
                vec![t("100 - Alice"), t("רכב"), n(5.0)],
                vec![CellValue::Empty, t("סה\"כ רכב"), n(5.0)],
                vec![CellValue::Empty, t("דירה"), t("ענף")],
                vec![t("סה\"כ כללי"), CellValue::Empty, n(5.0)],
                vec![t("900 - Late"), t("רכב"), n(1.0)],
            ],
        );
        let outcome = normalize(&data, &d, 113, month()).unwrap();

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].current_amount, Some(5.0));
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.stats.stopped_at_row, Some(6));
    }

    #[test]
    fn test_mixed_month_columns_with_derived_change() {
        let mut d = MappingDescriptor::new(
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
        d.derive_change = true;

        let data = sheet(
            &["סוכן", "ענף", "יולי 2024", "יולי 2025"],
            vec![
                vec![t("55 - דנה"), t("רכב"), n(100.0), n(150.0)],
                vec![CellValue::Empty, t("דירה"), n(0.0), n(20.0)],
            ],
        );
        let outcome = normalize(&data, &d, 113, month()).unwrap();

        assert_eq!(outcome.records[0].previous_amount, Some(100.0));
        assert_eq!(outcome.records[0].current_amount, Some(150.0));
        assert_eq!(outcome.records[0].change_pct, Some(0.5));
        assert_eq!(outcome.records[1].change_pct, Some(1.0));
    }
}
