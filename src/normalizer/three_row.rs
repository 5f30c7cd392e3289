//! THREE_ROW_GROUP mode.
//!
//! Each agent spans three rows: the agent token with last year's figure, this
//! year's figure, then a change row. The label cell carries the year marker.

use super::context::{AgentIdentity, SheetContext};
use super::state::{ThreeRowAction, ThreeRowKind, ThreeRowState};
use super::Collector;
use crate::cell::RowRef;
use crate::error::RowParseError;
use crate::utils::{parse_amount, HEBREW_MONTHS};

fn agent_token(ctx: &SheetContext, row: &RowRef) -> Option<String> {
    ctx.agent_string_cell(row)
        .render()
        .map(|token| token.replace('\u{00A0}', " ").trim().to_string())
        .filter(|token| !token.is_empty())
}

fn is_agent_token(ctx: &SheetContext, token: &str) -> bool {
    let rules = &ctx.descriptor.three_row;
    let marked =
        rules.agent_markers.is_empty() || rules.agent_markers.iter().any(|m| token.contains(m.as_str()));
    let month_label = rules.reject_month_names
        && token
            .split_whitespace()
            .any(|word| HEBREW_MONTHS.contains(&word));
    let excluded = rules.agent_excludes.iter().any(|e| token.contains(e.as_str()));
    marked && !month_label && !excluded
}

fn classify(ctx: &SheetContext, row: &RowRef) -> ThreeRowKind {
    let current_year = ctx.period_month.year().to_string();
    let previous_year = (ctx.period_month.year() - 1).to_string();
    let label = ctx.label_cell(row).to_string();

    if ctx.is_skip_row(row) {
        return ThreeRowKind::Noise;
    }

    match agent_token(ctx, row) {
        Some(token) if is_agent_token(ctx, &token) && label.contains(&previous_year) => {
            ThreeRowKind::AgentRow {
                token,
                previous: parse_amount(ctx.current_cell(row)),
            }
        }
        Some(_) => ThreeRowKind::Noise,
        None => {
            let change_label = ctx.descriptor.three_row.change_row_label.as_deref();
            if change_label.is_some_and(|l| label.contains(l)) {
                ThreeRowKind::ChangeRow
            } else if label.contains(&current_year) && !ctx.fails_numeric_sanity(row) {
                ThreeRowKind::CurrentRow
            } else {
                ThreeRowKind::Noise
            }
        }
    }
}

/// Splits on the first agent marker present in the token, falling back to the
/// layout's parse rule.
fn split_token(ctx: &SheetContext, token: &str) -> AgentIdentity {
    let split = ctx
        .descriptor
        .three_row
        .agent_markers
        .iter()
        .find_map(|marker| token.split_once(marker.as_str()));
    match split {
        Some((number, name)) => {
            let number = number.trim();
            let name = name.trim();
            AgentIdentity {
                number: (!number.is_empty()).then(|| number.to_string()),
                name: (!name.is_empty()).then(|| name.to_string()),
            }
        }
        None => ctx.parse_agent_token(token),
    }
}

pub(super) fn scan<'r>(
    ctx: &SheetContext,
    rows: impl Iterator<Item = RowRef<'r>>,
    out: &mut Collector,
) {
    let mut state = ThreeRowState::default();

    for row in rows {
        if row.is_blank() {
            continue;
        }
        out.scanned();

        if ctx.is_stop_row(&row) {
            out.stop(&row);
            break;
        }

        let kind = classify(ctx, &row);
        if kind == ThreeRowKind::Noise {
            out.skip(&row, "not part of an agent group");
        }
        let (next, action) = state.step(kind);
        state = next;

        match action {
            ThreeRowAction::Ignore => {}
            ThreeRowAction::Orphan => {
                out.error(RowParseError::OrphanCurrentPeriodRow { row: row.number })
            }
            ThreeRowAction::Emit {
                agent_token,
                previous,
            } => {
                let agent = split_token(ctx, &agent_token);
                if agent.is_empty() {
                    out.error(RowParseError::MalformedAgent {
                        row: row.number,
                        token: agent_token,
                    });
                    continue;
                }
                let amounts = ctx.current_amount(&row).and_then(|current| {
                    ctx.change_pct(&row, current, previous)
                        .map(|change| (current, change))
                });
                match amounts {
                    Ok((current, change)) => out.push(ctx.record(
                        row.number,
                        agent,
                        current,
                        previous,
                        change,
                        ctx.category(&row),
                        ctx.extras(&row),
                    )),
                    Err(e) => out.error(e),
                }
            }
        }
    }
}
