//! POLICY_LEVEL mode: one record per transaction row, summed per agent later.

use super::context::SheetContext;
use super::{skip_reason, Collector};
use crate::cell::RowRef;

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

        let agent = match ctx.agent_identity(&row) {
            Ok(agent) if agent.number.is_some() => agent,
            Ok(_) => {
                out.skip(&row, "no agent number");
                continue;
            }
            Err(e) => {
                out.error(e);
                continue;
            }
        };

        let current = match ctx.current_amount(&row) {
            Ok(current) => current,
            Err(e) => {
                out.error(e);
                continue;
            }
        };

        out.push(ctx.record(
            row.number,
            agent,
            current,
            None,
            None,
            ctx.category(&row),
            ctx.extras(&row),
        ));
    }
}
