//! # Built-in Rules
//!
//! - **CycleEnd**: at every cycle end after the checkpoint, apply the
//!   reason from the end onwards. The dynamic end then fixes when the
//!   machine resumed. Tracked per machine, or per module with
//!   `per_module`.
//! - **LongIdle**: apply the reason over every non-active period lasting at
//!   least `min_duration_secs`. A period still open is applied once it is
//!   long enough, up to `+oo`.

use pulse_core::UtcRange;

use crate::checkpoint::CheckContext;
use crate::error::AutoReasonError;
use crate::extension::AutoReasonRule;

pub const CYCLE_END_PLUGIN: &str = "CycleEnd";
pub const LONG_IDLE_PLUGIN: &str = "LongIdle";

/// Reason after each cycle end.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleEndRule;

impl AutoReasonRule for CycleEndRule {
    fn plugin_key(&self) -> &str {
        CYCLE_END_PLUGIN
    }

    fn check(&self, cx: &mut CheckContext<'_>) -> Result<(), AutoReasonError> {
        let machine = cx.machine();
        let tx = cx.transaction();
        if cx.config().per_module {
            for &module in &machine.modules {
                let after = cx.module_checkpoint(module);
                if let Some(cycle) = tx.next_cycle_end_after(machine.id, Some(module), after)? {
                    cx.apply_reason(UtcRange::since(cycle.end), None);
                    cx.go_on_module(module, cycle.end);
                }
            }
        } else if let Some(cycle) = tx.next_cycle_end_after(machine.id, None, cx.checkpoint())? {
            cx.apply_reason(UtcRange::since(cycle.end), None);
            cx.go_on(cycle.end);
        }
        Ok(())
    }
}

/// Reason over long non-active periods.
#[derive(Debug, Default, Clone, Copy)]
pub struct LongIdleRule;

impl AutoReasonRule for LongIdleRule {
    fn plugin_key(&self) -> &str {
        LONG_IDLE_PLUGIN
    }

    fn check(&self, cx: &mut CheckContext<'_>) -> Result<(), AutoReasonError> {
        let machine = cx.machine().id;
        let tx = cx.transaction();
        let min_duration = cx.config().min_duration();
        let start = cx.checkpoint();
        let mut cursor = start;

        while let Some(fact) = tx.next_fact_after(machine, cursor)? {
            let Some(begin) = fact.range.lower() else {
                break;
            };
            if fact.mode.is_active() {
                cursor = begin;
                continue;
            }
            match fact.range.upper() {
                Some(end) => {
                    if end - begin >= min_duration {
                        cx.apply_reason(UtcRange::between(begin, end)?, None);
                    }
                    cx.go_on(begin);
                    return Ok(());
                }
                None if cx.now() - begin >= min_duration => {
                    cx.apply_reason(UtcRange::since(begin), None);
                    cx.go_on(begin);
                    return Ok(());
                }
                // Still open and short: wait until it grows.
                None => break,
            }
        }
        if cursor > start {
            cx.go_on(cursor);
        }
        Ok(())
    }
}
