//! # Activity Pipeline
//!
//! Wires the per-machine pass:
//!
//! ```text
//! TestIsPauseRequested ─ yes ─▶ End
//!        │ no
//!        ▼
//! MachineStateTemplate ─▶ Extensions ──────────── max time ─▶ PendingModificationsNormal
//!                            │
//!                            ▼
//!            PendingModificationsSwitch (very low priority frequency)
//!               │ due                     │ otherwise
//!               ▼                         ▼
//!    PendingModificationsAll   PendingModificationsSwitch (low priority frequency)
//!                                 │ due                     │ otherwise
//!                                 ▼                         ▼
//!                     PendingModificationsLow   PendingModificationsNormal
//!               └────────────────────┬────────────────────────┘
//!                                    ▼
//!             TestIsCleanFlaggedModificationsRequired ─ no ─▶ End
//!                                    │ yes
//!                                    ▼
//!                        CleanFlaggedModifications ─▶ End
//! ```
//!
//! Pending-modification and clean states yield to `End` when the budget
//! runs out. The extension composite falls back to a normal-priority
//! modification run so high-priority modifications are never starved by
//! slow extensions.

use pulse_state::{StateMachine, StateMachineBuilder, StepOutcome};

use crate::context::MachineActivityAnalysis;
use crate::error::AnalysisError;

/// The per-machine pass state machine.
pub type ActivityPipeline = StateMachine<MachineActivityAnalysis, AnalysisError>;

fn completed(done: bool) -> StepOutcome {
    if done {
        StepOutcome::Success
    } else {
        StepOutcome::Failure
    }
}

/// Build the pass pipeline of `context`, including its extension
/// sub-states.
pub fn build_activity_pipeline(
    context: &MachineActivityAnalysis,
) -> Result<ActivityPipeline, AnalysisError> {
    let config = context.config();
    let normal = config.normal_modification_priority;
    let low = config.low_modification_priority;

    let mut b = StateMachineBuilder::new();
    let end = b.end("End");

    let clean = b.action(
        "CleanFlaggedModifications",
        |c: &mut MachineActivityAnalysis, budget| {
            c.clean_flagged_modifications(budget).map(completed)
        },
        end,
        end,
        Some(end),
    );
    let test_clean = b.condition(
        "TestIsCleanFlaggedModificationsRequired",
        |c: &MachineActivityAnalysis| c.is_clean_flagged_modifications_required(),
        clean,
        end,
    );

    let all = b.action(
        "PendingModificationsAll",
        |c: &mut MachineActivityAnalysis, budget| {
            c.run_pending_modifications_analysis(budget, 0, 0).map(completed)
        },
        test_clean,
        test_clean,
        Some(end),
    );
    let low_state = b.action(
        "PendingModificationsLow",
        move |c: &mut MachineActivityAnalysis, budget| {
            c.run_pending_modifications_analysis(budget, low, low).map(completed)
        },
        test_clean,
        test_clean,
        Some(end),
    );
    let normal_state = b.action(
        "PendingModificationsNormal",
        move |c: &mut MachineActivityAnalysis, budget| {
            c.run_pending_modifications_analysis(budget, normal, normal)
                .map(completed)
        },
        test_clean,
        test_clean,
        Some(end),
    );
    let low_or_normal = b.frequency(
        "PendingModificationsSwitch",
        config.low_priority_frequency(),
        low_state,
        normal_state,
    );
    let switch = b.frequency(
        "PendingModificationsSwitch",
        config.very_low_priority_frequency(),
        all,
        low_or_normal,
    );

    let extensions = b.multi(
        "Extensions",
        context.extension_states()?,
        switch,
        Some(normal_state),
    );
    let template = b.action(
        "MachineStateTemplate",
        |c: &mut MachineActivityAnalysis, budget| {
            c.manage_state_template_changes(budget).map(completed)
        },
        extensions,
        extensions,
        None,
    );
    let pause = b.condition(
        "TestIsPauseRequested",
        |c: &MachineActivityAnalysis| Ok(c.pause().is_pause_requested()),
        end,
        template,
    );

    Ok(b.build(pause)?)
}
