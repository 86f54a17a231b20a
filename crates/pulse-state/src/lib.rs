//! # pulse-state — Cooperative Analysis State Machine
//!
//! A generic, time-budgeted state machine that drives one analysis pass
//! over a mutable context. The machine is built once, then re-entered from
//! its initial state on every pass.
//!
//! ## Modules
//!
//! - **Machine** (`machine.rs`): arena of action, condition, composite,
//!   frequency and terminal states, with the builder that freezes wiring
//!   and the `run` loop.
//!
//! - **Budget** (`budget.rs`): the pass deadline and per-phase
//!   sub-deadlines, read through an injected clock.
//!
//! ## Design
//!
//! Fairness across machines comes from the budget, not from preemption.
//! When a state notices the budget is spent it takes its max-time edge, or
//! yields the pass when it has none. There is no mid-pipeline resume: the
//! next pass starts over, which keeps crash recovery trivial as long as the
//! states are idempotent.

pub mod budget;
pub mod machine;

pub use budget::Budget;
pub use machine::{
    sort_by_priority, ActionFn, ConditionFn, Edge, StateError, StateId, StateMachine,
    StateMachineBuilder, StepOutcome, SubState, TerminalSignal, TransitionRecord,
};
