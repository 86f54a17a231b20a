//! # pulse-autoreason — Automatic Reason Assignment
//!
//! Extensions that detect periods on a machine (a cycle end, a long idle
//! period) and assign a reason to them, resuming from a persisted
//! checkpoint on every pass.
//!
//! ## Modules
//!
//! - **Extension** (`extension.rs`): the checkpoint/retry engine of one
//!   rule instance on one machine. Initialization, one run per
//!   transaction, the consistency audit and explicit checkpoint updates.
//!
//! - **Checkpoint** (`checkpoint.rs`): `CheckContext`, the view a rule gets
//!   during a check, and the strictly monotonic `go_on` step.
//!
//! - **Action** (`action.rs`): delayed actions executed in the run's
//!   transaction. Reason application with dynamic end resolution, and
//!   checkpoint updates.
//!
//! - **Dynamic Time** (`dynamic_time.rs`): the response contract of
//!   dynamic-time selectors and a scripted resolver.
//!
//! - **Config** (`config.rs`): per-instance configuration, audit policy and
//!   the YAML configuration provider.
//!
//! - **Rules** (`rules.rs`): the built-in `CycleEnd` and `LongIdle` rules.
//!
//! - **Registry** (`registry.rs`): plugs initialized extensions into a
//!   machine's extension composite.
//!
//! ## Crate Policy
//!
//! - A run is all-or-nothing. Assignments and the checkpoint move in the
//!   same transaction.
//! - A postponed run leaves the checkpoint where it was, so the same
//!   boundary is retried on the next pass.
//! - Re-applying a range that is already assigned is a no-op unless the
//!   instance requires overwriting.

pub mod action;
pub mod checkpoint;
pub mod config;
pub mod dynamic_time;
pub mod error;
pub mod extension;
pub mod registry;
pub mod rules;

pub use action::{ActionEnv, ActionOutcome, ApplyReasonAction, DelayedAction, UpdateDateTimeAction};
pub use checkpoint::{next_checkpoint, CheckContext, CheckResult};
pub use config::{
    AuditPolicy, AutoReasonConfig, ConfigError, ConfigurationProvider, YamlConfigurationProvider,
};
pub use dynamic_time::{
    DynamicTimeResolver, DynamicTimeResponse, ResolveError, ScriptedAnswer, ScriptedResolver,
};
pub use error::AutoReasonError;
pub use extension::{
    AutoReasonDefinition, AutoReasonExtension, AutoReasonRule, ExtensionEnv, ExtensionPhase,
};
pub use registry::AutoReasonRegistry;
pub use rules::{CycleEndRule, LongIdleRule, CYCLE_END_PLUGIN, LONG_IDLE_PLUGIN};
