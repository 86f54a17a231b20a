//! # pulse-analysis — Machine Activity Analysis
//!
//! Everything that happens to one machine during an analysis pass, and the
//! scheduler that drives passes over many machines.
//!
//! ## Modules
//!
//! - **Context** (`context.rs`): `MachineActivityAnalysis`, the per-machine
//!   session with the fixed analysis phases, and the `ExtensionRegistry`
//!   seam through which extensions contribute sub-states.
//!
//! - **Pipeline** (`pipeline.rs`): wiring of the pass state machine: pause
//!   check, state templates, extensions, pending modifications at a
//!   frequency-dependent priority, flagged-modification cleanup.
//!
//! - **Services** (`services.rs`): the modification queue and state
//!   templates behind the fixed phases.
//!
//! - **Pause** (`pause.rs`): single-holder pause requests.
//!
//! - **Scheduler** (`scheduler.rs`): bounded-parallel rounds over all
//!   machines.
//!
//! ## Crate Policy
//!
//! - A pass never blocks on another machine. Failures are reported per
//!   machine and retried on the next round.
//! - Phase durations come from `EngineConfig`; nothing here reads the wall
//!   clock directly.

pub mod context;
pub mod error;
pub mod pause;
pub mod pipeline;
pub mod scheduler;
pub mod services;

pub use context::{ExtensionRegistry, ExtensionState, MachineActivityAnalysis};
pub use error::AnalysisError;
pub use pause::PauseHandle;
pub use pipeline::{build_activity_pipeline, ActivityPipeline};
pub use scheduler::{RoundReport, Scheduler};
pub use services::{AnalysisServices, InMemoryServices, Modification, ModificationStatus};
