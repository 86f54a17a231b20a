//! # pulse-core — Foundational Types for the Pulse Analysis Engine
//!
//! This crate is the leaf of the workspace. It defines the primitives every
//! other crate shares: the UTC range, typed machine identifiers, the clock
//! abstraction, and the engine configuration document.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype identifiers.** `MachineId`, `MachineModuleId`, `ReasonId` and
//!    `AssignmentId` cannot be confused with each other or with bare integers.
//!
//! 2. **Immutable ranges.** `UtcRange` validates `lower <= upper` at
//!    construction and never mutates in place; every derived range is a new
//!    value.
//!
//! 3. **Injected time.** Nothing in the engine reads the wall clock directly.
//!    Time flows through the `Clock` trait so passes are reproducible under
//!    `ManualClock`.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `pulse-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod temporal;

// Re-export primary types for ergonomic imports.
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::CoreError;
pub use identity::{AssignmentId, Machine, MachineFilter, MachineId, MachineModuleId, ReasonId};
pub use temporal::{format_instant, UtcRange};
