//! # pulse-store — Persistence Contract
//!
//! The engine never talks to a database directly. It opens scoped
//! transactions through the [`Store`] trait and reads facts and cycles,
//! reads and writes checkpoints, and creates or overwrites reason
//! assignments through [`Transaction`].
//!
//! ## Modules
//!
//! - **Traits** (`traits.rs`): `Store` and `Transaction`.
//! - **Model** (`model.rs`): facts, cycles, reasons, reason assignments and
//!   checkpoint keys.
//! - **Memory** (`memory.rs`): `InMemoryStore`, a complete implementation
//!   with commit-failure injection.
//! - **Error** (`error.rs`): `StoreError` with transient classification.
//!
//! ## Crate Policy
//!
//! - Writes become visible only when `commit` returns `Ok`. Checkpoints and
//!   reason assignments written in the same transaction land together or
//!   not at all.

pub mod error;
pub mod memory;
pub mod model;
pub mod traits;

pub use error::StoreError;
pub use memory::{InMemoryStore, InMemoryTransaction};
pub use model::{CheckpointKey, Cycle, Fact, MachineMode, Reason, ReasonAssignment};
pub use traits::{Store, Transaction};
