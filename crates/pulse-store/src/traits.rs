//! # Store Contract
//!
//! The engine consumes persistence as an opaque capability: it opens a
//! labelled transaction, reads and writes through it, then commits or
//! rolls back. Nothing written through a transaction is visible to other
//! transactions before `commit` returns `Ok`.
//!
//! Implementations must be `Send + Sync`. The scheduler shares one store
//! between machine passes that run in parallel.

use chrono::{DateTime, Utc};

use pulse_core::{MachineId, MachineModuleId, ReasonId, UtcRange};

use crate::error::StoreError;
use crate::model::{CheckpointKey, Cycle, Fact, Reason, ReasonAssignment};

/// A scoped unit of work.
pub trait Transaction {
    /// Label given at `begin`, used in logs and errors.
    fn label(&self) -> &str;

    /// First fact of `machine` whose lower bound is strictly after `after`.
    fn next_fact_after(
        &self,
        machine: MachineId,
        after: DateTime<Utc>,
    ) -> Result<Option<Fact>, StoreError>;

    /// Cycle with the earliest end strictly after `after`. `module = None`
    /// considers every cycle of the machine.
    fn next_cycle_end_after(
        &self,
        machine: MachineId,
        module: Option<MachineModuleId>,
        after: DateTime<Utc>,
    ) -> Result<Option<Cycle>, StoreError>;

    fn checkpoint(&self, key: &CheckpointKey) -> Result<Option<DateTime<Utc>>, StoreError>;

    fn save_checkpoint(&mut self, key: &CheckpointKey, at: DateTime<Utc>)
        -> Result<(), StoreError>;

    /// Assignment of `reason` on `machine` created for exactly
    /// `requested_range`.
    fn find_assignment(
        &self,
        machine: MachineId,
        reason: ReasonId,
        requested_range: &UtcRange,
    ) -> Result<Option<ReasonAssignment>, StoreError>;

    /// Assignments of `machine` created by the extension `origin`, ordered
    /// by requested lower bound.
    fn assignments_by_origin(
        &self,
        machine: MachineId,
        origin: &str,
    ) -> Result<Vec<ReasonAssignment>, StoreError>;

    fn insert_assignment(&mut self, assignment: ReasonAssignment) -> Result<(), StoreError>;

    /// Replace the assignment with the same id.
    fn replace_assignment(&mut self, assignment: ReasonAssignment) -> Result<(), StoreError>;

    fn find_reason(&self, id: ReasonId) -> Result<Option<Reason>, StoreError>;

    fn find_reason_by_key(&self, translation_key: &str) -> Result<Option<Reason>, StoreError>;

    fn create_reason(&mut self, translation_key: &str) -> Result<Reason, StoreError>;

    /// Make every write of this transaction visible atomically.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discard every write of this transaction.
    fn rollback(self: Box<Self>);
}

/// Factory of transactions.
pub trait Store: Send + Sync + std::fmt::Debug {
    fn begin(&self, label: &str) -> Result<Box<dyn Transaction + '_>, StoreError>;
}

