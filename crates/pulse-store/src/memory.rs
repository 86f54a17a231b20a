//! # In-Memory Store
//!
//! A complete [`Store`] kept in process memory. Used by the scenario runner
//! and by every test in the workspace.
//!
//! Each transaction buffers its writes and applies them under the store
//! lock at commit, so a rolled-back or failed transaction leaves committed
//! state untouched. Reads see committed state overlaid with the
//! transaction's own pending writes.
//!
//! `fail_next_commit` injects one commit failure, to exercise rollback
//! paths.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use pulse_core::{AssignmentId, MachineId, MachineModuleId, ReasonId, UtcRange};

use crate::error::StoreError;
use crate::model::{CheckpointKey, Cycle, Fact, Reason, ReasonAssignment};
use crate::traits::{Store, Transaction};

#[derive(Debug, Default)]
struct Tables {
    /// Per machine, ordered by lower bound.
    facts: BTreeMap<MachineId, Vec<Fact>>,
    cycles: BTreeMap<MachineId, Vec<Cycle>>,
    checkpoints: HashMap<CheckpointKey, DateTime<Utc>>,
    assignments: Vec<ReasonAssignment>,
    reasons: BTreeMap<ReasonId, Reason>,
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    injected_failure: Mutex<Option<StoreError>>,
    commits: Mutex<u64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── seeding ──────────────────────────────────────────────────────

    /// Insert a fact, replacing any fact of the same machine starting at the
    /// same instant.
    pub fn upsert_fact(&self, fact: Fact) {
        let mut tables = self.tables.lock();
        let facts = tables.facts.entry(fact.machine).or_default();
        facts.retain(|f| f.range.lower() != fact.range.lower());
        facts.push(fact);
        facts.sort_by_key(|f| f.range.lower());
    }

    pub fn insert_cycle(&self, cycle: Cycle) {
        self.tables
            .lock()
            .cycles
            .entry(cycle.machine)
            .or_default()
            .push(cycle);
    }

    pub fn insert_reason(&self, reason: Reason) {
        self.tables.lock().reasons.insert(reason.id, reason);
    }

    /// Make the next commit fail with `error`.
    pub fn fail_next_commit(&self, error: StoreError) {
        *self.injected_failure.lock() = Some(error);
    }

    // ── inspection ───────────────────────────────────────────────────

    pub fn assignments(&self, machine: MachineId) -> Vec<ReasonAssignment> {
        self.tables
            .lock()
            .assignments
            .iter()
            .filter(|a| a.machine == machine)
            .cloned()
            .collect()
    }

    pub fn checkpoint(&self, key: &CheckpointKey) -> Option<DateTime<Utc>> {
        self.tables.lock().checkpoints.get(key).copied()
    }

    pub fn reasons(&self) -> Vec<Reason> {
        self.tables.lock().reasons.values().cloned().collect()
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> u64 {
        *self.commits.lock()
    }
}

impl Store for InMemoryStore {
    fn begin(&self, label: &str) -> Result<Box<dyn Transaction + '_>, StoreError> {
        tracing::trace!(label, "begin transaction");
        Ok(Box::new(InMemoryTransaction {
            store: self,
            label: label.to_string(),
            checkpoints: HashMap::new(),
            inserted: Vec::new(),
            replaced: HashMap::new(),
            new_reasons: Vec::new(),
        }))
    }
}

/// Transaction over an [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemoryTransaction<'a> {
    store: &'a InMemoryStore,
    label: String,
    checkpoints: HashMap<CheckpointKey, DateTime<Utc>>,
    inserted: Vec<ReasonAssignment>,
    replaced: HashMap<AssignmentId, ReasonAssignment>,
    new_reasons: Vec<Reason>,
}

impl InMemoryTransaction<'_> {
    /// Committed assignments of `machine` with this transaction's pending
    /// writes applied.
    fn visible_assignments(&self, machine: MachineId) -> Vec<ReasonAssignment> {
        let tables = self.store.tables.lock();
        tables
            .assignments
            .iter()
            .chain(self.inserted.iter())
            .filter(|a| a.machine == machine)
            .map(|a| self.replaced.get(&a.id).unwrap_or(a).clone())
            .collect()
    }
}

impl Transaction for InMemoryTransaction<'_> {
    fn label(&self) -> &str {
        &self.label
    }

    fn next_fact_after(
        &self,
        machine: MachineId,
        after: DateTime<Utc>,
    ) -> Result<Option<Fact>, StoreError> {
        let tables = self.store.tables.lock();
        Ok(tables.facts.get(&machine).and_then(|facts| {
            facts
                .iter()
                .find(|f| f.range.lower().is_some_and(|l| l > after))
                .cloned()
        }))
    }

    fn next_cycle_end_after(
        &self,
        machine: MachineId,
        module: Option<MachineModuleId>,
        after: DateTime<Utc>,
    ) -> Result<Option<Cycle>, StoreError> {
        let tables = self.store.tables.lock();
        Ok(tables.cycles.get(&machine).and_then(|cycles| {
            cycles
                .iter()
                .filter(|c| module.is_none() || c.module == module)
                .filter(|c| c.end > after)
                .min_by_key(|c| c.end)
                .cloned()
        }))
    }

    fn checkpoint(&self, key: &CheckpointKey) -> Result<Option<DateTime<Utc>>, StoreError> {
        if let Some(at) = self.checkpoints.get(key) {
            return Ok(Some(*at));
        }
        Ok(self.store.tables.lock().checkpoints.get(key).copied())
    }

    fn save_checkpoint(
        &mut self,
        key: &CheckpointKey,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.checkpoints.insert(key.clone(), at);
        Ok(())
    }

    fn find_assignment(
        &self,
        machine: MachineId,
        reason: ReasonId,
        requested_range: &UtcRange,
    ) -> Result<Option<ReasonAssignment>, StoreError> {
        Ok(self
            .visible_assignments(machine)
            .into_iter()
            .find(|a| a.reason == reason && a.requested_range == *requested_range))
    }

    fn assignments_by_origin(
        &self,
        machine: MachineId,
        origin: &str,
    ) -> Result<Vec<ReasonAssignment>, StoreError> {
        let mut found: Vec<ReasonAssignment> = self
            .visible_assignments(machine)
            .into_iter()
            .filter(|a| a.origin == origin)
            .collect();
        found.sort_by_key(|a| a.requested_range.lower());
        Ok(found)
    }

    fn insert_assignment(&mut self, assignment: ReasonAssignment) -> Result<(), StoreError> {
        self.inserted.push(assignment);
        Ok(())
    }

    fn replace_assignment(&mut self, assignment: ReasonAssignment) -> Result<(), StoreError> {
        if let Some(pending) = self.inserted.iter_mut().find(|a| a.id == assignment.id) {
            *pending = assignment;
            return Ok(());
        }
        let exists = self
            .store
            .tables
            .lock()
            .assignments
            .iter()
            .any(|a| a.id == assignment.id);
        if !exists {
            return Err(StoreError::NotFound {
                entity: "reason assignment",
                id: assignment.id.to_string(),
            });
        }
        self.replaced.insert(assignment.id, assignment);
        Ok(())
    }

    fn find_reason(&self, id: ReasonId) -> Result<Option<Reason>, StoreError> {
        if let Some(r) = self.new_reasons.iter().find(|r| r.id == id) {
            return Ok(Some(r.clone()));
        }
        Ok(self.store.tables.lock().reasons.get(&id).cloned())
    }

    fn find_reason_by_key(&self, translation_key: &str) -> Result<Option<Reason>, StoreError> {
        if let Some(r) = self
            .new_reasons
            .iter()
            .find(|r| r.translation_key == translation_key)
        {
            return Ok(Some(r.clone()));
        }
        Ok(self
            .store
            .tables
            .lock()
            .reasons
            .values()
            .find(|r| r.translation_key == translation_key)
            .cloned())
    }

    fn create_reason(&mut self, translation_key: &str) -> Result<Reason, StoreError> {
        let committed_max = self
            .store
            .tables
            .lock()
            .reasons
            .keys()
            .next_back()
            .map(|id| id.0)
            .unwrap_or(0);
        let pending_max = self.new_reasons.iter().map(|r| r.id.0).max().unwrap_or(0);
        let reason = Reason {
            id: ReasonId(committed_max.max(pending_max) + 1),
            translation_key: translation_key.to_string(),
        };
        self.new_reasons.push(reason.clone());
        Ok(reason)
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTransaction {
            store,
            label,
            checkpoints,
            inserted,
            mut replaced,
            new_reasons,
        } = *self;

        if let Some(error) = store.injected_failure.lock().take() {
            tracing::debug!(label = %label, error = %error, "injected commit failure");
            return Err(error);
        }

        let mut tables = store.tables.lock();
        let reason_clash = new_reasons.iter().any(|r| {
            tables
                .reasons
                .get(&r.id)
                .is_some_and(|existing| existing.translation_key != r.translation_key)
        });
        let lost_replacement = replaced
            .keys()
            .any(|id| !tables.assignments.iter().any(|a| a.id == *id));
        if reason_clash || lost_replacement {
            return Err(StoreError::Conflict { label });
        }

        for reason in new_reasons {
            tables.reasons.insert(reason.id, reason);
        }
        for assignment in tables.assignments.iter_mut() {
            if let Some(replacement) = replaced.remove(&assignment.id) {
                *assignment = replacement;
            }
        }
        tables.assignments.extend(inserted);
        tables.checkpoints.extend(checkpoints);
        drop(tables);

        *store.commits.lock() += 1;
        tracing::trace!(label = %label, "commit transaction");
        Ok(())
    }

    fn rollback(self: Box<Self>) {
        tracing::trace!(label = %self.label, "rollback transaction");
    }
}
