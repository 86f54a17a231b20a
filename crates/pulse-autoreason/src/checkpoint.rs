//! # Check Context
//!
//! What a rule sees during one check: the current checkpoints, read access
//! to the run's transaction, and the operations that queue work. Nothing
//! is written until the extension executes the queued actions.
//!
//! ## Forward progress
//!
//! `go_on(t)` never lets the checkpoint stand still or move backwards: when
//! `t` is not strictly after the current checkpoint (including moves
//! already queued in this check), the checkpoint moves to
//! `current + epsilon` instead. Across successful checks the checkpoint
//! sequence is therefore strictly increasing.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use pulse_core::{Machine, MachineId, MachineModuleId, ReasonId, UtcRange};
use pulse_store::{CheckpointKey, Transaction};

use crate::action::{ApplyReasonAction, DelayedAction, UpdateDateTimeAction};
use crate::config::AutoReasonConfig;

/// Checkpoint following `current` when a rule proposes `proposed`.
pub fn next_checkpoint(
    current: DateTime<Utc>,
    proposed: DateTime<Utc>,
    epsilon: Duration,
) -> DateTime<Utc> {
    if proposed <= current {
        current + epsilon
    } else {
        proposed
    }
}

/// Everything a check produced.
#[derive(Debug)]
pub struct CheckResult {
    pub actions: Vec<Box<dyn DelayedAction>>,
    /// Machine checkpoint to adopt after a commit, if it moved.
    pub checkpoint: Option<DateTime<Utc>>,
    /// Module checkpoints to adopt after a commit.
    pub module_checkpoints: BTreeMap<MachineModuleId, DateTime<Utc>>,
}

impl CheckResult {
    pub fn has_work(&self) -> bool {
        !self.actions.is_empty()
    }
}

/// The view of one extension instance during one check.
pub struct CheckContext<'a> {
    machine: &'a Machine,
    tx: &'a dyn Transaction,
    config: &'a AutoReasonConfig,
    reason: ReasonId,
    key_prefix: &'a str,
    epsilon: Duration,
    now: DateTime<Utc>,
    checkpoint: DateTime<Utc>,
    module_checkpoints: &'a BTreeMap<MachineModuleId, DateTime<Utc>>,
    force_overwrite: bool,
    pending: Option<DateTime<Utc>>,
    pending_modules: BTreeMap<MachineModuleId, DateTime<Utc>>,
    actions: Vec<Box<dyn DelayedAction>>,
}

impl<'a> CheckContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        machine: &'a Machine,
        tx: &'a dyn Transaction,
        config: &'a AutoReasonConfig,
        reason: ReasonId,
        key_prefix: &'a str,
        epsilon: Duration,
        now: DateTime<Utc>,
        checkpoint: DateTime<Utc>,
        module_checkpoints: &'a BTreeMap<MachineModuleId, DateTime<Utc>>,
    ) -> Self {
        Self {
            machine,
            tx,
            config,
            reason,
            key_prefix,
            epsilon,
            now,
            checkpoint,
            module_checkpoints,
            force_overwrite: false,
            pending: None,
            pending_modules: BTreeMap::new(),
            actions: Vec::new(),
        }
    }

    /// Apply reasons with overwrite during this check, whatever the
    /// configuration says. Used after an audit reset.
    pub fn with_forced_overwrite(mut self) -> Self {
        self.force_overwrite = true;
        self
    }

    pub fn machine(&self) -> &'a Machine {
        self.machine
    }

    pub fn machine_id(&self) -> MachineId {
        self.machine.id
    }

    pub fn config(&self) -> &'a AutoReasonConfig {
        self.config
    }

    pub fn transaction(&self) -> &'a dyn Transaction {
        self.tx
    }

    /// Instant of the run.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Machine checkpoint, including a move queued in this check.
    pub fn checkpoint(&self) -> DateTime<Utc> {
        self.pending.unwrap_or(self.checkpoint)
    }

    /// Checkpoint of `module`, falling back to the machine checkpoint for a
    /// module that has none yet.
    pub fn module_checkpoint(&self, module: MachineModuleId) -> DateTime<Utc> {
        self.pending_modules
            .get(&module)
            .or_else(|| self.module_checkpoints.get(&module))
            .copied()
            .unwrap_or(self.checkpoint)
    }

    /// Queue the application of this instance's reason over `range`.
    pub fn apply_reason(&mut self, range: UtcRange, details: Option<&str>) {
        let details = details
            .map(str::to_string)
            .unwrap_or_else(|| self.config.details.clone());
        tracing::debug!(machine = %self.machine.id, range = %range, "apply reason queued");
        self.actions.push(Box::new(ApplyReasonAction {
            machine: self.machine.id,
            reason: self.reason,
            score: self.config.reason_score,
            range,
            dynamic_end_selector: self.config.dynamic_end.clone(),
            details,
            overwrite_required: self.config.overwrite_required || self.force_overwrite,
            aggressive: self.config.aggressive,
        }));
    }

    /// Move the machine checkpoint to `at`, or to `current + epsilon` when
    /// `at` is not after it. Returns the checkpoint queued.
    pub fn go_on(&mut self, at: DateTime<Utc>) -> DateTime<Utc> {
        let current = self.checkpoint();
        let next = next_checkpoint(current, at, self.epsilon);
        if next != at {
            tracing::debug!(proposed = %at, current = %current, next = %next, "checkpoint nudged forward");
        }
        self.pending = Some(next);
        self.actions.push(Box::new(UpdateDateTimeAction::update(
            CheckpointKey::machine(self.machine.id, self.key_prefix),
            next,
        )));
        next
    }

    /// Module variant of [`go_on`](Self::go_on).
    pub fn go_on_module(&mut self, module: MachineModuleId, at: DateTime<Utc>) -> DateTime<Utc> {
        let current = self.module_checkpoint(module);
        let next = next_checkpoint(current, at, self.epsilon);
        self.pending_modules.insert(module, next);
        self.actions.push(Box::new(UpdateDateTimeAction::update(
            CheckpointKey::module(self.machine.id, self.key_prefix, module),
            next,
        )));
        next
    }

    pub fn finish(self) -> CheckResult {
        CheckResult {
            actions: self.actions,
            checkpoint: self.pending,
            module_checkpoints: self.pending_modules,
        }
    }
}
