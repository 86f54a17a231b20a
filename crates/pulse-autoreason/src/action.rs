//! # Delayed Actions
//!
//! A check does not write anything. It queues delayed actions, which the
//! extension executes in order inside the run's transaction once the check
//! returned. Every action is consumed by its execution.
//!
//! ## Reason application
//!
//! `ApplyReasonAction` resolves the end of its range, then:
//!
//! 1. `no_data`, or only a hint: **Postponed**. The whole run is rolled
//!    back and retried on a later pass.
//! 2. `not_applicable`: **Skipped**.
//! 3. Aggressive policy and a final end before the real end: **Skipped**,
//!    so nothing is committed over a window that may still grow.
//! 4. Final end not after the lower bound: **Skipped** with a warning.
//! 5. Otherwise `[lower, final)` is persisted. An assignment already
//!    requested for the same range is replaced only when overwrite is
//!    required, else the action is a no-op (**AlreadyExists**).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pulse_core::{AssignmentId, MachineId, ReasonId, UtcRange};
use pulse_store::{CheckpointKey, ReasonAssignment, Transaction};

use crate::dynamic_time::DynamicTimeResolver;
use crate::error::AutoReasonError;

/// Result of one delayed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionOutcome {
    Applied,
    AlreadyExists,
    Skipped,
    /// Not enough data yet. The run must not commit.
    Postponed,
}

impl std::fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Applied => "APPLIED",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::Skipped => "SKIPPED",
            Self::Postponed => "POSTPONED",
        };
        f.write_str(s)
    }
}

/// What an action may read besides the transaction.
#[derive(Debug, Clone, Copy)]
pub struct ActionEnv<'a> {
    pub resolver: &'a dyn DynamicTimeResolver,
    /// Instant of the run, recorded on created assignments.
    pub now: DateTime<Utc>,
    /// Checkpoint key prefix of the queuing extension.
    pub origin: &'a str,
}

/// A write queued by a check.
pub trait DelayedAction: Send + std::fmt::Debug {
    fn execute(
        self: Box<Self>,
        tx: &mut dyn Transaction,
        env: &ActionEnv<'_>,
    ) -> Result<ActionOutcome, AutoReasonError>;
}

// ─── Reason application ──────────────────────────────────────────────

/// Apply a reason over a range whose end may be fixed by a dynamic-time
/// resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReasonAction {
    pub machine: MachineId,
    pub reason: ReasonId,
    pub score: f64,
    /// Detected range. Its upper bound is the real end when known.
    pub range: UtcRange,
    pub dynamic_end_selector: String,
    pub details: String,
    pub overwrite_required: bool,
    pub aggressive: bool,
}

impl ApplyReasonAction {
    /// End of the persisted range, `Ok(None)` for `+oo`. `Err` carries the
    /// outcome that stops the action.
    fn resolve_end(
        &self,
        env: &ActionEnv<'_>,
    ) -> Result<Result<Option<DateTime<Utc>>, ActionOutcome>, AutoReasonError> {
        if self.dynamic_end_selector.is_empty() {
            return Ok(Ok(self.range.upper()));
        }
        let response =
            env.resolver
                .resolve(&self.dynamic_end_selector, self.machine, &self.range)?;
        if response.is_no_data() {
            tracing::debug!(range = %self.range, selector = %self.dynamic_end_selector, "no data yet, postpone");
            return Ok(Err(ActionOutcome::Postponed));
        }
        if response.is_not_applicable() {
            tracing::debug!(range = %self.range, selector = %self.dynamic_end_selector, "not applicable, skip");
            return Ok(Err(ActionOutcome::Skipped));
        }
        let Some(final_instant) = response.final_instant() else {
            tracing::debug!(range = %self.range, hint = ?response.hint_range(), "end not final yet, postpone");
            return Ok(Err(ActionOutcome::Postponed));
        };
        if self.aggressive {
            if let Some(real_end) = self.range.upper() {
                if final_instant < real_end {
                    tracing::debug!(
                        range = %self.range,
                        final_end = %final_instant,
                        "dynamic end before real end, skip"
                    );
                    return Ok(Err(ActionOutcome::Skipped));
                }
            }
        }
        Ok(Ok(Some(final_instant)))
    }
}

impl DelayedAction for ApplyReasonAction {
    fn execute(
        self: Box<Self>,
        tx: &mut dyn Transaction,
        env: &ActionEnv<'_>,
    ) -> Result<ActionOutcome, AutoReasonError> {
        let end = match self.resolve_end(env)? {
            Ok(end) => end,
            Err(outcome) => return Ok(outcome),
        };
        if let (Some(lower), Some(end)) = (self.range.lower(), end) {
            if end <= lower {
                tracing::warn!(
                    machine = %self.machine,
                    range = %self.range,
                    end = %end,
                    "resolved end is not after the range start, skip"
                );
                return Ok(ActionOutcome::Skipped);
            }
        }
        let persisted = UtcRange::new(self.range.lower(), end)?;

        let existing = tx.find_assignment(self.machine, self.reason, &self.range)?;
        let id = match &existing {
            Some(current) if !self.overwrite_required => {
                tracing::debug!(
                    machine = %self.machine,
                    assignment = %current.id,
                    range = %self.range,
                    "assignment already exists"
                );
                return Ok(ActionOutcome::AlreadyExists);
            }
            Some(current) => current.id,
            None => AssignmentId::new(),
        };
        let assignment = ReasonAssignment {
            id,
            machine: self.machine,
            reason: self.reason,
            score: self.score,
            range: persisted,
            requested_range: self.range,
            dynamic_end_selector: self.dynamic_end_selector,
            details: self.details,
            overwrite_required: self.overwrite_required,
            origin: env.origin.to_string(),
            created_at: env.now,
        };
        tracing::info!(
            machine = %assignment.machine,
            reason = %assignment.reason,
            range = %assignment.range,
            replaced = existing.is_some(),
            "reason applied"
        );
        if existing.is_some() {
            tx.replace_assignment(assignment)?;
        } else {
            tx.insert_assignment(assignment)?;
        }
        Ok(ActionOutcome::Applied)
    }
}

// ─── Checkpoints ─────────────────────────────────────────────────────

/// Persist a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDateTimeAction {
    pub key: CheckpointKey,
    pub at: DateTime<Utc>,
    /// A reset may move the checkpoint backwards.
    pub reset: bool,
}

impl UpdateDateTimeAction {
    pub fn update(key: CheckpointKey, at: DateTime<Utc>) -> Self {
        Self {
            key,
            at,
            reset: false,
        }
    }

    pub fn reset(key: CheckpointKey, at: DateTime<Utc>) -> Self {
        Self {
            key,
            at,
            reset: true,
        }
    }
}

impl DelayedAction for UpdateDateTimeAction {
    fn execute(
        self: Box<Self>,
        tx: &mut dyn Transaction,
        _env: &ActionEnv<'_>,
    ) -> Result<ActionOutcome, AutoReasonError> {
        if self.reset {
            tracing::warn!(key = %self.key, at = %self.at, "checkpoint reset");
        } else {
            tracing::debug!(key = %self.key, at = %self.at, "checkpoint updated");
        }
        tx.save_checkpoint(&self.key, self.at)?;
        Ok(ActionOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pulse_store::{InMemoryStore, Store};

    use crate::dynamic_time::{DynamicTimeResponse, ScriptedResolver};

    const M: MachineId = MachineId(1);

    fn t(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, min, 0).unwrap()
    }

    fn action(range: UtcRange, selector: &str) -> Box<ApplyReasonAction> {
        Box::new(ApplyReasonAction {
            machine: M,
            reason: ReasonId(1),
            score: 60.0,
            range,
            dynamic_end_selector: selector.to_string(),
            details: String::new(),
            overwrite_required: false,
            aggressive: false,
        })
    }

    fn run(
        store: &InMemoryStore,
        resolver: &ScriptedResolver,
        action: Box<dyn DelayedAction>,
    ) -> ActionOutcome {
        let env = ActionEnv {
            resolver,
            now: t(30),
            origin: "Test.a",
        };
        let mut tx = store.begin("test").unwrap();
        let outcome = action.execute(tx.as_mut(), &env).unwrap();
        tx.commit().unwrap();
        outcome
    }

    // ── resolution ───────────────────────────────────────────────────

    #[test]
    fn test_empty_selector_applies_detected_range() {
        let store = InMemoryStore::new();
        let resolver = ScriptedResolver::new();
        let range = UtcRange::between(t(10), t(20)).unwrap();
        assert_eq!(run(&store, &resolver, action(range, "")), ActionOutcome::Applied);
        let applied = store.assignments(M);
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].range, range);
        assert_eq!(applied[0].origin, "Test.a");
        assert!(resolver.calls().is_empty());
    }

    #[test]
    fn test_no_data_postpones() {
        let store = InMemoryStore::new();
        let resolver = ScriptedResolver::new();
        resolver.script("Next", M, DynamicTimeResponse::no_data());
        let outcome = run(&store, &resolver, action(UtcRange::since(t(10)), "Next"));
        assert_eq!(outcome, ActionOutcome::Postponed);
        assert!(store.assignments(M).is_empty());
    }

    #[test]
    fn test_hint_only_postpones() {
        let store = InMemoryStore::new();
        let resolver = ScriptedResolver::new();
        resolver.script("Next", M, DynamicTimeResponse::hint(UtcRange::since(t(15))));
        let outcome = run(&store, &resolver, action(UtcRange::since(t(10)), "Next"));
        assert_eq!(outcome, ActionOutcome::Postponed);
    }

    #[test]
    fn test_not_applicable_skips() {
        let store = InMemoryStore::new();
        let resolver = ScriptedResolver::new();
        resolver.script("Next", M, DynamicTimeResponse::not_applicable());
        let outcome = run(&store, &resolver, action(UtcRange::since(t(10)), "Next"));
        assert_eq!(outcome, ActionOutcome::Skipped);
    }

    #[test]
    fn test_final_end_bounds_persisted_range() {
        let store = InMemoryStore::new();
        let resolver = ScriptedResolver::new();
        resolver.script("Next", M, DynamicTimeResponse::final_at(t(25)));
        let requested = UtcRange::since(t(10));
        run(&store, &resolver, action(requested, "Next"));
        let applied = store.assignments(M);
        assert_eq!(applied[0].range, UtcRange::between(t(10), t(25)).unwrap());
        assert_eq!(applied[0].requested_range, requested);
        assert_eq!(applied[0].dynamic_end_selector, "Next");
    }

    #[test]
    fn test_final_end_not_after_lower_skips() {
        let store = InMemoryStore::new();
        let resolver = ScriptedResolver::new();
        resolver.script("Next", M, DynamicTimeResponse::final_at(t(10)));
        let outcome = run(&store, &resolver, action(UtcRange::since(t(10)), "Next"));
        assert_eq!(outcome, ActionOutcome::Skipped);
        assert!(store.assignments(M).is_empty());
    }

    // ── aggressive policy ────────────────────────────────────────────

    #[test]
    fn test_aggressive_cancels_on_shrink() {
        let store = InMemoryStore::new();
        let resolver = ScriptedResolver::new();
        resolver.script("Next", M, DynamicTimeResponse::final_at(t(15)));
        let mut a = action(UtcRange::between(t(10), t(20)).unwrap(), "Next");
        a.aggressive = true;
        assert_eq!(run(&store, &resolver, a), ActionOutcome::Skipped);
        assert!(store.assignments(M).is_empty());
    }

    #[test]
    fn test_non_aggressive_applies_shrunk_range() {
        let store = InMemoryStore::new();
        let resolver = ScriptedResolver::new();
        resolver.script("Next", M, DynamicTimeResponse::final_at(t(15)));
        let outcome = run(
            &store,
            &resolver,
            action(UtcRange::between(t(10), t(20)).unwrap(), "Next"),
        );
        assert_eq!(outcome, ActionOutcome::Applied);
        assert_eq!(
            store.assignments(M)[0].range,
            UtcRange::between(t(10), t(15)).unwrap()
        );
    }

    #[test]
    fn test_aggressive_applies_when_end_is_not_before_real_end() {
        let store = InMemoryStore::new();
        let resolver = ScriptedResolver::new();
        resolver.script("Next", M, DynamicTimeResponse::final_at(t(20)));
        let mut a = action(UtcRange::between(t(10), t(20)).unwrap(), "Next");
        a.aggressive = true;
        assert_eq!(run(&store, &resolver, a), ActionOutcome::Applied);
    }

    // ── overwrite ────────────────────────────────────────────────────

    #[test]
    fn test_reapplication_without_overwrite_is_idempotent() {
        let store = InMemoryStore::new();
        let resolver = ScriptedResolver::new();
        let range = UtcRange::since(t(10));
        assert_eq!(run(&store, &resolver, action(range, "")), ActionOutcome::Applied);
        assert_eq!(
            run(&store, &resolver, action(range, "")),
            ActionOutcome::AlreadyExists
        );
        assert_eq!(store.assignments(M).len(), 1);
    }

    #[test]
    fn test_overwrite_replaces_in_place() {
        let store = InMemoryStore::new();
        let resolver = ScriptedResolver::new();
        resolver.script("Next", M, DynamicTimeResponse::final_at(t(25)));
        let range = UtcRange::since(t(10));
        run(&store, &resolver, action(range, "Next"));
        let first = store.assignments(M)[0].id;

        resolver.script("Next", M, DynamicTimeResponse::final_at(t(28)));
        let mut again = action(range, "Next");
        again.overwrite_required = true;
        assert_eq!(run(&store, &resolver, again), ActionOutcome::Applied);
        let applied = store.assignments(M);
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].id, first);
        assert_eq!(applied[0].range.upper(), Some(t(28)));
    }

    // ── checkpoints ──────────────────────────────────────────────────

    #[test]
    fn test_update_date_time_persists() {
        let store = InMemoryStore::new();
        let resolver = ScriptedResolver::new();
        let key = CheckpointKey::machine(M, "Test.a");
        let outcome = run(
            &store,
            &resolver,
            Box::new(UpdateDateTimeAction::update(key.clone(), t(10))),
        );
        assert_eq!(outcome, ActionOutcome::Applied);
        assert_eq!(store.checkpoint(&key), Some(t(10)));
        run(
            &store,
            &resolver,
            Box::new(UpdateDateTimeAction::reset(key.clone(), t(5))),
        );
        assert_eq!(store.checkpoint(&key), Some(t(5)));
    }
}
