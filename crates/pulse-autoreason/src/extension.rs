//! # Auto-Reason Extension
//!
//! Checkpoint/retry engine of one rule instance on one machine.
//!
//! ## Lifecycle
//!
//! ```text
//! AutoReasonDefinition ──initialize──▶ Initialized ──run_once──▶ Checking
//!        │ invalid config,                              │
//!        │ filtered machine                             ├─▶ Applied    (committed)
//!        ▼                                              ├─▶ Postponed  (rolled back)
//!      None (inert)                                     └─▶ NoWork     (nothing to do)
//! ```
//!
//! Each run opens one transaction, optionally audits earlier assignments,
//! lets the rule check, then executes the queued actions in order. The
//! in-memory checkpoint is only adopted once the transaction committed, so
//! a failed or postponed run leaves both the persisted and the in-memory
//! checkpoint untouched.
//!
//! The audit re-resolves an applied assignment once per persisted end.
//! An end that was confirmed, or that drifted within tolerance, is not
//! resolved again until the assignment is rewritten.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use pulse_core::{AssignmentId, Clock, EngineConfig, Machine, MachineModuleId, ReasonId};
use pulse_store::{CheckpointKey, Store, Transaction};

use crate::action::{ActionEnv, ActionOutcome, DelayedAction, UpdateDateTimeAction};
use crate::checkpoint::{CheckContext, CheckResult};
use crate::config::AutoReasonConfig;
use crate::dynamic_time::DynamicTimeResolver;
use crate::error::AutoReasonError;

/// Detection logic of a plugin.
pub trait AutoReasonRule: Send + Sync + std::fmt::Debug {
    /// Plugin key, the first part of the instance's checkpoint keys.
    fn plugin_key(&self) -> &str;

    /// Find the next boundary after the checkpoint and queue work for it.
    /// Queuing nothing means there is no work.
    fn check(&self, cx: &mut CheckContext<'_>) -> Result<(), AutoReasonError>;
}

/// Collaborators shared by the extensions of one machine.
#[derive(Debug, Clone)]
pub struct ExtensionEnv {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub resolver: Arc<dyn DynamicTimeResolver>,
    /// Minimal checkpoint increment of `go_on`.
    pub epsilon: Duration,
    /// Look-back of a checkpoint that was never persisted.
    pub first_run_period: Duration,
}

impl ExtensionEnv {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        resolver: Arc<dyn DynamicTimeResolver>,
        engine: &EngineConfig,
    ) -> Self {
        Self {
            store,
            clock,
            resolver,
            epsilon: engine.checkpoint_epsilon(),
            first_run_period: engine.first_run_period(),
        }
    }
}

/// Phase of an initialized extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtensionPhase {
    Initialized,
    Checking,
    /// The last run committed work.
    Applied,
    /// The last run was rolled back waiting for data.
    Postponed,
    /// The last run found nothing to do.
    NoWork,
}

impl std::fmt::Display for ExtensionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initialized => "INITIALIZED",
            Self::Checking => "CHECKING",
            Self::Applied => "APPLIED",
            Self::Postponed => "POSTPONED",
            Self::NoWork => "NO_WORK",
        };
        f.write_str(s)
    }
}

// ─── Definition ──────────────────────────────────────────────────────

/// A rule with one instance configuration, not yet bound to a machine.
#[derive(Debug, Clone)]
pub struct AutoReasonDefinition {
    rule: Arc<dyn AutoReasonRule>,
    config: AutoReasonConfig,
}

impl AutoReasonDefinition {
    pub fn new(rule: Arc<dyn AutoReasonRule>, config: AutoReasonConfig) -> Self {
        Self { rule, config }
    }

    pub fn config(&self) -> &AutoReasonConfig {
        &self.config
    }

    /// `{plugin}.{instance}`, prefix of every checkpoint key of the
    /// instance.
    pub fn key_prefix(&self) -> String {
        format!("{}.{}", self.rule.plugin_key(), self.config.instance)
    }

    /// Bind the instance to `machine`.
    ///
    /// Returns `Ok(None)` when the configuration is invalid or excludes the
    /// machine; the extension is then never run for it. Store errors
    /// propagate.
    pub fn initialize(
        &self,
        machine: &Machine,
        env: &ExtensionEnv,
    ) -> Result<Option<AutoReasonExtension>, AutoReasonError> {
        let key_prefix = self.key_prefix();
        if let Err(e) = self.config.validate() {
            tracing::warn!(
                machine = %machine.id,
                extension = %key_prefix,
                error = %e,
                "invalid configuration, extension disabled"
            );
            return Ok(None);
        }
        if !self.config.machines.matches(machine.id) {
            tracing::debug!(machine = %machine.id, extension = %key_prefix, "machine not selected");
            return Ok(None);
        }

        let store = env.store.clone();
        let mut tx = store.begin(&format!("{key_prefix}.Initialize"))?;
        match self.load(machine, env, &key_prefix, tx.as_mut()) {
            Ok(extension) => {
                tx.commit()?;
                if let Some(ext) = &extension {
                    tracing::info!(
                        machine = %machine.id,
                        extension = %key_prefix,
                        checkpoint = %ext.checkpoint,
                        reason = %ext.reason,
                        "extension initialized"
                    );
                }
                Ok(extension)
            }
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }

    fn load(
        &self,
        machine: &Machine,
        env: &ExtensionEnv,
        key_prefix: &str,
        tx: &mut dyn Transaction,
    ) -> Result<Option<AutoReasonExtension>, AutoReasonError> {
        let reason = match (self.config.reason_id, self.config.default_reason_key.as_deref()) {
            (Some(id), _) => match tx.find_reason(id)? {
                Some(reason) => reason.id,
                None => {
                    tracing::warn!(extension = %key_prefix, reason = %id, "configured reason does not exist, extension disabled");
                    return Ok(None);
                }
            },
            (None, Some(key)) => match tx.find_reason_by_key(key)? {
                Some(reason) => reason.id,
                None => {
                    let created = tx.create_reason(key)?;
                    tracing::info!(extension = %key_prefix, reason = %created.id, key, "default reason created");
                    created.id
                }
            },
            (None, None) => return Ok(None),
        };

        let default = self
            .config
            .start
            .unwrap_or_else(|| env.clock.now() - env.first_run_period);
        let checkpoint = tx
            .checkpoint(&CheckpointKey::machine(machine.id, key_prefix))?
            .unwrap_or(default);
        let mut module_checkpoints = BTreeMap::new();
        if self.config.per_module {
            for module in &machine.modules {
                let at = tx
                    .checkpoint(&CheckpointKey::module(machine.id, key_prefix, *module))?
                    .unwrap_or(checkpoint);
                module_checkpoints.insert(*module, at);
            }
        }

        Ok(Some(AutoReasonExtension {
            rule: self.rule.clone(),
            config: self.config.clone(),
            env: env.clone(),
            machine: machine.clone(),
            reason,
            key_prefix: key_prefix.to_string(),
            checkpoint,
            module_checkpoints,
            phase: ExtensionPhase::Initialized,
            audited: HashMap::new(),
        }))
    }
}

// ─── Extension ───────────────────────────────────────────────────────

enum RunStep {
    Commit(CheckResult),
    Discard(ExtensionPhase),
}

/// A rule instance bound to a machine.
#[derive(Debug)]
pub struct AutoReasonExtension {
    rule: Arc<dyn AutoReasonRule>,
    config: AutoReasonConfig,
    env: ExtensionEnv,
    machine: Machine,
    reason: ReasonId,
    key_prefix: String,
    checkpoint: DateTime<Utc>,
    module_checkpoints: BTreeMap<MachineModuleId, DateTime<Utc>>,
    phase: ExtensionPhase,
    /// Persisted end of each assignment the audit already settled.
    audited: HashMap<AssignmentId, DateTime<Utc>>,
}

impl AutoReasonExtension {
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn config(&self) -> &AutoReasonConfig {
        &self.config
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn reason(&self) -> ReasonId {
        self.reason
    }

    pub fn phase(&self) -> ExtensionPhase {
        self.phase
    }

    /// Last committed machine checkpoint.
    pub fn checkpoint(&self) -> DateTime<Utc> {
        self.checkpoint
    }

    pub fn module_checkpoint(&self, module: MachineModuleId) -> DateTime<Utc> {
        self.module_checkpoints
            .get(&module)
            .copied()
            .unwrap_or(self.checkpoint)
    }

    /// Whether an existing assignment with `existing_score` may be replaced
    /// by this instance.
    pub fn can_override(&self, existing_score: f64) -> bool {
        self.config.can_override(existing_score)
    }

    /// Whether `reason` and `score` look like an assignment of this
    /// instance. An unknown reason only checks the score.
    pub fn is_valid_match(&self, reason: Option<ReasonId>, score: f64) -> bool {
        reason.map_or(true, |r| r == self.reason) && score == self.config.reason_score
    }

    // ── run ──────────────────────────────────────────────────────────

    /// Audit, check and execute the queued actions in one transaction.
    pub fn run_once(&mut self) -> Result<ExtensionPhase, AutoReasonError> {
        let span = tracing::info_span!(
            "auto_reason",
            machine = %self.machine.id,
            extension = %self.key_prefix
        );
        let _guard = span.enter();

        let previous = self.phase;
        self.phase = ExtensionPhase::Checking;
        let outcome = self.run_transaction();

        match outcome {
            Ok(RunStep::Commit(result)) => {
                if let Some(at) = result.checkpoint {
                    self.checkpoint = at;
                }
                self.module_checkpoints.extend(result.module_checkpoints);
                self.phase = ExtensionPhase::Applied;
                tracing::debug!(checkpoint = %self.checkpoint, "run committed");
            }
            Ok(RunStep::Discard(phase)) => {
                self.phase = phase;
                tracing::debug!(phase = %phase, checkpoint = %self.checkpoint, "run discarded");
            }
            Err(e) => {
                self.phase = previous;
                return Err(e);
            }
        }
        Ok(self.phase)
    }

    fn run_transaction(&mut self) -> Result<RunStep, AutoReasonError> {
        let store = self.env.store.clone();
        let mut tx = store.begin(&self.key_prefix)?;
        match self.run_in(tx.as_mut()) {
            Ok(RunStep::Commit(result)) => {
                tx.commit()?;
                Ok(RunStep::Commit(result))
            }
            Ok(RunStep::Discard(phase)) => {
                tx.rollback();
                Ok(RunStep::Discard(phase))
            }
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }

    fn run_in(&mut self, tx: &mut dyn Transaction) -> Result<RunStep, AutoReasonError> {
        let now = self.env.clock.now();
        let reset = self.audit(&*tx)?;
        let base = reset.unwrap_or(self.checkpoint);

        let mut cx = CheckContext::new(
            &self.machine,
            &*tx,
            &self.config,
            self.reason,
            &self.key_prefix,
            self.env.epsilon,
            now,
            base,
            &self.module_checkpoints,
        );
        if reset.is_some() {
            cx = cx.with_forced_overwrite();
        }
        self.rule.check(&mut cx)?;
        let mut result = cx.finish();

        if let Some(at) = reset {
            let action: Box<dyn DelayedAction> = Box::new(UpdateDateTimeAction::reset(
                CheckpointKey::machine(self.machine.id, &self.key_prefix),
                at,
            ));
            result.actions.insert(0, action);
            if result.checkpoint.is_none() {
                result.checkpoint = Some(at);
            }
        }
        if !result.has_work() {
            return Ok(RunStep::Discard(ExtensionPhase::NoWork));
        }

        let env = ActionEnv {
            resolver: self.env.resolver.as_ref(),
            now,
            origin: &self.key_prefix,
        };
        for action in std::mem::take(&mut result.actions) {
            let outcome = action.execute(tx, &env)?;
            if outcome == ActionOutcome::Postponed {
                return Ok(RunStep::Discard(ExtensionPhase::Postponed));
            }
        }
        Ok(RunStep::Commit(result))
    }

    /// Re-resolve the dynamic end of the assignments this instance applied
    /// and the audit has not settled yet. Returns the checkpoint to reset
    /// to, if a mismatch calls for one.
    fn audit(&mut self, tx: &dyn Transaction) -> Result<Option<DateTime<Utc>>, AutoReasonError> {
        if !self.config.audit.is_enabled() {
            return Ok(None);
        }
        let mut reset: Option<DateTime<Utc>> = None;
        for applied in tx.assignments_by_origin(self.machine.id, &self.key_prefix)? {
            if applied.dynamic_end_selector.is_empty() {
                continue;
            }
            let Some(recorded) = applied.range.upper() else {
                continue;
            };
            if self.audited.get(&applied.id) == Some(&recorded) {
                continue;
            }
            let response = self.env.resolver.resolve(
                &applied.dynamic_end_selector,
                applied.machine,
                &applied.requested_range,
            )?;
            let Some(fresh) = response.final_instant() else {
                continue;
            };
            if fresh == recorded {
                self.audited.insert(applied.id, recorded);
                continue;
            }
            let drift = if fresh > recorded {
                fresh - recorded
            } else {
                recorded - fresh
            };
            tracing::error!(
                assignment = %applied.id,
                range = %applied.range,
                recorded = %recorded,
                fresh = %fresh,
                drift_secs = drift.num_seconds(),
                "dynamic end changed after the reason was applied"
            );
            if !self.config.audit.requires_reset(drift) {
                self.audited.insert(applied.id, recorded);
                continue;
            }
            if let Some(lower) = applied.requested_range.lower() {
                let target = lower - self.env.epsilon;
                if target < self.checkpoint {
                    reset = Some(reset.map_or(target, |r| r.min(target)));
                }
            }
        }
        Ok(reset)
    }

    // ── checkpoint persistence ───────────────────────────────────────

    /// Persist the machine checkpoint at `at`.
    pub fn update_date_time(&mut self, at: DateTime<Utc>) -> Result<(), AutoReasonError> {
        let key = CheckpointKey::machine(self.machine.id, &self.key_prefix);
        self.persist(UpdateDateTimeAction::update(key, at))?;
        self.checkpoint = at;
        Ok(())
    }

    /// Persist the machine checkpoint at `at`, possibly backwards.
    pub fn reset_date_time(&mut self, at: DateTime<Utc>) -> Result<(), AutoReasonError> {
        let key = CheckpointKey::machine(self.machine.id, &self.key_prefix);
        self.persist(UpdateDateTimeAction::reset(key, at))?;
        self.checkpoint = at;
        Ok(())
    }

    pub fn update_module_date_time(
        &mut self,
        module: MachineModuleId,
        at: DateTime<Utc>,
    ) -> Result<(), AutoReasonError> {
        let key = CheckpointKey::module(self.machine.id, &self.key_prefix, module);
        self.persist(UpdateDateTimeAction::update(key, at))?;
        self.module_checkpoints.insert(module, at);
        Ok(())
    }

    pub fn reset_module_date_time(
        &mut self,
        module: MachineModuleId,
        at: DateTime<Utc>,
    ) -> Result<(), AutoReasonError> {
        let key = CheckpointKey::module(self.machine.id, &self.key_prefix, module);
        self.persist(UpdateDateTimeAction::reset(key, at))?;
        self.module_checkpoints.insert(module, at);
        Ok(())
    }

    fn persist(&self, action: UpdateDateTimeAction) -> Result<(), AutoReasonError> {
        let mut tx = self
            .env
            .store
            .begin(&format!("{}.UpdateDateTime", self.key_prefix))?;
        let env = ActionEnv {
            resolver: self.env.resolver.as_ref(),
            now: self.env.clock.now(),
            origin: &self.key_prefix,
        };
        match Box::new(action).execute(tx.as_mut(), &env) {
            Ok(_) => Ok(tx.commit()?),
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }
}
