//! # Machine Activity Analysis Context
//!
//! The handle the activity pipeline operates on for one machine. It exposes
//! the fixed analysis phases, each bounded by a sub-deadline of the pass
//! budget, and collects the sub-states contributed by extension registries.
//!
//! The context keeps no state between passes besides its configuration and
//! pause flag. Everything else is read fresh from the store and services.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use pulse_core::{Clock, EngineConfig, Machine, MachineId};
use pulse_state::{sort_by_priority, Budget, SubState};
use pulse_store::Store;

use crate::error::AnalysisError;
use crate::pause::PauseHandle;
use crate::services::AnalysisServices;

/// Horizon of state-template processing.
const STATE_TEMPLATE_HORIZON_DAYS: i64 = 7;

/// A sub-state contributed to the extension composite of the pipeline.
pub type ExtensionState = Box<dyn SubState<MachineActivityAnalysis, AnalysisError>>;

/// Source of extension sub-states for a machine.
///
/// Registries are asked once per machine, when its pipeline is built. A
/// registry returns only the extensions that initialized successfully for
/// that machine.
pub trait ExtensionRegistry: Send + Sync {
    /// Registry name, used in logs.
    fn name(&self) -> &str;

    fn extension_states(
        &self,
        context: &MachineActivityAnalysis,
    ) -> Result<Vec<ExtensionState>, AnalysisError>;
}

/// Per-machine analysis session.
pub struct MachineActivityAnalysis {
    machine: Machine,
    store: Arc<dyn Store>,
    services: Arc<dyn AnalysisServices>,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
    registries: Vec<Arc<dyn ExtensionRegistry>>,
    pause: PauseHandle,
}

impl std::fmt::Debug for MachineActivityAnalysis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineActivityAnalysis")
            .field("machine", &self.machine)
            .field(
                "registries",
                &self.registries.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .field("pause", &self.pause.holder())
            .finish()
    }
}

impl MachineActivityAnalysis {
    pub fn new(
        machine: Machine,
        store: Arc<dyn Store>,
        services: Arc<dyn AnalysisServices>,
        clock: Arc<dyn Clock>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            machine,
            store,
            services,
            clock,
            config,
            registries: Vec::new(),
            pause: PauseHandle::new(),
        }
    }

    /// Register an extension registry. Registration order breaks priority
    /// ties.
    pub fn with_registry(mut self, registry: Arc<dyn ExtensionRegistry>) -> Self {
        self.registries.push(registry);
        self
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn machine_id(&self) -> MachineId {
        self.machine.id
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pause(&self) -> &PauseHandle {
        &self.pause
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ── phases ───────────────────────────────────────────────────────

    pub fn is_clean_flagged_modifications_required(&self) -> Result<bool, AnalysisError> {
        Ok(self
            .services
            .is_clean_flagged_modifications_required(self.machine.id)?)
    }

    /// Returns whether every flagged modification was cleaned in time.
    pub fn clean_flagged_modifications(&self, budget: &Budget) -> Result<bool, AnalysisError> {
        let deadline = budget.local_deadline(
            self.config.clean_flagged_max_time(),
            self.config.clean_flagged_min_time(),
        );
        Ok(self
            .services
            .clean_flagged_modifications(self.machine.id, deadline)?)
    }

    /// Returns whether every eligible pending modification was processed.
    pub fn run_pending_modifications_analysis(
        &self,
        budget: &Budget,
        min_past_priority: i32,
        min_present_priority: i32,
    ) -> Result<bool, AnalysisError> {
        let deadline = budget.local_deadline(
            self.config.pending_modifications_max_time(),
            self.config.pending_modifications_min_time(),
        );
        Ok(self.services.run_pending_modifications(
            self.machine.id,
            deadline,
            min_past_priority,
            min_present_priority,
        )?)
    }

    /// Apply state-template changes up to midnight UTC seven days ahead,
    /// so a new day is only processed once a day.
    pub fn manage_state_template_changes(&self, budget: &Budget) -> Result<bool, AnalysisError> {
        let present = self.now();
        let horizon = present + Duration::days(STATE_TEMPLATE_HORIZON_DAYS);
        let until = horizon
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc())
            .unwrap_or(horizon);
        let deadline = budget.local_deadline(
            self.config.state_template_max_time(),
            self.config.state_template_min_time(),
        );
        tracing::debug!(machine = %self.machine.id, %until, "manage state template changes");
        Ok(self
            .services
            .manage_state_template_changes(self.machine.id, present, until, deadline)?)
    }

    // ── extensions ───────────────────────────────────────────────────

    /// Sub-states of every registry, by descending priority. Ties keep
    /// registry order, then the order within a registry.
    pub fn extension_states(&self) -> Result<Vec<ExtensionState>, AnalysisError> {
        let mut states = Vec::new();
        for registry in &self.registries {
            let contributed = registry.extension_states(self)?;
            tracing::debug!(
                machine = %self.machine.id,
                registry = registry.name(),
                count = contributed.len(),
                "extension states loaded"
            );
            states.extend(contributed);
        }
        sort_by_priority(&mut states);
        Ok(states)
    }
}
