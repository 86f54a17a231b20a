//! # Auto-Reason Registry
//!
//! Contributes one sub-state per initialized extension instance to a
//! machine's extension composite. Rules are compiled in and keyed by
//! plugin; instances come from a [`ConfigurationProvider`].

use std::sync::Arc;

use pulse_analysis::{AnalysisError, ExtensionRegistry, ExtensionState, MachineActivityAnalysis};
use pulse_state::{Budget, StepOutcome, SubState};

use crate::config::ConfigurationProvider;
use crate::dynamic_time::DynamicTimeResolver;
use crate::extension::{
    AutoReasonDefinition, AutoReasonExtension, AutoReasonRule, ExtensionEnv, ExtensionPhase,
};
use crate::rules::{CycleEndRule, LongIdleRule};

/// Upper bound of runs per visit, so one busy extension cannot hold the
/// composite for a whole backlog.
const MAX_RUNS_PER_VISIT: usize = 32;

impl SubState<MachineActivityAnalysis, AnalysisError> for AutoReasonExtension {
    fn name(&self) -> &str {
        self.key_prefix()
    }

    fn priority(&self) -> i32 {
        self.config().priority
    }

    /// Run until there is no more work, the run is postponed, or the budget
    /// is spent.
    fn visit(
        &mut self,
        _context: &mut MachineActivityAnalysis,
        budget: &Budget,
    ) -> Result<StepOutcome, AnalysisError> {
        for _ in 0..MAX_RUNS_PER_VISIT {
            if budget.is_exceeded() {
                return Ok(StepOutcome::MaxTimeExceeded);
            }
            let phase = match self.run_once() {
                Ok(phase) => phase,
                Err(e) => return Err(e.into_analysis_error(self.key_prefix())),
            };
            if phase != ExtensionPhase::Applied {
                break;
            }
        }
        if budget.is_exceeded() {
            Ok(StepOutcome::MaxTimeExceeded)
        } else {
            Ok(StepOutcome::Success)
        }
    }
}

/// Registry of the auto-reason plugins.
pub struct AutoReasonRegistry {
    resolver: Arc<dyn DynamicTimeResolver>,
    provider: Arc<dyn ConfigurationProvider>,
    rules: Vec<Arc<dyn AutoReasonRule>>,
}

impl std::fmt::Debug for AutoReasonRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoReasonRegistry")
            .field(
                "rules",
                &self.rules.iter().map(|r| r.plugin_key()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl AutoReasonRegistry {
    /// Registry without rules.
    pub fn new(
        resolver: Arc<dyn DynamicTimeResolver>,
        provider: Arc<dyn ConfigurationProvider>,
    ) -> Self {
        Self {
            resolver,
            provider,
            rules: Vec::new(),
        }
    }

    /// Registry with the built-in rules.
    pub fn with_builtin_rules(
        resolver: Arc<dyn DynamicTimeResolver>,
        provider: Arc<dyn ConfigurationProvider>,
    ) -> Self {
        Self::new(resolver, provider)
            .with_rule(Arc::new(CycleEndRule))
            .with_rule(Arc::new(LongIdleRule))
    }

    pub fn with_rule(mut self, rule: Arc<dyn AutoReasonRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn plugin_keys(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.plugin_key()).collect()
    }

    /// Initialize every configured instance for the machine of `context`.
    pub fn extensions(
        &self,
        context: &MachineActivityAnalysis,
    ) -> Result<Vec<AutoReasonExtension>, AnalysisError> {
        let env = ExtensionEnv::new(
            context.store().clone(),
            context.clock().clone(),
            self.resolver.clone(),
            context.config(),
        );
        let mut extensions = Vec::new();
        for rule in &self.rules {
            let configs = match self.provider.configurations(rule.plugin_key()) {
                Ok(configs) => configs,
                Err(e) => {
                    tracing::warn!(plugin = rule.plugin_key(), error = %e, "configurations unavailable");
                    continue;
                }
            };
            for config in configs {
                let definition = AutoReasonDefinition::new(rule.clone(), config);
                match definition.initialize(context.machine(), &env) {
                    Ok(Some(extension)) => extensions.push(extension),
                    Ok(None) => {}
                    Err(e) => return Err(e.into_analysis_error(&definition.key_prefix())),
                }
            }
        }
        Ok(extensions)
    }
}

impl ExtensionRegistry for AutoReasonRegistry {
    fn name(&self) -> &str {
        "AutoReason"
    }

    fn extension_states(
        &self,
        context: &MachineActivityAnalysis,
    ) -> Result<Vec<ExtensionState>, AnalysisError> {
        Ok(self
            .extensions(context)?
            .into_iter()
            .map(|e| Box::new(e) as ExtensionState)
            .collect())
    }
}
