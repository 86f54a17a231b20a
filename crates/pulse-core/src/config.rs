//! # Engine Configuration
//!
//! The YAML document that tunes the analysis engine: per-phase time budgets,
//! modification priorities, the checkpoint epsilon, and scheduler limits.
//! Every field has a default, so an empty document is a valid configuration.
//!
//! ```yaml
//! pass_max_time_ms: 40000
//! checkpoint_epsilon_ms: 1000
//! max_parallel_machines: 4
//! machines:
//!   include: [1, 2]
//! ```

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::identity::MachineFilter;

/// Engine-wide tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Time budget of one pass over one machine.
    pub pass_max_time_ms: u64,
    /// Upper bound of the state-template phase inside a pass.
    pub state_template_max_time_ms: u64,
    /// Time granted to the state-template phase even when the pass is late.
    pub state_template_min_time_ms: u64,
    pub pending_modifications_max_time_ms: u64,
    pub pending_modifications_min_time_ms: u64,
    pub clean_flagged_max_time_ms: u64,
    pub clean_flagged_min_time_ms: u64,
    /// Minimum priority of modifications processed on a normal pass.
    pub normal_modification_priority: i32,
    /// Minimum priority of modifications processed on a low-priority pass.
    pub low_modification_priority: i32,
    /// How often a pass also processes low-priority modifications.
    pub low_priority_frequency_secs: u64,
    /// How often a pass processes every pending modification.
    pub very_low_priority_frequency_secs: u64,
    /// Age after which a pending modification counts as a past one.
    pub past_modifications_age_secs: u64,
    /// Increment applied when a checkpoint would not move forward.
    pub checkpoint_epsilon_ms: u64,
    /// Look-back applied when an extension has no stored checkpoint.
    pub first_run_period_secs: u64,
    /// Pause between two scheduler rounds.
    pub scheduler_frequency_ms: u64,
    /// Number of machine passes run at the same time.
    pub max_parallel_machines: usize,
    /// Machines the scheduler is allowed to analyse.
    pub machines: MachineFilter,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pass_max_time_ms: 40_000,
            state_template_max_time_ms: 100_000,
            state_template_min_time_ms: 20_000,
            pending_modifications_max_time_ms: 120_000,
            pending_modifications_min_time_ms: 20_000,
            clean_flagged_max_time_ms: 600_000,
            clean_flagged_min_time_ms: 0,
            normal_modification_priority: 100,
            low_modification_priority: 50,
            low_priority_frequency_secs: 20,
            very_low_priority_frequency_secs: 120,
            past_modifications_age_secs: 20 * 60,
            checkpoint_epsilon_ms: 1_000,
            first_run_period_secs: 3 * 24 * 3600,
            scheduler_frequency_ms: 2_000,
            max_parallel_machines: 4,
            machines: MachineFilter::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(s: &str) -> Result<Self, CoreError> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_path(path: &Path) -> Result<Self, CoreError> {
        let s = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&s)
    }

    /// Check every constraint and report all violations at once.
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut issues = Vec::new();
        if self.pass_max_time_ms == 0 {
            issues.push("pass_max_time_ms must be > 0".to_string());
        }
        if self.checkpoint_epsilon_ms == 0 {
            issues.push("checkpoint_epsilon_ms must be > 0".to_string());
        }
        if self.max_parallel_machines == 0 {
            issues.push("max_parallel_machines must be >= 1".to_string());
        }
        if self.low_priority_frequency_secs == 0 || self.very_low_priority_frequency_secs == 0 {
            issues.push("priority frequencies must be > 0".to_string());
        }
        if self.low_modification_priority > self.normal_modification_priority {
            issues.push(format!(
                "low_modification_priority ({}) exceeds normal_modification_priority ({})",
                self.low_modification_priority, self.normal_modification_priority
            ));
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(CoreError::InvalidConfig { issues })
        }
    }

    pub fn pass_max_time(&self) -> Duration {
        millis(self.pass_max_time_ms)
    }

    pub fn state_template_max_time(&self) -> Duration {
        millis(self.state_template_max_time_ms)
    }

    pub fn state_template_min_time(&self) -> Duration {
        millis(self.state_template_min_time_ms)
    }

    pub fn pending_modifications_max_time(&self) -> Duration {
        millis(self.pending_modifications_max_time_ms)
    }

    pub fn pending_modifications_min_time(&self) -> Duration {
        millis(self.pending_modifications_min_time_ms)
    }

    pub fn clean_flagged_max_time(&self) -> Duration {
        millis(self.clean_flagged_max_time_ms)
    }

    pub fn clean_flagged_min_time(&self) -> Duration {
        millis(self.clean_flagged_min_time_ms)
    }

    pub fn low_priority_frequency(&self) -> Duration {
        secs(self.low_priority_frequency_secs)
    }

    pub fn very_low_priority_frequency(&self) -> Duration {
        secs(self.very_low_priority_frequency_secs)
    }

    pub fn past_modifications_age(&self) -> Duration {
        secs(self.past_modifications_age_secs)
    }

    pub fn checkpoint_epsilon(&self) -> Duration {
        millis(self.checkpoint_epsilon_ms)
    }

    pub fn first_run_period(&self) -> Duration {
        secs(self.first_run_period_secs)
    }

    pub fn scheduler_frequency(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.scheduler_frequency_ms)
    }
}

// Clamped so absurd values saturate instead of overflowing chrono's range.
const MAX_MILLIS: u64 = (i64::MAX / 1_000_000) as u64;

fn millis(ms: u64) -> Duration {
    Duration::milliseconds(ms.min(MAX_MILLIS) as i64)
}

fn secs(s: u64) -> Duration {
    Duration::seconds(s.min(MAX_MILLIS / 1_000) as i64)
}
