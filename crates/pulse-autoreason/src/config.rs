//! # Auto-Reason Configuration
//!
//! One `AutoReasonConfig` per extension instance. A plugin (rule) may run
//! several instances with different reasons, scores or machine filters;
//! each instance keeps its own checkpoints under
//! `{plugin}.{instance}.DateTime`.
//!
//! ```yaml
//! CycleEnd:
//!   - instance: main
//!     default_reason_key: ReasonCycleEnd
//!     reason_score: 60
//!     dynamic_end: NextCycleStart
//!     aggressive: true
//! LongIdle:
//!   - instance: ten-minutes
//!     reason_id: 4
//!     min_duration_secs: 600
//!     audit:
//!       mode: drift_above
//!       secs: 60
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use pulse_core::{MachineFilter, ReasonId};

/// Error loading or validating extension configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The instance failed validation.
    #[error("invalid configuration {instance}: {}", issues.join("; "))]
    Invalid {
        /// Instance identifier.
        instance: String,
        /// Every problem found.
        issues: Vec<String>,
    },
}

/// When the consistency audit resets the checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum AuditPolicy {
    /// No audit runs.
    #[default]
    Never,
    /// Any mismatch resets the checkpoint.
    Always,
    /// Mismatches up to `secs` are only logged.
    DriftAbove { secs: u64 },
}

impl AuditPolicy {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Never)
    }

    /// Whether a mismatch of `drift` calls for a reset.
    pub fn requires_reset(&self, drift: Duration) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::DriftAbove { secs } => {
                drift > Duration::seconds(i64::try_from(*secs).unwrap_or(i64::MAX / 1000))
            }
        }
    }
}

/// Configuration of one extension instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoReasonConfig {
    /// Instance identifier, unique within a plugin.
    pub instance: String,
    /// Reason to apply.
    pub reason_id: Option<ReasonId>,
    /// Translation key of the reason, looked up (or created) when
    /// `reason_id` is not set.
    pub default_reason_key: Option<String>,
    /// Score of applied assignments.
    pub reason_score: f64,
    /// Score of manual assignments on the same machines, if any.
    pub manual_score: Option<f64>,
    pub machines: MachineFilter,
    /// Dynamic-time selector fixing the end of an applied period. Empty
    /// means the detected range is applied as is.
    pub dynamic_end: String,
    /// Shortest period a rule reports.
    pub min_duration_secs: u64,
    pub overwrite_required: bool,
    /// Skip periods whose resolved end falls before their real end.
    pub aggressive: bool,
    /// Details recorded on applied assignments.
    pub details: String,
    /// Position among a machine's extensions; higher runs first.
    pub priority: i32,
    /// Initial checkpoint. Defaults to the engine's first-run period before
    /// now.
    pub start: Option<DateTime<Utc>>,
    pub audit: AuditPolicy,
    /// Track one checkpoint per machine module instead of one per machine.
    pub per_module: bool,
}

impl Default for AutoReasonConfig {
    fn default() -> Self {
        Self {
            instance: "default".to_string(),
            reason_id: None,
            default_reason_key: None,
            reason_score: 60.0,
            manual_score: None,
            machines: MachineFilter::default(),
            dynamic_end: String::new(),
            min_duration_secs: 0,
            overwrite_required: false,
            aggressive: false,
            details: String::new(),
            priority: 0,
            start: None,
            audit: AuditPolicy::Never,
            per_module: false,
        }
    }
}

impl AutoReasonConfig {
    /// Validate the instance, collecting every issue.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut issues = Vec::new();
        if self.instance.trim().is_empty() {
            issues.push("instance must not be empty".to_string());
        }
        if self.instance.contains('.') {
            issues.push(format!("instance {:?} must not contain '.'", self.instance));
        }
        let has_key = self
            .default_reason_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty());
        if self.reason_id.is_none() && !has_key {
            issues.push("either reason_id or default_reason_key is required".to_string());
        }
        if !self.reason_score.is_finite() || self.reason_score < 0.0 {
            issues.push(format!(
                "reason_score must be a non-negative number, got {}",
                self.reason_score
            ));
        }
        if let Some(manual) = self.manual_score {
            if !manual.is_finite() {
                issues.push(format!("manual_score must be a number, got {manual}"));
            } else if manual <= self.reason_score {
                issues.push(format!(
                    "manual_score {manual} must be above reason_score {}",
                    self.reason_score
                ));
            }
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid {
                instance: self.instance.clone(),
                issues,
            })
        }
    }

    pub fn min_duration(&self) -> Duration {
        Duration::seconds(i64::try_from(self.min_duration_secs).unwrap_or(i64::MAX / 1000))
    }

    /// Whether an existing assignment with `existing_score` may be replaced
    /// by this instance.
    pub fn can_override(&self, existing_score: f64) -> bool {
        existing_score < self.reason_score
    }
}

/// Source of extension instances, keyed by plugin.
pub trait ConfigurationProvider: Send + Sync {
    fn configurations(&self, plugin_key: &str) -> Result<Vec<AutoReasonConfig>, ConfigError>;
}

/// Provider backed by a YAML document mapping plugin keys to instance
/// lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct YamlConfigurationProvider {
    plugins: BTreeMap<String, Vec<AutoReasonConfig>>,
}

impl YamlConfigurationProvider {
    pub fn new(plugins: BTreeMap<String, Vec<AutoReasonConfig>>) -> Self {
        Self { plugins }
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn plugin_keys(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    /// Validation issues of every instance, as `(plugin, error)`.
    pub fn validate_all(&self) -> Vec<(String, ConfigError)> {
        self.plugins
            .iter()
            .flat_map(|(plugin, configs)| {
                configs
                    .iter()
                    .filter_map(|c| c.validate().err())
                    .map(move |e| (plugin.clone(), e))
            })
            .collect()
    }
}

impl ConfigurationProvider for YamlConfigurationProvider {
    fn configurations(&self, plugin_key: &str) -> Result<Vec<AutoReasonConfig>, ConfigError> {
        Ok(self.plugins.get(plugin_key).cloned().unwrap_or_default())
    }
}
