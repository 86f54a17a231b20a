//! # Scenario Documents
//!
//! A scenario is a YAML document describing a small plant: machines, the
//! facts and cycles acquisition produced for them, the reason catalogue,
//! scripted dynamic-time answers and the auto-reason instances to run.
//!
//! ```yaml
//! start: 2024-01-01T02:00:00Z
//! step_secs: 60
//! machines:
//!   - id: 1
//!     name: press
//! cycles:
//!   - machine: 1
//!     end: 2024-01-01T00:10:00Z
//! extensions:
//!   CycleEnd:
//!     - instance: main
//!       default_reason_key: CycleEnd
//!       start: 2024-01-01T00:00:00Z
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use pulse_autoreason::{ScriptedAnswer, ScriptedResolver, YamlConfigurationProvider};
use pulse_core::{EngineConfig, Machine};
use pulse_store::{Cycle, Fact, InMemoryStore, Reason};

/// Engine and extension configuration, the part of a scenario that
/// `pulse validate` checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigDocument {
    pub engine: EngineConfig,
    pub extensions: YamlConfigurationProvider,
}

/// A complete simulation input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Clock value of the first round.
    pub start: DateTime<Utc>,
    /// Clock advance between two rounds.
    #[serde(default = "default_step_secs")]
    pub step_secs: u64,
    #[serde(default)]
    pub engine: EngineConfig,
    pub machines: Vec<Machine>,
    #[serde(default)]
    pub reasons: Vec<Reason>,
    #[serde(default)]
    pub facts: Vec<Fact>,
    #[serde(default)]
    pub cycles: Vec<Cycle>,
    #[serde(default)]
    pub answers: Vec<ScriptedAnswer>,
    #[serde(default)]
    pub extensions: YamlConfigurationProvider,
}

fn default_step_secs() -> u64 {
    60
}

impl Scenario {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        serde_yaml::from_str(s).context("malformed scenario document")
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read scenario {}", path.display()))?;
        Self::from_yaml_str(&content)
    }

    pub fn step(&self) -> Duration {
        Duration::seconds(i64::try_from(self.step_secs).unwrap_or(i64::MAX))
    }

    /// In-memory store holding the scenario's records.
    pub fn seed_store(&self) -> InMemoryStore {
        let store = InMemoryStore::new();
        for reason in &self.reasons {
            store.insert_reason(reason.clone());
        }
        for fact in &self.facts {
            store.upsert_fact(fact.clone());
        }
        for cycle in &self.cycles {
            store.insert_cycle(cycle.clone());
        }
        store
    }

    pub fn resolver(&self) -> ScriptedResolver {
        let resolver = ScriptedResolver::new();
        resolver.load(self.answers.iter().cloned());
        resolver
    }
}
