//! # Persisted Records
//!
//! The records the engine reads and writes through a transaction. Facts
//! and cycles are produced upstream by acquisition; checkpoints, reasons
//! and reason assignments are written by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pulse_core::{AssignmentId, MachineId, MachineModuleId, ReasonId, UtcRange};

/// Coarse activity category of a machine over a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineMode {
    Active,
    Idle,
    Stopped,
    Error,
    Unknown,
}

impl MachineMode {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for MachineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "ACTIVE",
            Self::Idle => "IDLE",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// A period during which a machine stayed in one mode.
///
/// The latest fact of a machine is usually still open (`upper == +oo`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub machine: MachineId,
    pub range: UtcRange,
    pub mode: MachineMode,
}

/// A completed production cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    pub machine: MachineId,
    /// Module that ran the cycle, `None` for machine-level cycles.
    #[serde(default)]
    pub module: Option<MachineModuleId>,
    #[serde(default)]
    pub begin: Option<DateTime<Utc>>,
    pub end: DateTime<Utc>,
}

/// An entry of the reason catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub id: ReasonId,
    /// Translation key, also used to look up default reasons.
    pub translation_key: String,
}

/// A reason applied to a period of a machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasonAssignment {
    pub id: AssignmentId,
    pub machine: MachineId,
    pub reason: ReasonId,
    /// Confidence of the automatic assignment.
    pub score: f64,
    /// Persisted range, `[requested.lower, resolved end)`.
    pub range: UtcRange,
    /// Range the applying action asked for. Two assignments with the same
    /// machine, reason and requested range are the same assignment.
    pub requested_range: UtcRange,
    /// Name of the dynamic-time resolver that fixed the end, empty if none.
    pub dynamic_end_selector: String,
    pub details: String,
    pub overwrite_required: bool,
    /// Checkpoint key prefix of the extension that created it.
    pub origin: String,
    pub created_at: DateTime<Utc>,
}

/// Key of a persisted checkpoint.
///
/// Rendered as `{plugin}.{instance}.DateTime` for machine checkpoints and
/// `{plugin}.{instance}.DateTime.{module}` for module checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckpointKey {
    pub machine: MachineId,
    pub key: String,
}

impl CheckpointKey {
    pub fn machine(machine: MachineId, prefix: &str) -> Self {
        Self {
            machine,
            key: format!("{prefix}.DateTime"),
        }
    }

    pub fn module(machine: MachineId, prefix: &str, module: MachineModuleId) -> Self {
        Self {
            machine,
            key: format!("{prefix}.DateTime.{}", module.0),
        }
    }
}

impl std::fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.machine, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_key_rendering() {
        let k = CheckpointKey::machine(MachineId(3), "CycleEnd.main");
        assert_eq!(k.key, "CycleEnd.main.DateTime");
        let m = CheckpointKey::module(MachineId(3), "CycleEnd.main", MachineModuleId(31));
        assert_eq!(m.key, "CycleEnd.main.DateTime.31");
        assert_eq!(m.to_string(), "machine:3/CycleEnd.main.DateTime.31");
    }

    #[test]
    fn test_machine_mode_serde_snake_case() {
        let json = serde_json::to_string(&MachineMode::Idle).unwrap();
        assert_eq!(json, "\"idle\"");
        assert!(!MachineMode::Idle.is_active());
        assert!(MachineMode::Active.is_active());
    }
}
