//! # Domain Identity Newtypes
//!
//! Newtype wrappers for the identifiers the engine passes around. You cannot
//! pass a `MachineModuleId` where a `MachineId` is expected, and a reason id
//! is never a bare integer.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a monitored machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(pub u32);

/// Identifier of a machine module (spindle, path, etc).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineModuleId(pub u32);

/// Identifier of a reason in the reason catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReasonId(pub u32);

/// Identifier of a persisted reason assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssignmentId(pub Uuid);

impl AssignmentId {
    /// Generate a new random assignment identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for MachineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "machine:{}", self.0)
    }
}

impl std::fmt::Display for MachineModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "module:{}", self.0)
    }
}

impl std::fmt::Display for ReasonId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "reason:{}", self.0)
    }
}

impl std::fmt::Display for AssignmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "assignment:{}", self.0)
    }
}

/// A monitored machine and its modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    /// Machine identifier.
    pub id: MachineId,
    /// Display name, used in log fields only.
    #[serde(default)]
    pub name: String,
    /// Modules attached to the machine, in display order.
    #[serde(default)]
    pub modules: Vec<MachineModuleId>,
}

impl Machine {
    pub fn new(id: MachineId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            modules: Vec::new(),
        }
    }

    /// Builder-style module registration.
    pub fn with_modules(mut self, modules: impl IntoIterator<Item = MachineModuleId>) -> Self {
        self.modules.extend(modules);
        self
    }
}

/// Allow/deny list of machines.
///
/// An empty `include` list admits every machine not explicitly excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineFilter {
    pub include: Vec<MachineId>,
    pub exclude: Vec<MachineId>,
}

impl MachineFilter {
    pub fn matches(&self, machine: MachineId) -> bool {
        (self.include.is_empty() || self.include.contains(&machine))
            && !self.exclude.contains(&machine)
    }
}
