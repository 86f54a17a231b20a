//! # Analysis Services
//!
//! The collaborator behind the fixed phases of a pass: the modification
//! queue (pending and flagged modifications) and the machine state
//! templates. Each call receives an absolute deadline and returns whether
//! it finished all of its work before that deadline.
//!
//! `InMemoryServices` keeps the queue in memory and is what the scenario
//! runner and the tests use.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use pulse_core::{Clock, MachineId};
use pulse_store::StoreError;

/// Phase work delegated by the analysis context.
pub trait AnalysisServices: Send + Sync + std::fmt::Debug {
    fn is_clean_flagged_modifications_required(&self, machine: MachineId)
        -> Result<bool, StoreError>;

    fn clean_flagged_modifications(
        &self,
        machine: MachineId,
        deadline: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Process pending modifications whose priority reaches the threshold:
    /// `min_past_priority` for modifications older than the past age,
    /// `min_present_priority` for recent ones.
    fn run_pending_modifications(
        &self,
        machine: MachineId,
        deadline: DateTime<Utc>,
        min_past_priority: i32,
        min_present_priority: i32,
    ) -> Result<bool, StoreError>;

    /// Apply state-template changes from `present` up to `until`.
    fn manage_state_template_changes(
        &self,
        machine: MachineId,
        present: DateTime<Utc>,
        until: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

/// Lifecycle of a queued modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationStatus {
    Pending,
    Done,
    /// Processed but marked for cleanup.
    Flagged,
}

impl std::fmt::Display for ModificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Done => "DONE",
            Self::Flagged => "FLAGGED",
        };
        f.write_str(s)
    }
}

/// A queued modification of a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    pub id: i64,
    pub machine: MachineId,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub status: ModificationStatus,
}

/// Process-local modification queue and template tracker.
#[derive(Debug)]
pub struct InMemoryServices {
    clock: Arc<dyn Clock>,
    past_age: Duration,
    modifications: Mutex<Vec<Modification>>,
    templates_until: Mutex<HashMap<MachineId, DateTime<Utc>>>,
}

impl InMemoryServices {
    pub fn new(clock: Arc<dyn Clock>, past_age: Duration) -> Self {
        Self {
            clock,
            past_age,
            modifications: Mutex::new(Vec::new()),
            templates_until: Mutex::new(HashMap::new()),
        }
    }

    pub fn push(&self, modification: Modification) {
        self.modifications.lock().push(modification);
    }

    pub fn modifications(&self, machine: MachineId) -> Vec<Modification> {
        self.modifications
            .lock()
            .iter()
            .filter(|m| m.machine == machine)
            .cloned()
            .collect()
    }

    /// Instant up to which state templates were applied.
    pub fn templates_until(&self, machine: MachineId) -> Option<DateTime<Utc>> {
        self.templates_until.lock().get(&machine).copied()
    }
}

impl AnalysisServices for InMemoryServices {
    fn is_clean_flagged_modifications_required(
        &self,
        machine: MachineId,
    ) -> Result<bool, StoreError> {
        Ok(self
            .modifications
            .lock()
            .iter()
            .any(|m| m.machine == machine && m.status == ModificationStatus::Flagged))
    }

    fn clean_flagged_modifications(
        &self,
        machine: MachineId,
        deadline: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut modifications = self.modifications.lock();
        let mut removed = 0usize;
        loop {
            let Some(index) = modifications
                .iter()
                .position(|m| m.machine == machine && m.status == ModificationStatus::Flagged)
            else {
                tracing::debug!(machine = %machine, removed, "flagged modifications cleaned");
                return Ok(true);
            };
            if self.clock.now() >= deadline {
                tracing::debug!(machine = %machine, removed, "clean interrupted by deadline");
                return Ok(false);
            }
            modifications.remove(index);
            removed += 1;
        }
    }

    fn run_pending_modifications(
        &self,
        machine: MachineId,
        deadline: DateTime<Utc>,
        min_past_priority: i32,
        min_present_priority: i32,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let past_limit = now - self.past_age;
        let mut modifications = self.modifications.lock();
        let mut eligible: Vec<usize> = modifications
            .iter()
            .enumerate()
            .filter(|(_, m)| m.machine == machine && m.status == ModificationStatus::Pending)
            .filter(|(_, m)| {
                let threshold = if m.created_at < past_limit {
                    min_past_priority
                } else {
                    min_present_priority
                };
                m.priority >= threshold
            })
            .map(|(i, _)| i)
            .collect();
        eligible.sort_by(|&a, &b| {
            modifications[b]
                .priority
                .cmp(&modifications[a].priority)
                .then(modifications[a].created_at.cmp(&modifications[b].created_at))
        });

        for index in eligible {
            if self.clock.now() >= deadline {
                return Ok(false);
            }
            modifications[index].status = ModificationStatus::Done;
        }
        Ok(true)
    }

    fn manage_state_template_changes(
        &self,
        machine: MachineId,
        present: DateTime<Utc>,
        until: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if present >= deadline {
            return Ok(false);
        }
        let mut templates = self.templates_until.lock();
        let entry = templates.entry(machine).or_insert(until);
        if *entry < until {
            *entry = until;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pulse_core::ManualClock;

    const M: MachineId = MachineId(1);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn services() -> InMemoryServices {
        InMemoryServices::new(Arc::new(ManualClock::new(t0())), Duration::minutes(20))
    }

    fn modification(id: i64, priority: i32, age_minutes: i64, status: ModificationStatus) -> Modification {
        Modification {
            id,
            machine: M,
            priority,
            created_at: t0() - Duration::minutes(age_minutes),
            status,
        }
    }

    #[test]
    fn test_clean_removes_flagged_only() {
        let s = services();
        s.push(modification(1, 50, 0, ModificationStatus::Flagged));
        s.push(modification(2, 50, 0, ModificationStatus::Pending));
        assert!(s.is_clean_flagged_modifications_required(M).unwrap());
        assert!(s.clean_flagged_modifications(M, t0() + Duration::minutes(1)).unwrap());
        assert!(!s.is_clean_flagged_modifications_required(M).unwrap());
        assert_eq!(s.modifications(M).len(), 1);
    }

    #[test]
    fn test_clean_respects_deadline() {
        let s = services();
        s.push(modification(1, 50, 0, ModificationStatus::Flagged));
        assert!(!s.clean_flagged_modifications(M, t0()).unwrap());
        assert!(s.is_clean_flagged_modifications_required(M).unwrap());
    }

    #[test]
    fn test_pending_thresholds_split_past_and_present() {
        let s = services();
        s.push(modification(1, 10, 60, ModificationStatus::Pending));
        s.push(modification(2, 10, 1, ModificationStatus::Pending));
        s.push(modification(3, 100, 1, ModificationStatus::Pending));
        // Past modifications of any priority, present ones from 50.
        assert!(s
            .run_pending_modifications(M, t0() + Duration::minutes(1), 0, 50)
            .unwrap());
        let statuses: Vec<_> = s.modifications(M).iter().map(|m| m.status).collect();
        assert_eq!(
            statuses,
            vec![
                ModificationStatus::Done,
                ModificationStatus::Pending,
                ModificationStatus::Done
            ]
        );
    }

    #[test]
    fn test_state_templates_only_move_forward() {
        let s = services();
        let later = t0() + Duration::days(7);
        assert!(s
            .manage_state_template_changes(M, t0(), later, t0() + Duration::minutes(1))
            .unwrap());
        s.manage_state_template_changes(M, t0(), t0() + Duration::days(1), t0() + Duration::minutes(1))
            .unwrap();
        assert_eq!(s.templates_until(M), Some(later));
    }
}
