//! # Dynamic Time Resolution
//!
//! A dynamic-time resolver computes the end of a period that is not known
//! yet when a rule fires, e.g. "the next cycle start after this idle
//! period". Rules name a resolver through a selector string; the engine
//! only interprets the answer.
//!
//! ## Answers
//!
//! | Answer            | Meaning                                             |
//! |-------------------|-----------------------------------------------------|
//! | `final_at(t)`     | The end is known and is `t`.                        |
//! | `hint(range)`     | The end is not final yet, but lies in `range`.      |
//! | `no_data()`       | Not enough data yet. Retry on a later pass.         |
//! | `not_applicable()`| The period does not qualify for this resolver.      |

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use pulse_core::{MachineId, UtcRange};

/// Answer of a dynamic-time resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicTimeResponse {
    #[serde(rename = "final")]
    final_instant: Option<DateTime<Utc>>,
    hint: Option<UtcRange>,
    no_data: bool,
    not_applicable: bool,
}

impl DynamicTimeResponse {
    pub fn final_at(at: DateTime<Utc>) -> Self {
        Self {
            final_instant: Some(at),
            ..Self::default()
        }
    }

    pub fn hint(range: UtcRange) -> Self {
        Self {
            hint: Some(range),
            ..Self::default()
        }
    }

    pub fn no_data() -> Self {
        Self {
            no_data: true,
            ..Self::default()
        }
    }

    pub fn not_applicable() -> Self {
        Self {
            not_applicable: true,
            ..Self::default()
        }
    }

    /// The final end, unless the answer is `no_data` or `not_applicable`.
    pub fn final_instant(&self) -> Option<DateTime<Utc>> {
        if self.no_data || self.not_applicable {
            None
        } else {
            self.final_instant
        }
    }

    pub fn hint_range(&self) -> Option<&UtcRange> {
        self.hint.as_ref()
    }

    pub fn is_no_data(&self) -> bool {
        self.no_data
    }

    pub fn is_not_applicable(&self) -> bool {
        self.not_applicable
    }
}

/// Error raised by a resolver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// No resolver is registered under the selector.
    #[error("unknown dynamic time selector {0:?}")]
    UnknownSelector(String),

    /// The resolver failed.
    #[error("dynamic time {selector} failed for {machine}: {message}")]
    Failed {
        /// Selector of the failing resolver.
        selector: String,
        /// Machine the resolution was asked for.
        machine: MachineId,
        /// Resolver explanation.
        message: String,
    },
}

/// Computes the end of a period.
pub trait DynamicTimeResolver: Send + Sync + std::fmt::Debug {
    fn resolve(
        &self,
        selector: &str,
        machine: MachineId,
        range: &UtcRange,
    ) -> Result<DynamicTimeResponse, ResolveError>;
}

/// A scripted answer, as read from a scenario document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedAnswer {
    pub selector: String,
    pub machine: MachineId,
    pub response: DynamicTimeResponse,
}

/// Resolver answering from a script keyed by selector and machine.
///
/// Every call is recorded so tests can assert which ranges were resolved.
#[derive(Debug, Default)]
pub struct ScriptedResolver {
    answers: Mutex<HashMap<(String, MachineId), DynamicTimeResponse>>,
    calls: Mutex<Vec<(String, MachineId, UtcRange)>>,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the answer for `selector` on `machine`, replacing any earlier one.
    pub fn script(&self, selector: &str, machine: MachineId, response: DynamicTimeResponse) {
        self.answers
            .lock()
            .insert((selector.to_string(), machine), response);
    }

    pub fn load(&self, answers: impl IntoIterator<Item = ScriptedAnswer>) {
        for answer in answers {
            self.script(&answer.selector, answer.machine, answer.response);
        }
    }

    pub fn calls(&self) -> Vec<(String, MachineId, UtcRange)> {
        self.calls.lock().clone()
    }
}

impl DynamicTimeResolver for ScriptedResolver {
    fn resolve(
        &self,
        selector: &str,
        machine: MachineId,
        range: &UtcRange,
    ) -> Result<DynamicTimeResponse, ResolveError> {
        self.calls
            .lock()
            .push((selector.to_string(), machine, *range));
        self.answers
            .lock()
            .get(&(selector.to_string(), machine))
            .cloned()
            .ok_or_else(|| ResolveError::UnknownSelector(selector.to_string()))
    }
}
