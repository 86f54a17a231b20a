//! # Time Budget
//!
//! A `Budget` is the only cancellation point of a pass. Action states
//! consult it between their sub-steps and hand it down to collaborators as
//! an absolute deadline.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use pulse_core::Clock;

/// Wall-clock allowance of one pass.
#[derive(Debug, Clone)]
pub struct Budget {
    clock: Arc<dyn Clock>,
    started: DateTime<Utc>,
    max: Duration,
}

impl Budget {
    /// Start a budget of `max` from the clock's current instant.
    pub fn start(clock: Arc<dyn Clock>, max: Duration) -> Self {
        let started = clock.now();
        Self {
            clock,
            started,
            max,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.started + self.max
    }

    pub fn is_exceeded(&self) -> bool {
        self.now() >= self.deadline()
    }

    /// Time left before the deadline, never negative.
    pub fn remaining(&self) -> Duration {
        let left = self.deadline() - self.now();
        if left < Duration::zero() {
            Duration::zero()
        } else {
            left
        }
    }

    /// Deadline for one phase of the pass.
    ///
    /// The phase may not run past `now + local_max`, nor past the pass
    /// deadline, except that it is always granted `now + local_min`.
    pub fn local_deadline(&self, local_max: Duration, local_min: Duration) -> DateTime<Utc> {
        if local_max < local_min {
            tracing::info!(
                max_ms = local_max.num_milliseconds(),
                min_ms = local_min.num_milliseconds(),
                "local max time is shorter than local min time"
            );
        }
        let now = self.now();
        let pass_deadline = self.deadline();
        let local_max_deadline = now + local_max;
        let local_min_deadline = now + local_min;
        if pass_deadline < local_max_deadline {
            pass_deadline.max(local_min_deadline)
        } else {
            local_max_deadline
        }
    }
}
