//! # Pause Requests
//!
//! A modification running on a machine can ask that machine's activity
//! analysis to stand aside. At most one modification holds the pause at a
//! time; the holder is identified by its (non-zero) modification id.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::error::AnalysisError;

const NO_PAUSE: i64 = 0;

/// Shared pause flag of one machine.
#[derive(Debug, Clone, Default)]
pub struct PauseHandle {
    holder: Arc<AtomicI64>,
}

impl PauseHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the pause for `modification`. Returns `true` if it is now held
    /// by `modification`, including when it already was.
    pub fn request_pause(&self, modification: i64) -> bool {
        if modification == NO_PAUSE {
            return false;
        }
        match self.holder.compare_exchange(
            NO_PAUSE,
            modification,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {
                tracing::info!(modification, "pause requested");
                true
            }
            Err(current) if current == modification => true,
            Err(current) => {
                tracing::info!(modification, holder = current, "pause already held");
                false
            }
        }
    }

    /// Release the pause held by `modification`.
    pub fn release_pause(&self, modification: i64) -> Result<(), AnalysisError> {
        match self.holder.compare_exchange(
            modification,
            NO_PAUSE,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) if modification != NO_PAUSE => {
                tracing::info!(modification, "pause released");
                Ok(())
            }
            _ => {
                tracing::error!(modification, "release of a pause that is not held");
                Err(AnalysisError::PauseNotHeld(modification))
            }
        }
    }

    pub fn is_in_pause(&self, modification: i64) -> bool {
        modification != NO_PAUSE && self.holder.load(Ordering::SeqCst) == modification
    }

    pub fn is_pause_requested(&self) -> bool {
        self.holder.load(Ordering::SeqCst) != NO_PAUSE
    }

    /// Modification currently holding the pause.
    pub fn holder(&self) -> Option<i64> {
        match self.holder.load(Ordering::SeqCst) {
            NO_PAUSE => None,
            id => Some(id),
        }
    }
}
