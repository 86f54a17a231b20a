//! # Analysis Errors
//!
//! The error type of the activity pipeline. Any variant aborts the current
//! pass; the scheduler logs it and retries on its next round.

use thiserror::Error;

use pulse_state::StateError;
use pulse_store::StoreError;

/// Error raised while running an analysis pass.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Persistence failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The pipeline could not be wired.
    #[error("pipeline wiring error: {0}")]
    Wiring(#[from] StateError),

    /// An extension sub-state failed.
    #[error("extension {extension} failed: {message}")]
    Extension {
        /// Extension name.
        extension: String,
        /// Rendered cause.
        message: String,
        /// Whether a retry on a later pass is expected to succeed.
        transient: bool,
    },

    /// A pause was released by a modification that does not hold it.
    #[error("pause is not held by modification {0}")]
    PauseNotHeld(i64),
}

impl AnalysisError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Extension { transient, .. } => *transient,
            Self::Wiring(_) | Self::PauseNotHeld(_) => false,
        }
    }
}
