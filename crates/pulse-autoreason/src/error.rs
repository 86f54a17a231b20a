//! # Auto-Reason Errors

use thiserror::Error;

use pulse_analysis::AnalysisError;
use pulse_core::CoreError;
use pulse_store::StoreError;

use crate::dynamic_time::ResolveError;

/// Error aborting one auto-reason run. The transaction is rolled back and
/// the checkpoint stays where it was.
#[derive(Error, Debug)]
pub enum AutoReasonError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("dynamic time error: {0}")]
    Resolve(#[from] ResolveError),

    /// A rule derived an invalid range.
    #[error("range error: {0}")]
    Range(#[from] CoreError),
}

impl AutoReasonError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Resolve(_) | Self::Range(_) => false,
        }
    }

    /// Wrap as the pipeline error of `extension`.
    pub fn into_analysis_error(self, extension: &str) -> AnalysisError {
        match self {
            Self::Store(e) => AnalysisError::Store(e),
            other => AnalysisError::Extension {
                extension: extension.to_string(),
                transient: other.is_transient(),
                message: other.to_string(),
            },
        }
    }
}
