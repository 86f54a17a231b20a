//! # Store Errors
//!
//! Every storage failure is fatal to the current pass: the transaction is
//! rolled back and the scheduler retries on its next round. The transient
//! variants are only logged at a lower level.

use thiserror::Error;

/// Error raised by a [`Store`](crate::Store) or one of its transactions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Another transaction committed a conflicting write.
    #[error("serialization conflict in transaction {label}")]
    Conflict {
        /// Label of the failed transaction.
        label: String,
    },

    /// The backend did not answer in time.
    #[error("transaction {label} timed out")]
    Timeout {
        /// Label of the failed transaction.
        label: String,
    },

    /// The backend is temporarily unreachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The commit was refused for a non-retryable reason.
    #[error("commit of transaction {label} failed: {reason}")]
    CommitFailed {
        /// Label of the failed transaction.
        label: String,
        /// Backend explanation.
        reason: String,
    },

    /// A referenced record does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Record kind.
        entity: &'static str,
        /// Rendered identifier.
        id: String,
    },
}

impl StoreError {
    /// Whether retrying the same work later is expected to succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::Timeout { .. } | Self::Unavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Conflict { label: "t".into() }.is_transient());
        assert!(StoreError::Timeout { label: "t".into() }.is_transient());
        assert!(StoreError::Unavailable("db restarting".into()).is_transient());
        assert!(!StoreError::CommitFailed {
            label: "t".into(),
            reason: "constraint".into()
        }
        .is_transient());
        assert!(!StoreError::NotFound {
            entity: "reason",
            id: "7".into()
        }
        .is_transient());
    }
}
