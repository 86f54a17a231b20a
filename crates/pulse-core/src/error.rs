//! # Error Types
//!
//! Errors raised by the foundational types. Higher crates wrap `CoreError`
//! in their own enums through `#[from]`.

use thiserror::Error;

/// Top-level error type for the core primitives.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A range was built with its lower bound after its upper bound.
    #[error("invalid range: lower bound {lower} is after upper bound {upper}")]
    InvalidRange {
        /// Rendered lower bound.
        lower: String,
        /// Rendered upper bound.
        upper: String,
    },

    /// Configuration document failed validation.
    #[error("invalid configuration: {}", issues.join("; "))]
    InvalidConfig {
        /// Every validation issue found, in document order.
        issues: Vec<String>,
    },

    /// YAML parsing failed.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
