//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A textual duration could not be parsed
    #[error("invalid duration {input:?}: {reason}")]
    InvalidDuration { input: String, reason: String },

    /// A timer mode name was not recognized
    #[error("unknown timer mode {0:?}")]
    UnknownMode(String),

    /// Configuration value outside its allowed range
    #[error("invalid {field}: {reason}")]
    InvalidConfig { field: String, reason: String },
}

impl DomainError {
    /// Creates an invalid-config error.
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
