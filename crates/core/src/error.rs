//! Errors raised by domain primitives.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Failures that depend only on the input value, never on I/O.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Job parameters or another domain value are out of contract.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A path or query segment is not a valid job, session or user id.
    #[error("'{value}' is not a valid {id_type}: {reason}")]
    InvalidId {
        id_type: &'static str,
        value: String,
        reason: String,
    },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(id_type: &'static str, value: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidId {
            id_type,
            value: value.into(),
            reason: reason.to_string(),
        }
    }
}
