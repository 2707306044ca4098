use thiserror::Error;

/// Failure modes of a compute-service call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComputeError {
    /// The call did not finish within the configured timeout.
    #[error("compute service timed out after {0}s")]
    Timeout(u64),

    /// The service could not be reached (connection refused, DNS, reset).
    #[error("compute service unavailable: {0}")]
    Unavailable(String),

    /// The service answered with a non-success status.
    #[error("compute service rejected the request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    /// A success status whose body is not a JSON document.
    #[error("compute service returned an invalid response: {0}")]
    InvalidResponse(String),
}

impl ComputeError {
    /// Timeouts and connection failures, as opposed to an explicit answer.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ComputeError::Timeout(_) | ComputeError::Unavailable(_))
    }
}
