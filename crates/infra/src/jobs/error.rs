use thiserror::Error;

use neuroviz_core::{DomainError, JobId, SessionId};

use crate::compute::ComputeError;
use crate::sessions::SessionLookupError;

use super::dispatcher::DispatchError;
use super::store::JobStoreError;
use super::types::{JobState, TransitionError};

/// Errors surfaced by job lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: JobState, to: JobState },

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("compute service unavailable: {0}")]
    ComputeUnavailable(String),

    #[error("compute service rejected the request (status {status}): {message}")]
    ComputeRejected { status: u16, message: String },

    #[error("job store error: {0}")]
    Store(JobStoreError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

pub type JobResult<T> = Result<T, JobError>;

impl From<TransitionError> for JobError {
    fn from(e: TransitionError) -> Self {
        JobError::InvalidStateTransition { from: e.from, to: e.to }
    }
}

impl From<DomainError> for JobError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Validation(msg) => JobError::InvalidParameters(msg),
            invalid @ DomainError::InvalidId { .. } => JobError::InvalidParameters(invalid.to_string()),
        }
    }
}

impl From<ComputeError> for JobError {
    fn from(e: ComputeError) -> Self {
        match e {
            ComputeError::Timeout(_) | ComputeError::Unavailable(_) => {
                JobError::ComputeUnavailable(e.to_string())
            }
            ComputeError::Rejected { status, message } => {
                JobError::ComputeRejected { status, message }
            }
            ComputeError::InvalidResponse(msg) => JobError::ComputeRejected {
                status: 200,
                message: format!("invalid response: {msg}"),
            },
        }
    }
}

impl From<SessionLookupError> for JobError {
    fn from(e: SessionLookupError) -> Self {
        JobError::Store(JobStoreError::Storage(e.to_string()))
    }
}

/// Plain store failures. CAS conflicts are mapped by the lifecycle itself,
/// which knows the transition that was attempted.
impl From<JobStoreError> for JobError {
    fn from(e: JobStoreError) -> Self {
        match e {
            JobStoreError::NotFound(id) => JobError::JobNotFound(id),
            other => JobError::Store(other),
        }
    }
}
