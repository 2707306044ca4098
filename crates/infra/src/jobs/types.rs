//! Core job types and the lifecycle state machine.
//!
//! ```text
//! PENDING --start--> RUNNING --succeed--> COMPLETED
//!                            --fail-----> FAILED
//! ```
//!
//! Transitions are pure: each returns the next snapshot and leaves the
//! receiver untouched, so the caller can hand `(expected, next)` to
//! [`JobStore::compare_and_set`](super::JobStore::compare_and_set).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use neuroviz_core::{DomainError, JobId, SessionId, UserId};

/// Kind of processing work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    Preprocess,
    Analytics,
    Classify,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Preprocess => "PREPROCESS",
            JobKind::Analytics => "ANALYTICS",
            JobKind::Classify => "CLASSIFY",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PREPROCESS" => Ok(JobKind::Preprocess),
            "ANALYTICS" => Ok(JobKind::Analytics),
            "CLASSIFY" => Ok(JobKind::Classify),
            other => Err(DomainError::validation(format!(
                "unknown job kind '{other}' (expected PREPROCESS, ANALYTICS or CLASSIFY)"
            ))),
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Persisted, waiting for its single execution.
    Pending,
    /// Execution claimed; the compute call is in flight.
    Running,
    /// Result attached (terminal).
    Completed,
    /// Error detail attached (terminal).
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobState::Pending),
            "RUNNING" => Ok(JobState::Running),
            "COMPLETED" => Ok(JobState::Completed),
            "FAILED" => Ok(JobState::Failed),
            other => Err(DomainError::validation(format!("unknown job state '{other}'"))),
        }
    }
}

/// Why a job ended up FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeout or connection failure talking to the compute service.
    ComputeUnavailable,
    /// The compute service answered with a non-success response.
    ComputeRejected,
    /// The owning session no longer resolves.
    SessionNotFound,
    /// The execution itself faulted (panic, store failure, corrupt params).
    Internal,
    /// Reclaimed by the stale-running sweep.
    Stale,
}

/// Structured error detail recorded on a FAILED job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    /// Build a failure detail. The message is never empty.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            format!("{kind:?} failure")
        } else {
            message
        };
        Self { kind, message }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// A transition was attempted from a state that does not allow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid state transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: JobState,
    pub to: JobState,
}

/// One unit of dispatched processing work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub session_id: SessionId,
    /// Caller that created the job (owner of the session at creation time).
    pub owner_id: UserId,
    pub kind: JobKind,
    pub state: JobState,
    /// Validated input parameters, as recorded at creation.
    pub params: JsonValue,
    pub result: Option<JsonValue>,
    pub error: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new PENDING job.
    pub fn new(session_id: SessionId, owner_id: UserId, kind: JobKind, params: JsonValue) -> Self {
        Self {
            id: JobId::new(),
            session_id,
            owner_id,
            kind,
            state: JobState::Pending,
            params,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// PENDING -> RUNNING. Records the start time (never before creation).
    pub fn start(&self, at: DateTime<Utc>) -> Result<Job, TransitionError> {
        self.expect_state(JobState::Pending, JobState::Running)?;
        let mut next = self.clone();
        next.state = JobState::Running;
        next.started_at = Some(at.max(self.created_at));
        Ok(next)
    }

    /// RUNNING -> COMPLETED with the result payload attached.
    pub fn succeed(&self, result: JsonValue, at: DateTime<Utc>) -> Result<Job, TransitionError> {
        self.expect_state(JobState::Running, JobState::Completed)?;
        let mut next = self.clone();
        next.state = JobState::Completed;
        next.result = Some(result);
        next.completed_at = Some(self.completion_time(at));
        Ok(next)
    }

    /// RUNNING -> FAILED with the error detail attached.
    pub fn fail(&self, failure: JobFailure, at: DateTime<Utc>) -> Result<Job, TransitionError> {
        self.expect_state(JobState::Running, JobState::Failed)?;
        let mut next = self.clone();
        next.state = JobState::Failed;
        next.error = Some(failure);
        next.completed_at = Some(self.completion_time(at));
        Ok(next)
    }

    fn expect_state(&self, required: JobState, to: JobState) -> Result<(), TransitionError> {
        if self.state == required {
            Ok(())
        } else {
            Err(TransitionError { from: self.state, to })
        }
    }

    fn completion_time(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        at.max(self.started_at.unwrap_or(self.created_at))
    }
}
