//! Session lookup.
//!
//! A session is owned by one user and points at a recording. The job
//! engine only needs to know whether the session resolves for a caller and
//! where its data lives.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;

use neuroviz_core::{SessionId, UserId};

pub use in_memory::InMemorySessionDirectory;
pub use postgres::PostgresSessionDirectory;

/// A session as seen by the job engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: SessionId,
    /// Where the session's recording lives (passed to the compute service).
    pub data_locator: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionLookupError {
    #[error("session storage error: {0}")]
    Storage(String),
}

/// Resolves a session for a calling user.
///
/// `Ok(None)` means the session does not exist, is not owned by `caller`,
/// or has no recording attached. The three cases are deliberately
/// indistinguishable to callers.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(
        &self,
        session_id: SessionId,
        caller: UserId,
    ) -> Result<Option<SessionHandle>, SessionLookupError>;
}
