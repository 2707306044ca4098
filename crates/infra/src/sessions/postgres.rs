//! Postgres-backed session directory.
//!
//! Reads the `sessions` table owned by the session-management side of the
//! system. Only `id`, `user_id` and `file_path` are consulted.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use neuroviz_core::{SessionId, UserId};

use super::{SessionHandle, SessionLookupError, SessionResolver};

#[derive(Debug, Clone)]
pub struct PostgresSessionDirectory {
    pool: Arc<PgPool>,
}

impl PostgresSessionDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn from_shared(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionResolver for PostgresSessionDirectory {
    #[instrument(skip(self), fields(session_id = %session_id, caller = %caller), err)]
    async fn resolve(
        &self,
        session_id: SessionId,
        caller: UserId,
    ) -> Result<Option<SessionHandle>, SessionLookupError> {
        let row = sqlx::query(
            r#"
            SELECT file_path
            FROM sessions
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(session_id.as_uuid())
        .bind(caller.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| SessionLookupError::Storage(format!("resolve session: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let file_path: Option<String> = row
            .try_get("file_path")
            .map_err(|e| SessionLookupError::Storage(format!("decode session row: {e}")))?;

        Ok(file_path
            .filter(|p| !p.trim().is_empty())
            .map(|data_locator| SessionHandle {
                id: session_id,
                data_locator,
            }))
    }
}
