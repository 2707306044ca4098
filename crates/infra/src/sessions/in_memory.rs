use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use neuroviz_core::{SessionId, UserId};

use super::{SessionHandle, SessionLookupError, SessionResolver};

#[derive(Debug, Clone)]
struct SessionRecord {
    owner: UserId,
    data_locator: Option<String>,
}

/// In-memory session directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySessionDirectory {
    sessions: RwLock<HashMap<SessionId, SessionRecord>>,
}

impl InMemorySessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session for `owner` and return its id.
    pub fn register(&self, owner: UserId, data_locator: impl Into<String>) -> SessionId {
        let id = SessionId::new();
        self.insert(id, owner, Some(data_locator.into()));
        id
    }

    /// Insert or replace a session record.
    pub fn insert(&self, id: SessionId, owner: UserId, data_locator: Option<String>) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.insert(id, SessionRecord { owner, data_locator });
        }
    }

    pub fn remove(&self, id: SessionId) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.remove(&id);
        }
    }
}

#[async_trait]
impl SessionResolver for InMemorySessionDirectory {
    async fn resolve(
        &self,
        session_id: SessionId,
        caller: UserId,
    ) -> Result<Option<SessionHandle>, SessionLookupError> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| SessionLookupError::Storage("session directory lock poisoned".into()))?;
        Ok(sessions
            .get(&session_id)
            .filter(|record| record.owner == caller)
            .and_then(|record| {
                record.data_locator.clone().map(|data_locator| SessionHandle {
                    id: session_id,
                    data_locator,
                })
            }))
    }
}
