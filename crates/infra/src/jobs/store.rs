//! Job storage with compare-and-set state updates.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use neuroviz_core::{JobId, SessionId};

use super::types::{Job, JobKind, JobState};

/// Durable job records.
///
/// Every state change goes through [`compare_and_set`](JobStore::compare_and_set):
/// the replacement is applied only if the stored state still equals
/// `expected`, atomically with respect to other CAS calls on the same id.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job.
    async fn insert(&self, job: Job) -> Result<(), JobStoreError>;

    /// Current snapshot of a job.
    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Replace the job if its stored state is `expected`.
    async fn compare_and_set(
        &self,
        job_id: JobId,
        expected: JobState,
        new: Job,
    ) -> Result<(), JobStoreError>;

    /// Jobs of one session, newest first.
    async fn list_by_session(
        &self,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError>;

    /// Jobs currently in `state`, oldest first.
    async fn list_by_state(&self, state: JobState, limit: usize) -> Result<Vec<Job>, JobStoreError>;

    /// The COMPLETED job of `kind` in a session with the latest `completed_at`.
    async fn latest_completed(
        &self,
        session_id: SessionId,
        kind: JobKind,
    ) -> Result<Option<Job>, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job {job_id} is {actual}, expected {expected}")]
    StateMismatch {
        job_id: JobId,
        expected: JobState,
        actual: JobState,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    by_session: HashMap<SessionId, Vec<JobId>>,
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    inner: RwLock<Inner>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> JobStoreError {
    JobStoreError::Storage("job store lock poisoned".to_string())
}

fn newest_first(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.as_uuid().cmp(a.id.as_uuid())));
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<(), JobStoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        if inner.jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        inner.by_session.entry(job.session_id).or_default().push(job.id);
        inner.jobs.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.jobs.get(&job_id).cloned())
    }

    async fn compare_and_set(
        &self,
        job_id: JobId,
        expected: JobState,
        new: Job,
    ) -> Result<(), JobStoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let current = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(JobStoreError::NotFound(job_id))?;
        if current.state != expected {
            return Err(JobStoreError::StateMismatch {
                job_id,
                expected,
                actual: current.state,
            });
        }
        if new.id != job_id || new.session_id != current.session_id {
            return Err(JobStoreError::Storage(format!(
                "replacement for job {job_id} does not match its identity"
            )));
        }
        *current = new;
        Ok(())
    }

    async fn list_by_session(
        &self,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut jobs: Vec<Job> = inner
            .by_session
            .get(&session_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect();
        newest_first(&mut jobs);
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn list_by_state(&self, state: JobState, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.state == state)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn latest_completed(
        &self,
        session_id: SessionId,
        kind: JobKind,
    ) -> Result<Option<Job>, JobStoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        let latest = inner
            .by_session
            .get(&session_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.jobs.get(id))
            .filter(|j| j.kind == kind && j.state == JobState::Completed)
            .max_by(|a, b| {
                a.completed_at
                    .cmp(&b.completed_at)
                    .then(a.id.as_uuid().cmp(b.id.as_uuid()))
            });
        Ok(latest.cloned())
    }
}
