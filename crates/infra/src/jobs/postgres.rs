//! Postgres-backed job store.
//!
//! One row per job in `processing_jobs`. Compare-and-set is a single
//! conditional `UPDATE ... WHERE id = $1 AND state = $2`; Postgres row
//! locking makes it atomic against concurrent updates of the same job.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | JobStoreError |
//! |------------|----------------------|---------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / other | N/A | `Storage` |
//!
//! A conditional update that touches no row is resolved with a follow-up
//! read into `NotFound` or `StateMismatch`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use neuroviz_core::{JobId, SessionId, UserId};

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobFailure, JobKind, JobState};

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS processing_jobs (
        id           UUID PRIMARY KEY,
        session_id   UUID NOT NULL,
        owner_id     UUID NOT NULL,
        kind         TEXT NOT NULL,
        state        TEXT NOT NULL,
        params       JSONB NOT NULL,
        result       JSONB,
        error        JSONB,
        created_at   TIMESTAMPTZ NOT NULL,
        started_at   TIMESTAMPTZ,
        completed_at TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS processing_jobs_session_idx ON processing_jobs (session_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS processing_jobs_state_idx ON processing_jobs (state, created_at)",
    "CREATE INDEX IF NOT EXISTS processing_jobs_completed_idx ON processing_jobs (session_id, kind, completed_at DESC) WHERE state = 'COMPLETED'",
];

const SELECT_COLUMNS: &str = "id, session_id, owner_id, kind, state, params, result, error, created_at, started_at, completed_at";

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn from_shared(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create the table and indexes if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), JobStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    async fn current_state(&self, job_id: JobId) -> Result<Option<JobState>, JobStoreError> {
        let row = sqlx::query("SELECT state FROM processing_jobs WHERE id = $1")
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("current_state", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let state: String = row
            .try_get("state")
            .map_err(|e| map_sqlx_error("current_state", e))?;
        let state = state
            .parse()
            .map_err(|e| JobStoreError::Storage(format!("corrupt job state: {e}")))?;
        Ok(Some(state))
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<JsonValue, JobStoreError> {
    serde_json::to_value(value).map_err(|e| JobStoreError::Storage(format!("encode job: {e}")))
}

fn clamp_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, session_id = %job.session_id), err)]
    async fn insert(&self, job: Job) -> Result<(), JobStoreError> {
        let error = job.error.as_ref().map(to_json).transpose()?;
        sqlx::query(
            r#"
            INSERT INTO processing_jobs
                (id, session_id, owner_id, kind, state, params, result, error, created_at, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.session_id.as_uuid())
        .bind(job.owner_id.as_uuid())
        .bind(job.kind.as_str())
        .bind(job.state.as_str())
        .bind(&job.params)
        .bind(&job.result)
        .bind(&error)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| match map_sqlx_error("insert", e) {
            JobStoreError::AlreadyExists(_) => JobStoreError::AlreadyExists(job.id),
            other => other,
        })?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM processing_jobs WHERE id = $1"
        ))
        .bind(job_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.map(|row| decode_job(&row)).transpose()
    }

    #[instrument(skip(self, new), fields(job_id = %job_id, expected = %expected, next = %new.state), err)]
    async fn compare_and_set(
        &self,
        job_id: JobId,
        expected: JobState,
        new: Job,
    ) -> Result<(), JobStoreError> {
        let error = new.error.as_ref().map(to_json).transpose()?;
        let updated = sqlx::query(
            r#"
            UPDATE processing_jobs
            SET state = $3,
                result = $4,
                error = $5,
                started_at = $6,
                completed_at = $7
            WHERE id = $1 AND state = $2
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(expected.as_str())
        .bind(new.state.as_str())
        .bind(&new.result)
        .bind(&error)
        .bind(new.started_at)
        .bind(new.completed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("compare_and_set", e))?;

        if updated.rows_affected() == 1 {
            return Ok(());
        }

        match self.current_state(job_id).await? {
            None => Err(JobStoreError::NotFound(job_id)),
            Some(actual) => Err(JobStoreError::StateMismatch {
                job_id,
                expected,
                actual,
            }),
        }
    }

    #[instrument(skip(self), fields(session_id = %session_id), err)]
    async fn list_by_session(
        &self,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM processing_jobs WHERE session_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2"
        ))
        .bind(session_id.as_uuid())
        .bind(clamp_limit(limit))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_by_session", e))?;

        rows.iter().map(decode_job).collect()
    }

    #[instrument(skip(self), fields(state = %state), err)]
    async fn list_by_state(&self, state: JobState, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM processing_jobs WHERE state = $1 ORDER BY created_at ASC LIMIT $2"
        ))
        .bind(state.as_str())
        .bind(clamp_limit(limit))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_by_state", e))?;

        rows.iter().map(decode_job).collect()
    }

    #[instrument(skip(self), fields(session_id = %session_id, kind = %kind), err)]
    async fn latest_completed(
        &self,
        session_id: SessionId,
        kind: JobKind,
    ) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM processing_jobs \
             WHERE session_id = $1 AND kind = $2 AND state = $3 \
             ORDER BY completed_at DESC, id DESC LIMIT 1"
        ))
        .bind(session_id.as_uuid())
        .bind(kind.as_str())
        .bind(JobState::Completed.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_completed", e))?;

        row.as_ref().map(decode_job).transpose()
    }
}

fn decode_job(row: &sqlx::postgres::PgRow) -> Result<Job, JobStoreError> {
    let row = JobRow::from_row(row).map_err(|e| map_sqlx_error("decode_job", e))?;
    Job::try_from(row)
}

#[derive(Debug)]
struct JobRow {
    id: Uuid,
    session_id: Uuid,
    owner_id: Uuid,
    kind: String,
    state: String,
    params: JsonValue,
    result: Option<JsonValue>,
    error: Option<JsonValue>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for JobRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            owner_id: row.try_get("owner_id")?,
            kind: row.try_get("kind")?,
            state: row.try_get("state")?,
            params: row.try_get("params")?,
            result: row.try_get("result")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str, e: &dyn std::fmt::Display| {
            JobStoreError::Storage(format!("corrupt {what} in job {}: {e}", row.id))
        };
        let kind: JobKind = row.kind.parse().map_err(|e| corrupt("kind", &e))?;
        let state: JobState = row.state.parse().map_err(|e| corrupt("state", &e))?;
        let error: Option<JobFailure> = row
            .error
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| corrupt("error detail", &e))?;

        Ok(Job {
            id: JobId::from_uuid(row.id),
            session_id: SessionId::from_uuid(row.session_id),
            owner_id: UserId::from_uuid(row.owner_id),
            kind,
            state,
            params: row.params,
            result: row.result,
            error,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some("23505") {
                // Unique violation on the primary key. The caller fills in the id.
                JobStoreError::AlreadyExists(JobId::from_uuid(Uuid::nil()))
            } else {
                JobStoreError::Storage(format!(
                    "database error in {}: {}",
                    operation,
                    db_err.message()
                ))
            }
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => JobStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
