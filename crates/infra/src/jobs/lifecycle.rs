//! Job lifecycle manager.
//!
//! Owns the state machine end to end: creation (validate, then persist
//! PENDING), dispatch to the background [`Dispatcher`], the single
//! execution per job, and the read path. Every state change is a
//! compare-and-set against the [`JobStore`], so concurrent executions of
//! the same job cannot both get past `PENDING -> RUNNING`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use neuroviz_core::{JobId, SessionId, UserId};

use crate::compute::{ComputeClient, ComputeError, ComputeRequest};
use crate::sessions::{SessionHandle, SessionResolver};

use super::dispatcher::{Dispatcher, DispatcherConfig, DispatcherStats, FaultHandler, WorkFault};
use super::error::{JobError, JobResult};
use super::params::JobParams;
use super::store::{JobStore, JobStoreError};
use super::types::{FailureKind, Job, JobFailure, JobKind, JobState};

/// Upper bound on jobs returned by one listing call.
pub const MAX_LISTED_JOBS: usize = 500;

#[derive(Clone)]
pub struct JobLifecycle {
    store: Arc<dyn JobStore>,
    sessions: Arc<dyn SessionResolver>,
    compute: Arc<dyn ComputeClient>,
    dispatcher: Arc<Dispatcher>,
}

impl std::fmt::Debug for JobLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLifecycle")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl JobLifecycle {
    /// Build the lifecycle and start its dispatcher on the current runtime.
    pub fn new(
        store: Arc<dyn JobStore>,
        sessions: Arc<dyn SessionResolver>,
        compute: Arc<dyn ComputeClient>,
        config: DispatcherConfig,
    ) -> Self {
        let faults = Arc::new(FaultRecorder {
            store: store.clone(),
        });
        let dispatcher = Arc::new(Dispatcher::spawn(config, faults));
        Self {
            store,
            sessions,
            compute,
            dispatcher,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Validate and persist a new PENDING job.
    ///
    /// Nothing is written unless the session resolves for `caller` and the
    /// parameters satisfy the contract for `kind`.
    pub async fn create_job(
        &self,
        caller: UserId,
        session_id: SessionId,
        kind: JobKind,
        params: &JsonValue,
    ) -> JobResult<Job> {
        self.resolve_session(session_id, caller).await?;
        let parsed = JobParams::parse(kind, params)?;

        let job = Job::new(session_id, caller, kind, parsed.recorded(params));
        self.store.insert(job.clone()).await?;

        info!(
            job_id = %job.id,
            session_id = %session_id,
            kind = %kind,
            state = %job.state,
            "job created"
        );
        Ok(job)
    }

    /// Hand a PENDING job to the dispatcher. A no-op for any other state.
    pub async fn dispatch(&self, job_id: JobId) -> JobResult<()> {
        let job = self.load(job_id).await?;
        if job.state != JobState::Pending {
            debug!(job_id = %job_id, state = %job.state, "dispatch skipped, job already left PENDING");
            return Ok(());
        }

        let this = self.clone();
        self.dispatcher.schedule(job_id, async move {
            match this.execute(job_id).await {
                Ok(_) => Ok(()),
                Err(JobError::InvalidStateTransition { from, to }) if to.is_terminal() => {
                    // Someone else (the stale sweep) finalized the job while compute ran.
                    warn!(job_id = %job_id, state = %from, discarded = %to, "job finalized elsewhere, outcome discarded");
                    Ok(())
                }
                Err(JobError::InvalidStateTransition { from, .. }) => {
                    debug!(job_id = %job_id, state = %from, "lost execution race, nothing to do");
                    Ok(())
                }
                Err(e) => Err(e.to_string()),
            }
        })?;
        Ok(())
    }

    /// Create a job and dispatch it. Returns the PENDING snapshot.
    ///
    /// If the job cannot be dispatched it is failed right away, so no record
    /// is left PENDING with nothing to run it.
    pub async fn submit(
        &self,
        caller: UserId,
        session_id: SessionId,
        kind: JobKind,
        params: &JsonValue,
    ) -> JobResult<Job> {
        let job = self.create_job(caller, session_id, kind, params).await?;
        if let Err(e) = self.dispatch(job.id).await {
            let failure = JobFailure::new(FailureKind::Internal, format!("job could not be dispatched: {e}"));
            if let Err(store_err) = fail_unfinished(self.store.as_ref(), job.id, failure).await {
                error!(job_id = %job.id, error = %store_err, "could not fail undispatched job");
            }
            return Err(e);
        }
        Ok(job)
    }

    /// Run a job once: claim it, call the compute service, record the outcome.
    ///
    /// Only the caller whose `PENDING -> RUNNING` compare-and-set succeeds
    /// gets past the first step; everyone else receives
    /// `InvalidStateTransition` and has changed nothing. Compute failures are
    /// recorded on the job and do not surface as errors here.
    pub async fn execute(&self, job_id: JobId) -> JobResult<Job> {
        let job = self.load(job_id).await?;
        let running = job.start(Utc::now())?;
        self.transition(JobState::Pending, running.clone()).await?;

        info!(
            job_id = %job_id,
            session_id = %running.session_id,
            kind = %running.kind,
            state = %running.state,
            "job started"
        );

        let finished = match self.run_compute(&running).await {
            Ok(payload) => running.succeed(payload, Utc::now())?,
            Err(failure) => running.fail(failure, Utc::now())?,
        };
        self.transition(JobState::Running, finished.clone()).await?;

        match &finished.error {
            None => info!(
                job_id = %job_id,
                kind = %finished.kind,
                state = %finished.state,
                "job completed"
            ),
            Some(failure) => warn!(
                job_id = %job_id,
                kind = %finished.kind,
                state = %finished.state,
                failure_kind = ?failure.kind,
                error = %failure.message,
                "job failed"
            ),
        }
        Ok(finished)
    }

    /// Current persisted snapshot. Never waits on in-flight execution.
    pub async fn get_status(&self, job_id: JobId) -> JobResult<Job> {
        self.load(job_id).await
    }

    /// Like [`get_status`](Self::get_status), but jobs owned by someone else
    /// are reported as not found.
    pub async fn get_status_for(&self, caller: UserId, job_id: JobId) -> JobResult<Job> {
        let job = self.load(job_id).await?;
        if job.owner_id != caller {
            return Err(JobError::JobNotFound(job_id));
        }
        Ok(job)
    }

    /// Jobs of a caller-owned session, newest first.
    pub async fn list_session_jobs(
        &self,
        caller: UserId,
        session_id: SessionId,
        limit: usize,
    ) -> JobResult<Vec<Job>> {
        self.resolve_session(session_id, caller).await?;
        let jobs = self
            .store
            .list_by_session(session_id, limit.min(MAX_LISTED_JOBS))
            .await?;
        Ok(jobs)
    }

    /// Most recent COMPLETED job of `kind` in a caller-owned session.
    pub async fn latest_completed(
        &self,
        caller: UserId,
        session_id: SessionId,
        kind: JobKind,
    ) -> JobResult<Option<Job>> {
        self.resolve_session(session_id, caller).await?;
        Ok(self.store.latest_completed(session_id, kind).await?)
    }

    /// Untracked power spectral density for one channel.
    pub async fn psd(
        &self,
        caller: UserId,
        session_id: SessionId,
        channel: &str,
    ) -> JobResult<JsonValue> {
        let session = self.resolve_session(session_id, caller).await?;
        let channel = require_channel(channel)?;
        self.call_direct(ComputeRequest::PowerSpectralDensity {
            file_path: session.data_locator,
            channel,
        })
        .await
    }

    /// Untracked band power for one channel.
    pub async fn band_power(
        &self,
        caller: UserId,
        session_id: SessionId,
        channel: &str,
    ) -> JobResult<JsonValue> {
        let session = self.resolve_session(session_id, caller).await?;
        let channel = require_channel(channel)?;
        self.call_direct(ComputeRequest::BandPower {
            file_path: session.data_locator,
            channel,
        })
        .await
    }

    /// Untracked classification of a session's recording.
    pub async fn classify(&self, caller: UserId, session_id: SessionId) -> JobResult<JsonValue> {
        let session = self.resolve_session(session_id, caller).await?;
        self.call_direct(ComputeRequest::Classify {
            file_path: session.data_locator,
        })
        .await
    }

    pub async fn compute_health(&self) -> JobResult<JsonValue> {
        Ok(self.compute.health().await?)
    }

    pub fn dispatcher_stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }

    /// Stop accepting dispatches and wait for in-flight executions.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }

    async fn load(&self, job_id: JobId) -> JobResult<Job> {
        self.store
            .get(job_id)
            .await?
            .ok_or(JobError::JobNotFound(job_id))
    }

    async fn resolve_session(&self, session_id: SessionId, caller: UserId) -> JobResult<SessionHandle> {
        self.sessions
            .resolve(session_id, caller)
            .await?
            .ok_or(JobError::SessionNotFound(session_id))
    }

    async fn transition(&self, expected: JobState, next: Job) -> JobResult<()> {
        let to = next.state;
        self.store
            .compare_and_set(next.id, expected, next)
            .await
            .map_err(|e| match e {
                JobStoreError::StateMismatch { actual, .. } => {
                    JobError::InvalidStateTransition { from: actual, to }
                }
                other => other.into(),
            })
    }

    async fn run_compute(&self, job: &Job) -> Result<JsonValue, JobFailure> {
        let params = JobParams::parse(job.kind, &job.params).map_err(|e| {
            JobFailure::new(FailureKind::Internal, format!("stored parameters are invalid: {e}"))
        })?;

        let session = match self.sessions.resolve(job.session_id, job.owner_id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                return Err(JobFailure::new(
                    FailureKind::SessionNotFound,
                    format!("session {} no longer resolves", job.session_id),
                ));
            }
            Err(e) => return Err(JobFailure::new(FailureKind::Internal, e.to_string())),
        };

        let request = ComputeRequest::for_job(&params, &session.data_locator);
        debug!(job_id = %job.id, operation = request.operation(), "calling compute service");
        self.compute.invoke(&request).await.map_err(failure_from_compute)
    }

    async fn call_direct(&self, request: ComputeRequest) -> JobResult<JsonValue> {
        let operation = request.operation();
        match self.compute.invoke(&request).await {
            Ok(payload) => Ok(payload),
            Err(e) => {
                warn!(operation, error = %e, "direct compute call failed");
                Err(e.into())
            }
        }
    }
}

fn require_channel(channel: &str) -> JobResult<String> {
    let channel = channel.trim();
    if channel.is_empty() {
        return Err(JobError::InvalidParameters("channel must not be empty".into()));
    }
    Ok(channel.to_string())
}

fn failure_from_compute(e: ComputeError) -> JobFailure {
    let kind = if e.is_unavailable() {
        FailureKind::ComputeUnavailable
    } else {
        FailureKind::ComputeRejected
    };
    JobFailure::new(kind, e.to_string())
}

/// Fail a job that has not reached a terminal state, walking a PENDING job
/// through RUNNING so no state is skipped. Already-terminal jobs are left alone.
async fn fail_unfinished(
    store: &dyn JobStore,
    job_id: JobId,
    failure: JobFailure,
) -> Result<(), JobStoreError> {
    let Some(mut job) = store.get(job_id).await? else {
        warn!(job_id = %job_id, "job to fail no longer exists");
        return Ok(());
    };

    if job.state == JobState::Pending {
        let Ok(running) = job.start(Utc::now()) else {
            return Ok(());
        };
        store
            .compare_and_set(job_id, JobState::Pending, running.clone())
            .await?;
        job = running;
    }

    if job.state != JobState::Running {
        debug!(job_id = %job_id, state = %job.state, "job already terminal");
        return Ok(());
    }

    let kind = failure.kind;
    let message = failure.message.clone();
    let Ok(failed) = job.fail(failure, Utc::now()) else {
        return Ok(());
    };
    store
        .compare_and_set(job_id, JobState::Running, failed)
        .await?;
    warn!(job_id = %job_id, failure_kind = ?kind, error = %message, state = %JobState::Failed, "job failed");
    Ok(())
}

/// Turns dispatcher faults into FAILED jobs.
struct FaultRecorder {
    store: Arc<dyn JobStore>,
}

#[async_trait]
impl FaultHandler for FaultRecorder {
    async fn on_fault(&self, job_id: JobId, fault: WorkFault) {
        let failure = JobFailure::new(FailureKind::Internal, fault.to_string());
        match fail_unfinished(self.store.as_ref(), job_id, failure).await {
            Ok(()) => {}
            Err(JobStoreError::StateMismatch { actual, .. }) => {
                debug!(job_id = %job_id, state = %actual, "faulted job moved on concurrently");
            }
            Err(e) => {
                error!(job_id = %job_id, fault = %fault, error = %e, "could not record job fault");
            }
        }
    }
}
