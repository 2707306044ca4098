//! Reclaims jobs stuck in RUNNING.
//!
//! An execution that dies with its process never reaches a terminal state.
//! The sweep periodically fails RUNNING jobs whose start time is older than
//! a configured bound.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::store::{JobStore, JobStoreError};
use super::types::{FailureKind, JobFailure, JobState};

#[derive(Debug, Clone)]
pub struct StaleJobSweeper {
    /// Time between sweeps.
    pub interval: Duration,
    /// A RUNNING job older than this is considered abandoned.
    pub max_running: Duration,
    /// Maximum jobs inspected per sweep.
    pub batch: usize,
}

impl StaleJobSweeper {
    pub fn new(interval: Duration, max_running: Duration) -> Self {
        Self {
            interval,
            max_running,
            batch: 200,
        }
    }

    /// Fail every RUNNING job started before `now - max_running`.
    /// Returns how many jobs were reclaimed.
    pub async fn sweep_once(
        &self,
        store: &dyn JobStore,
        now: DateTime<Utc>,
    ) -> Result<usize, JobStoreError> {
        let max_running = chrono::Duration::from_std(self.max_running)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let running = store.list_by_state(JobState::Running, self.batch).await?;

        let mut reclaimed = 0;
        for job in running {
            let started = job.started_at.unwrap_or(job.created_at);
            if now.signed_duration_since(started) <= max_running {
                continue;
            }

            let failure = JobFailure::new(
                FailureKind::Stale,
                format!(
                    "job exceeded the maximum running time of {}s without finishing",
                    self.max_running.as_secs()
                ),
            );
            let Ok(failed) = job.fail(failure, now) else {
                continue;
            };

            match store.compare_and_set(job.id, JobState::Running, failed).await {
                Ok(()) => {
                    warn!(job_id = %job.id, kind = %job.kind, started_at = %started, "stale job reclaimed");
                    reclaimed += 1;
                }
                Err(JobStoreError::StateMismatch { actual, .. }) => {
                    debug!(job_id = %job.id, state = %actual, "stale candidate finished concurrently");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(reclaimed)
    }

    /// Run the sweep in the background until the handle is shut down.
    pub fn spawn(self, store: Arc<dyn JobStore>) -> StaleJobSweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        info!(
            interval_secs = self.interval.as_secs(),
            max_running_secs = self.max_running.as_secs(),
            "stale job sweep started"
        );

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        match self.sweep_once(store.as_ref(), Utc::now()).await {
                            Ok(0) => {}
                            Ok(n) => info!(reclaimed = n, "stale job sweep finished"),
                            Err(e) => error!(error = %e, "stale job sweep failed"),
                        }
                    }
                }
            }
            info!("stale job sweep stopped");
        });

        StaleJobSweeperHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
        }
    }
}

/// Handle to control a running sweep.
#[derive(Debug)]
pub struct StaleJobSweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl StaleJobSweeperHandle {
    /// Request shutdown and wait for the sweep task to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::{Job, JobKind};
    use chrono::Duration as ChronoDuration;
    use neuroviz_core::{SessionId, UserId};
    use serde_json::json;

    async fn running_job(store: &InMemoryJobStore, started: DateTime<Utc>) -> Job {
        let mut job = Job::new(SessionId::new(), UserId::new(), JobKind::Classify, json!({}));
        job.created_at = started;
        store.insert(job.clone()).await.unwrap();
        let running = job.start(started).unwrap();
        store
            .compare_and_set(job.id, JobState::Pending, running.clone())
            .await
            .unwrap();
        running
    }

    #[tokio::test]
    async fn fails_only_jobs_past_the_bound() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        let stale = running_job(&store, now - ChronoDuration::minutes(30)).await;
        let fresh = running_job(&store, now - ChronoDuration::seconds(10)).await;

        let sweeper = StaleJobSweeper::new(Duration::from_secs(60), Duration::from_secs(600));
        let reclaimed = sweeper.sweep_once(&store, now).await.unwrap();
        assert_eq!(reclaimed, 1);

        let stale = store.get(stale.id).await.unwrap().unwrap();
        assert_eq!(stale.state, JobState::Failed);
        assert_eq!(stale.error.unwrap().kind, FailureKind::Stale);
        assert!(stale.completed_at.unwrap() >= stale.started_at.unwrap());

        let fresh = store.get(fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.state, JobState::Running);
    }

    #[tokio::test]
    async fn pending_jobs_are_ignored() {
        let store = InMemoryJobStore::new();
        let old = Utc::now() - ChronoDuration::hours(2);
        let mut pending = Job::new(SessionId::new(), UserId::new(), JobKind::Classify, json!({}));
        pending.created_at = old;
        store.insert(pending.clone()).await.unwrap();

        let sweeper = StaleJobSweeper::new(Duration::from_secs(60), Duration::from_secs(60));
        assert_eq!(sweeper.sweep_once(&store, Utc::now()).await.unwrap(), 0);
        assert_eq!(
            store.get(pending.id).await.unwrap().unwrap().state,
            JobState::Pending
        );
    }

    #[tokio::test]
    async fn background_sweep_runs_and_stops() {
        let store = InMemoryJobStore::arc();
        let stale = running_job(&store, Utc::now() - ChronoDuration::hours(1)).await;

        let handle = StaleJobSweeper::new(Duration::from_millis(10), Duration::from_secs(60))
            .spawn(store.clone());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let job = store.get(stale.id).await.unwrap().unwrap();
            if job.state == JobState::Failed || tokio::time::Instant::now() > deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;

        assert_eq!(
            store.get(stale.id).await.unwrap().unwrap().state,
            JobState::Failed
        );
    }
}
