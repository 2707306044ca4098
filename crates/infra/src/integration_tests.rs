//! Integration tests for the full job pipeline.
//!
//! Tests: JobLifecycle → Dispatcher → ComputeClient → JobStore
//!
//! Verifies:
//! - Concurrent jobs each finish exactly once with their own result
//! - The HTTP compute client and the lifecycle agree on the wire contract
//! - Observed state sequences never go backwards

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Value as JsonValue, json};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use neuroviz_core::{SessionId, UserId};

    use crate::compute::{ComputeClient, ComputeError, ComputeRequest, HttpComputeClient};
    use crate::jobs::{
        DispatcherConfig, FailureKind, InMemoryJobStore, JobKind, JobLifecycle, JobState,
        JobStore,
    };
    use crate::sessions::InMemorySessionDirectory;

    /// Echoes the request back so every result can be traced to its input.
    struct EchoCompute {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ComputeClient for EchoCompute {
        async fn invoke(&self, request: &ComputeRequest) -> Result<JsonValue, ComputeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            match request {
                ComputeRequest::Preprocess { file_path, params } => Ok(json!({
                    "file": file_path,
                    "notch": params.notch,
                    "low": params.bandpass[0],
                })),
                other => Ok(json!({"file": other.file_path()})),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn hundred_concurrent_jobs_each_complete_once_with_own_result() {
        let sessions = Arc::new(InMemorySessionDirectory::new());
        let compute = Arc::new(EchoCompute {
            calls: AtomicUsize::new(0),
        });
        let store = InMemoryJobStore::arc();
        let lifecycle = JobLifecycle::new(
            store.clone(),
            sessions.clone(),
            compute.clone(),
            DispatcherConfig::default().with_max_concurrent(16),
        );

        let mut submissions = Vec::new();
        for i in 0..100u32 {
            let owner = UserId::new();
            let locator = format!("/data/session-{i}.edf");
            let session = sessions.register(owner, locator.clone());
            let notch = if i % 2 == 0 { 50 } else { 60 };
            let low = 1.0 + f64::from(i % 10);
            let lifecycle = lifecycle.clone();
            submissions.push(tokio::spawn(async move {
                let job = lifecycle
                    .submit(
                        owner,
                        session,
                        JobKind::Preprocess,
                        &json!({"bandpass": [low, 45.0], "notch": notch}),
                    )
                    .await
                    .unwrap();
                (job.id, locator, notch, low)
            }));
        }

        let mut expected = Vec::new();
        for s in submissions {
            expected.push(s.await.unwrap());
        }
        lifecycle.shutdown().await;

        assert_eq!(compute.calls.load(Ordering::SeqCst), 100);
        for (job_id, locator, notch, low) in expected {
            let job = lifecycle.get_status(job_id).await.unwrap();
            assert_eq!(job.state, JobState::Completed);
            assert_eq!(
                job.result,
                Some(json!({"file": locator, "notch": notch, "low": low}))
            );
            assert!(job.error.is_none());
        }
        let stats = lifecycle.dispatcher_stats();
        assert_eq!(stats.completed, 100);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(store.list_by_state(JobState::Completed, 1000).await.unwrap().len(), 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn polled_states_never_go_backwards() {
        let sessions = Arc::new(InMemorySessionDirectory::new());
        let owner = UserId::new();
        let session = sessions.register(owner, "/data/poll.edf");
        let lifecycle = JobLifecycle::new(
            InMemoryJobStore::arc(),
            sessions,
            Arc::new(EchoCompute {
                calls: AtomicUsize::new(0),
            }),
            DispatcherConfig::default(),
        );

        let job = lifecycle
            .submit(owner, session, JobKind::Classify, &json!({}))
            .await
            .unwrap();

        let mut observed = vec![job.state];
        for _ in 0..500 {
            let state = lifecycle.get_status(job.id).await.unwrap().state;
            if observed.last() != Some(&state) {
                observed.push(state);
            }
            if state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        lifecycle.shutdown().await;

        let order = |s: &JobState| match s {
            JobState::Pending => 0,
            JobState::Running => 1,
            JobState::Completed | JobState::Failed => 2,
        };
        assert!(observed.windows(2).all(|w| order(&w[0]) < order(&w[1])));
        assert_eq!(observed.last(), Some(&JobState::Completed));
    }

    #[tokio::test]
    async fn http_compute_drives_job_to_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/preprocess/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"power": 1.23})))
            .expect(1)
            .mount(&server)
            .await;

        let sessions = Arc::new(InMemorySessionDirectory::new());
        let owner = UserId::new();
        let session = sessions.register(owner, "/data/wire.edf");
        let compute = HttpComputeClient::new(server.uri(), Duration::from_secs(5), Duration::from_secs(1))
            .unwrap();
        let lifecycle = JobLifecycle::new(
            InMemoryJobStore::arc(),
            sessions,
            Arc::new(compute),
            DispatcherConfig::default(),
        );

        let job = lifecycle
            .submit(owner, session, JobKind::Preprocess, &json!({}))
            .await
            .unwrap();
        lifecycle.shutdown().await;

        let done = lifecycle.get_status(job.id).await.unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.result, Some(json!({"power": 1.23})));
    }

    #[tokio::test]
    async fn http_compute_timeout_fails_job() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/analytics/psd"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let sessions = Arc::new(InMemorySessionDirectory::new());
        let owner = UserId::new();
        let session = sessions.register(owner, "/data/slow.edf");
        let compute = HttpComputeClient::new(
            server.uri(),
            Duration::from_millis(200),
            Duration::from_secs(1),
        )
        .unwrap();
        let lifecycle = JobLifecycle::new(
            InMemoryJobStore::arc(),
            sessions,
            Arc::new(compute),
            DispatcherConfig::default(),
        );

        let job = lifecycle
            .submit(
                owner,
                session,
                JobKind::Analytics,
                &json!({"channel": "Fz", "metric": "psd"}),
            )
            .await
            .unwrap();
        lifecycle.shutdown().await;

        let failed = lifecycle.get_status(job.id).await.unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert!(failed.result.is_none());
        assert_eq!(failed.error.unwrap().kind, FailureKind::ComputeUnavailable);
    }

    #[tokio::test]
    async fn unknown_session_never_reaches_the_store() {
        let store = InMemoryJobStore::arc();
        let lifecycle = JobLifecycle::new(
            store.clone(),
            Arc::new(InMemorySessionDirectory::new()),
            Arc::new(EchoCompute {
                calls: AtomicUsize::new(0),
            }),
            DispatcherConfig::default(),
        );

        let result = lifecycle
            .submit(UserId::new(), SessionId::new(), JobKind::Classify, &json!({}))
            .await;
        assert!(result.is_err());
        assert!(store.is_empty());
    }
}
