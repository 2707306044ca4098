use std::sync::{Arc, Mutex};

use anyhow::Context;
use sqlx::PgPool;

use neuroviz_infra::{
    compute::{ComputeClient, HttpComputeClient},
    config::Settings,
    jobs::{
        DispatcherConfig, InMemoryJobStore, JobLifecycle, JobStore, PostgresJobStore,
        StaleJobSweeper, StaleJobSweeperHandle,
    },
    sessions::{InMemorySessionDirectory, PostgresSessionDirectory, SessionResolver},
};

/// Everything the handlers need, shared behind an `Arc`.
pub struct AppServices {
    lifecycle: JobLifecycle,
    /// Present in in-memory mode so sessions can be registered directly.
    session_directory: Option<Arc<InMemorySessionDirectory>>,
    sweeper: Mutex<Option<StaleJobSweeperHandle>>,
}

impl AppServices {
    pub fn new(
        store: Arc<dyn JobStore>,
        sessions: Arc<dyn SessionResolver>,
        compute: Arc<dyn ComputeClient>,
        dispatch: DispatcherConfig,
    ) -> Self {
        Self {
            lifecycle: JobLifecycle::new(store, sessions, compute, dispatch),
            session_directory: None,
            sweeper: Mutex::new(None),
        }
    }

    /// In-memory job store and session directory (tests/dev).
    pub fn in_memory(compute: Arc<dyn ComputeClient>, dispatch: DispatcherConfig) -> Self {
        let directory = Arc::new(InMemorySessionDirectory::new());
        let mut services = Self::new(InMemoryJobStore::arc(), directory.clone(), compute, dispatch);
        services.session_directory = Some(directory);
        services
    }

    pub fn lifecycle(&self) -> &JobLifecycle {
        &self.lifecycle
    }

    pub fn session_directory(&self) -> Option<&Arc<InMemorySessionDirectory>> {
        self.session_directory.as_ref()
    }

    /// Start the stale-job sweep against this service's store.
    pub fn start_sweeper(&self, sweeper: StaleJobSweeper) {
        let handle = sweeper.spawn(self.lifecycle.store().clone());
        let previous = self
            .sweeper
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(handle);
        // Dropping the old handle closes its shutdown channel, which stops it.
        if previous.is_some() {
            tracing::warn!("replaced running stale job sweep");
        }
    }

    /// Stop the sweep and drain in-flight jobs.
    pub async fn shutdown(&self) {
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = sweeper {
            handle.shutdown().await;
        }
        self.lifecycle.shutdown().await;
    }
}

/// Wire services from settings: Postgres when `DATABASE_URL` is set,
/// in-memory otherwise.
pub async fn build_services(settings: &Settings) -> anyhow::Result<AppServices> {
    let compute = Arc::new(
        HttpComputeClient::new(
            settings.compute_url.clone(),
            settings.compute_timeout,
            settings.compute_connect_timeout,
        )
        .context("failed to build compute client")?,
    );
    let dispatch = DispatcherConfig::default()
        .with_name("job-dispatcher")
        .with_max_concurrent(settings.dispatch_max_concurrent);

    let services = match &settings.database_url {
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory job store and session directory");
            AppServices::in_memory(compute, dispatch)
        }
        Some(url) => {
            let pool = Arc::new(
                PgPool::connect(url)
                    .await
                    .context("failed to connect to Postgres")?,
            );
            let store = PostgresJobStore::from_shared(pool.clone());
            store
                .ensure_schema()
                .await
                .context("failed to prepare processing_jobs table")?;
            let sessions = PostgresSessionDirectory::from_shared(pool);
            tracing::info!("using Postgres job store and session directory");
            AppServices::new(Arc::new(store), Arc::new(sessions), compute, dispatch)
        }
    };

    if let Some(max_running) = settings.sweep_max_running {
        services.start_sweeper(StaleJobSweeper::new(settings.sweep_interval, max_running));
    }

    tracing::info!(
        compute_url = %settings.compute_url,
        compute_timeout_secs = settings.compute_timeout.as_secs(),
        max_concurrent = settings.dispatch_max_concurrent,
        "services ready"
    );
    Ok(services)
}
