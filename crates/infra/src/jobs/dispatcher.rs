//! Background dispatch of job executions.
//!
//! [`Dispatcher::schedule`] hands a unit of work to a supervisor task and
//! returns immediately. The supervisor runs at most `max_concurrent` units
//! at a time, each inside its own task so that a panic in one unit is
//! contained and reported to the [`FaultHandler`] instead of taking the
//! supervisor down.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use neuroviz_core::JobId;

type BoxedWork = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'static>>;

struct WorkItem {
    job_id: JobId,
    work: BoxedWork,
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum units running at once.
    pub max_concurrent: usize,
    /// Name for logging.
    pub name: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            name: "job-dispatcher".to_string(),
        }
    }
}

impl DispatcherConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }
}

/// How a unit of work ended when it did not end cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkFault {
    /// The unit returned an error.
    Failed(String),
    /// The unit panicked or was cancelled.
    Panicked(String),
}

impl std::fmt::Display for WorkFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkFault::Failed(msg) => write!(f, "execution failed: {msg}"),
            WorkFault::Panicked(msg) => write!(f, "execution panicked: {msg}"),
        }
    }
}

/// Receives faults of dispatched work.
#[async_trait]
pub trait FaultHandler: Send + Sync {
    async fn on_fault(&self, job_id: JobId, fault: WorkFault);
}

/// Dispatcher runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DispatcherStats {
    pub scheduled: u64,
    pub completed: u64,
    pub faulted: u64,
    /// Accepted but not yet finished (queued or running).
    pub in_flight: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatcher is shutting down")]
    ShuttingDown,
}

/// Handle to the background supervisor.
pub struct Dispatcher {
    name: String,
    sender: Mutex<Option<mpsc::UnboundedSender<WorkItem>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    /// Flips to `true` once the supervisor has drained all accepted work.
    drained: watch::Receiver<bool>,
    stats: Arc<Mutex<DispatcherStats>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.name)
            .field("stats", &self.stats())
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Dispatcher {
    /// Start the supervisor on the current Tokio runtime.
    pub fn spawn(config: DispatcherConfig, faults: Arc<dyn FaultHandler>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<WorkItem>();
        let (drained_tx, drained) = watch::channel(false);
        let stats = Arc::new(Mutex::new(DispatcherStats::default()));
        let max_concurrent = config.max_concurrent.max(1);

        info!(
            dispatcher = %config.name,
            max_concurrent,
            "job dispatcher started"
        );

        let supervisor = tokio::spawn(supervise(
            config.name.clone(),
            rx,
            Arc::new(Semaphore::new(max_concurrent)),
            faults,
            stats.clone(),
            drained_tx,
        ));

        Self {
            name: config.name,
            sender: Mutex::new(Some(tx)),
            supervisor: Mutex::new(Some(supervisor)),
            drained,
            stats,
        }
    }

    /// Queue `work` for background execution. Never waits for it.
    pub fn schedule<F>(&self, job_id: JobId, work: F) -> Result<(), DispatchError>
    where
        F: Future<Output = Result<(), String>> + Send + 'static,
    {
        let sender = lock(&self.sender);
        let tx = sender.as_ref().ok_or(DispatchError::ShuttingDown)?;

        {
            let mut stats = lock(&self.stats);
            stats.scheduled += 1;
            stats.in_flight += 1;
        }

        let item = WorkItem {
            job_id,
            work: Box::pin(work),
        };
        if tx.send(item).is_err() {
            let mut stats = lock(&self.stats);
            stats.scheduled -= 1;
            stats.in_flight -= 1;
            return Err(DispatchError::ShuttingDown);
        }

        debug!(dispatcher = %self.name, job_id = %job_id, "work scheduled");
        Ok(())
    }

    pub fn stats(&self) -> DispatcherStats {
        lock(&self.stats).clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        lock(&self.sender).is_none()
    }

    /// Stop accepting work and wait for everything already accepted to finish.
    ///
    /// Every caller waits for the drain, including ones racing a shutdown
    /// that is already in progress.
    pub async fn shutdown(&self) {
        let sender = lock(&self.sender).take();
        drop(sender);

        let supervisor = lock(&self.supervisor).take();
        if let Some(handle) = supervisor {
            if let Err(e) = handle.await {
                error!(dispatcher = %self.name, error = %e, "dispatcher supervisor ended abnormally");
            }
            info!(dispatcher = %self.name, stats = ?self.stats(), "job dispatcher stopped");
        }

        // Errors only if the supervisor died without signalling; nothing left to wait on.
        let mut drained = self.drained.clone();
        let _ = drained.wait_for(|done| *done).await;
    }
}

async fn supervise(
    name: String,
    mut rx: mpsc::UnboundedReceiver<WorkItem>,
    slots: Arc<Semaphore>,
    faults: Arc<dyn FaultHandler>,
    stats: Arc<Mutex<DispatcherStats>>,
    drained: watch::Sender<bool>,
) {
    let mut running = JoinSet::new();

    loop {
        tokio::select! {
            item = rx.recv() => {
                let Some(item) = item else { break };
                let Ok(permit) = slots.clone().acquire_owned().await else { break };
                let faults = faults.clone();
                let stats = stats.clone();
                let name = name.clone();
                running.spawn(async move {
                    run_isolated(&name, item, faults.as_ref(), &stats).await;
                    drop(permit);
                });
            }
            Some(_) = running.join_next(), if !running.is_empty() => {}
        }
    }

    debug!(dispatcher = %name, remaining = running.len(), "draining dispatched work");
    while running.join_next().await.is_some() {}
    let _ = drained.send(true);
}

async fn run_isolated(
    name: &str,
    item: WorkItem,
    faults: &dyn FaultHandler,
    stats: &Mutex<DispatcherStats>,
) {
    let WorkItem { job_id, work } = item;

    let fault = match tokio::spawn(work).await {
        Ok(Ok(())) => None,
        Ok(Err(msg)) => Some(WorkFault::Failed(msg)),
        Err(join_err) => {
            let msg = if join_err.is_panic() {
                panic_message(join_err.into_panic())
            } else {
                "execution was cancelled".to_string()
            };
            Some(WorkFault::Panicked(msg))
        }
    };

    match fault {
        None => {
            let mut s = lock(stats);
            s.completed += 1;
            s.in_flight = s.in_flight.saturating_sub(1);
        }
        Some(fault) => {
            warn!(dispatcher = %name, job_id = %job_id, fault = %fault, "dispatched work faulted");
            faults.on_fault(job_id, fault).await;
            let mut s = lock(stats);
            s.faulted += 1;
            s.in_flight = s.in_flight.saturating_sub(1);
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
