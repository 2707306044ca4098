//! Asynchronous job orchestration.
//!
//! ## Design
//!
//! - A job is created PENDING only after its session and parameters check out
//! - Execution runs off the caller's path on the [`Dispatcher`]
//! - Every state change is a compare-and-set on the [`JobStore`]
//! - Compute failures end the job FAILED with a structured [`JobFailure`]
//!
//! ## Components
//!
//! - `Job`: the record and its pure state machine
//! - `JobStore`: persistence (in-memory or Postgres)
//! - `Dispatcher`: bounded background execution with fault isolation
//! - `JobLifecycle`: create, dispatch, execute, read
//! - `StaleJobSweeper`: reclaims jobs abandoned in RUNNING

pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod params;
pub mod postgres;
pub mod store;
pub mod sweep;
pub mod types;

pub use dispatcher::{
    DispatchError, Dispatcher, DispatcherConfig, DispatcherStats, FaultHandler, WorkFault,
};
pub use error::{JobError, JobResult};
pub use lifecycle::{JobLifecycle, MAX_LISTED_JOBS};
pub use params::{AnalyticsMetric, AnalyticsParams, JobParams, PreprocessParams};
pub use postgres::PostgresJobStore;
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use sweep::{StaleJobSweeper, StaleJobSweeperHandle};
pub use types::{FailureKind, Job, JobFailure, JobKind, JobState, TransitionError};
