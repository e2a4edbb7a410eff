//! Background AI jobs.
//!
//! ## Components
//!
//! - `Job`: one transcription, chat completion or report, with its status
//! - `JobStore`: persistence for jobs (in-memory or Postgres)
//! - `JobExecutor`: runs a claimed job to a terminal state
//! - `JobWorkerPool`: tokio tasks claiming jobs FIFO from the store
//!
//! Jobs are never retried at this level; rate limits are retried inside the
//! AI backend and anything else ends the job in `failed`.

pub mod executor;
pub mod pool;
pub mod store;
pub mod types;

pub use executor::JobExecutor;
pub use pool::{JobWorkerPool, JobWorkerPoolHandle, PoolStats, WorkerPoolConfig};
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use types::{Job, JobId, JobKind, JobParams, JobStatus};
