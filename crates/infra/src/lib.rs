//! Infrastructure layer: job store, blob staging, resource ledger, workers.
//!
//! Every store is a trait with an in-memory implementation for tests/dev and a
//! Postgres implementation behind the `postgres` feature.

pub mod blobs;
pub mod clinic;
pub mod dispatcher;
pub mod jobs;
pub mod ledger;
pub mod records;
pub mod sweeper;

#[cfg(feature = "postgres")]
pub mod postgres;


pub use blobs::{Blob, BlobError, BlobId, BlobInfo, BlobStaging, InMemoryBlobStaging, NewBlob};
pub use clinic::{ClinicStore, InMemoryClinicStore};
pub use dispatcher::{DispatchError, JobDispatcher, JobRequest, JobView};
pub use jobs::{
    InMemoryJobStore, Job, JobExecutor, JobId, JobKind, JobParams, JobStatus, JobStore,
    JobStoreError, JobWorkerPool, JobWorkerPoolHandle, PoolStats, WorkerPoolConfig,
};
pub use ledger::{LedgerError, ResourceLedger};
pub use records::{ClinicRecords, RecordsError};
pub use sweeper::{BlobSweeper, BlobSweeperHandle};
