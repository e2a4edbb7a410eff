//! Job storage implementations.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use medscribe_core::{ConsultationId, UserId};

use super::types::{Job, JobId, JobParams, JobStatus};

/// Job store abstraction.
///
/// Status only moves forward: pending → running → {done | failed}. Attempting
/// any other transition is [`JobStoreError::IllegalTransition`].
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Persist a job built by the caller. It must still be pending.
    async fn insert(&self, job: Job) -> Result<(), JobStoreError>;

    /// Persist a new pending job.
    async fn create(
        &self,
        owner_user_id: UserId,
        subject_id: ConsultationId,
        params: JobParams,
    ) -> Result<Job, JobStoreError> {
        let job = Job::new(owner_user_id, subject_id, params, Utc::now());
        self.insert(job.clone()).await?;
        Ok(job)
    }

    async fn mark_running(&self, job_id: JobId) -> Result<(), JobStoreError>;

    async fn mark_done(&self, job_id: JobId, result: String) -> Result<(), JobStoreError>;

    async fn mark_failed(&self, job_id: JobId, error: String) -> Result<(), JobStoreError>;

    /// Get a job by ID. Unknown ids are `NotFound`, never a failed job.
    async fn get(&self, job_id: JobId) -> Result<Job, JobStoreError>;

    /// Move the oldest pending job to running and return it.
    /// Returns None if no jobs are pending.
    async fn claim_next(&self) -> Result<Option<Job>, JobStoreError>;

    /// Fail every job still marked running. Called once at startup, before any
    /// worker claims, so jobs interrupted by a crash are never re-run.
    async fn fail_interrupted(&self, reason: &str) -> Result<usize, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("illegal transition for job {job_id}: {from} -> {to}")]
    IllegalTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

type JobCell = Arc<Mutex<Job>>;

/// In-memory job store for tests/dev.
///
/// Each job sits behind its own lock; the map lock is only held long enough to
/// find the cell.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, JobCell>>,
    pending: Mutex<VecDeque<JobId>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of jobs ever created.
    pub fn len(&self) -> usize {
        self.jobs.read().map(|j| j.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell(&self, job_id: JobId) -> Result<JobCell, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        jobs.get(&job_id)
            .cloned()
            .ok_or(JobStoreError::NotFound(job_id))
    }

    fn update<T>(
        &self,
        job_id: JobId,
        f: impl FnOnce(&mut Job) -> Result<T, JobStoreError>,
    ) -> Result<T, JobStoreError> {
        let cell = self.cell(job_id)?;
        let mut job = cell.lock().map_err(|_| poisoned())?;
        f(&mut job)
    }
}

fn poisoned() -> JobStoreError {
    JobStoreError::Storage("job store lock poisoned".into())
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<(), JobStoreError> {
        if job.status != JobStatus::Pending {
            return Err(JobStoreError::IllegalTransition {
                job_id: job.id,
                from: job.status,
                to: JobStatus::Pending,
            });
        }
        let id = job.id;
        self.jobs
            .write()
            .map_err(|_| poisoned())?
            .insert(id, Arc::new(Mutex::new(job)));
        self.pending.lock().map_err(|_| poisoned())?.push_back(id);
        Ok(())
    }

    async fn mark_running(&self, job_id: JobId) -> Result<(), JobStoreError> {
        self.update(job_id, |job| job.mark_running(Utc::now()))
    }

    async fn mark_done(&self, job_id: JobId, result: String) -> Result<(), JobStoreError> {
        self.update(job_id, |job| job.mark_done(result, Utc::now()))
    }

    async fn mark_failed(&self, job_id: JobId, error: String) -> Result<(), JobStoreError> {
        self.update(job_id, |job| job.mark_failed(error, Utc::now()))
    }

    async fn get(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        self.update(job_id, |job| Ok(job.clone()))
    }

    async fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        loop {
            let next = self.pending.lock().map_err(|_| poisoned())?.pop_front();
            let Some(job_id) = next else {
                return Ok(None);
            };
            // Jobs moved on by a direct `mark_running` are skipped.
            let claimed = self.update(job_id, |job| {
                if job.status != JobStatus::Pending {
                    return Ok(None);
                }
                job.mark_running(Utc::now())?;
                Ok(Some(job.clone()))
            })?;
            if claimed.is_some() {
                return Ok(claimed);
            }
        }
    }

    async fn fail_interrupted(&self, reason: &str) -> Result<usize, JobStoreError> {
        let cells: Vec<JobCell> = self
            .jobs
            .read()
            .map_err(|_| poisoned())?
            .values()
            .cloned()
            .collect();

        let mut failed = 0;
        for cell in cells {
            let mut job = cell.lock().map_err(|_| poisoned())?;
            if job.status == JobStatus::Running {
                job.mark_failed(reason.to_string(), Utc::now())?;
                failed += 1;
            }
        }
        Ok(failed)
    }
}

#[async_trait]
impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    async fn insert(&self, job: Job) -> Result<(), JobStoreError> {
        (**self).insert(job).await
    }

    async fn create(
        &self,
        owner_user_id: UserId,
        subject_id: ConsultationId,
        params: JobParams,
    ) -> Result<Job, JobStoreError> {
        (**self).create(owner_user_id, subject_id, params).await
    }

    async fn mark_running(&self, job_id: JobId) -> Result<(), JobStoreError> {
        (**self).mark_running(job_id).await
    }

    async fn mark_done(&self, job_id: JobId, result: String) -> Result<(), JobStoreError> {
        (**self).mark_done(job_id, result).await
    }

    async fn mark_failed(&self, job_id: JobId, error: String) -> Result<(), JobStoreError> {
        (**self).mark_failed(job_id, error).await
    }

    async fn get(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        (**self).get(job_id).await
    }

    async fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        (**self).claim_next().await
    }

    async fn fail_interrupted(&self, reason: &str) -> Result<usize, JobStoreError> {
        (**self).fail_interrupted(reason).await
    }
}
