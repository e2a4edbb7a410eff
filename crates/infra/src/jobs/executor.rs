//! Job execution: one claimed job from running to a terminal state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use medscribe_ai::{AiBackend, AiError};
use medscribe_core::{ConsultationId, ResourceEntry, build_report_corpus};

use crate::blobs::{BlobError, BlobId, BlobStaging};
use crate::ledger::{LedgerError, ResourceLedger};

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobParams, JobStatus};

/// Why a job ended in `failed`.
#[derive(Debug, thiserror::Error)]
enum JobFailure {
    #[error(transparent)]
    Backend(#[from] AiError),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("nothing to summarize")]
    NothingToSummarize,
}

impl JobFailure {
    fn is_storage(&self) -> bool {
        matches!(
            self,
            JobFailure::Blob(BlobError::Storage(_)) | JobFailure::Ledger(LedgerError::Storage(_))
        )
    }
}

/// Runs claimed jobs against the AI backend and records the outcome.
///
/// On success the ledger entry is appended before the job is marked done; on
/// failure the ledger is left untouched. If the job store rejects `mark_done`
/// with a storage error after the append, one `mark_failed` is attempted so the
/// job does not read as processing until the next startup sweep of running jobs.
pub struct JobExecutor {
    jobs: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStaging>,
    ledger: Arc<dyn ResourceLedger>,
    backend: Arc<dyn AiBackend>,
    report_locks: Mutex<HashMap<ConsultationId, Arc<tokio::sync::Mutex<()>>>>,
}

impl JobExecutor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStaging>,
        ledger: Arc<dyn ResourceLedger>,
        backend: Arc<dyn AiBackend>,
    ) -> Self {
        Self {
            jobs,
            blobs,
            ledger,
            backend,
            report_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    /// Claim the oldest pending job and execute it.
    /// Returns the terminal status, or None when nothing was pending.
    pub async fn run_next(&self) -> Result<Option<JobStatus>, JobStoreError> {
        match self.jobs.claim_next().await? {
            Some(job) => self.execute(job).await.map(Some),
            None => Ok(None),
        }
    }

    /// Execute a job already in `running`.
    pub async fn execute(&self, job: Job) -> Result<JobStatus, JobStoreError> {
        let kind = job.kind();
        debug!(job_id = %job.id, consultation_id = %job.subject_id, kind = %kind, "executing job");

        let outcome = match &job.params {
            JobParams::Transcribe { blob_id } => self.transcribe(&job, *blob_id).await,
            JobParams::Chat { prompt } => self.chat(&job, prompt).await,
            JobParams::Report => self.report(&job).await,
        };

        match outcome {
            Ok(text) => match self.jobs.mark_done(job.id, text).await {
                Ok(()) => {
                    info!(job_id = %job.id, kind = %kind, "job done");
                    Ok(JobStatus::Done)
                }
                Err(JobStoreError::Storage(msg)) => {
                    error!(job_id = %job.id, kind = %kind, error = %msg, "could not record job result");
                    self.jobs
                        .mark_failed(job.id, format!("could not record result: {msg}"))
                        .await?;
                    Ok(JobStatus::Failed)
                }
                Err(other) => Err(other),
            },
            Err(failure) => {
                if failure.is_storage() {
                    error!(job_id = %job.id, kind = %kind, error = %failure, "storage failure during job");
                } else {
                    warn!(job_id = %job.id, kind = %kind, error = %failure, "job failed");
                }
                self.jobs.mark_failed(job.id, failure.to_string()).await?;
                Ok(JobStatus::Failed)
            }
        }
    }

    async fn transcribe(&self, job: &Job, blob_id: BlobId) -> Result<String, JobFailure> {
        let blob = self.blobs.take(blob_id).await?;
        let text = self
            .backend
            .transcribe(&blob.bytes, &blob.content_type, &blob.filename)
            .await?;

        self.ledger
            .append(job.subject_id, ResourceEntry::transcript(blob.created_at, text.clone()))
            .await?;

        // The consumed record is left for the sweeper if this fails.
        if let Err(e) = self.blobs.release(blob_id).await {
            warn!(job_id = %job.id, blob_id = %blob_id, error = %e, "could not release consumed blob");
        }
        Ok(text)
    }

    async fn chat(&self, job: &Job, prompt: &str) -> Result<String, JobFailure> {
        let answer = self.backend.complete(prompt).await?;
        self.ledger
            .append(job.subject_id, ResourceEntry::qa(prompt, answer.clone()))
            .await?;
        Ok(answer)
    }

    async fn report(&self, job: &Job) -> Result<String, JobFailure> {
        let lock = self.report_lock(job.subject_id);
        let _guard = lock.lock().await;

        let entries = self.ledger.list(job.subject_id).await?;
        let corpus = build_report_corpus(&entries);
        if corpus.is_empty() {
            return Err(JobFailure::NothingToSummarize);
        }

        let report = self.backend.summarize(&corpus).await?;
        self.ledger
            .append(job.subject_id, ResourceEntry::report(Utc::now(), report.clone()))
            .await?;
        Ok(report)
    }

    fn report_lock(&self, subject: ConsultationId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .report_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Drop locks nobody else holds so the map does not grow without bound.
        locks.retain(|id, lock| *id == subject || Arc::strong_count(lock) > 1);
        locks.entry(subject).or_default().clone()
    }
}
