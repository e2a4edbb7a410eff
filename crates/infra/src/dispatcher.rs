//! Job submission and status polling.
//!
//! `submit` validates ownership and preconditions, persists a pending job and
//! wakes the worker pool. It never waits for the AI call.
//!
//! A transcription reserves its blob before the job is stored, so one upload
//! backs at most one job.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use medscribe_auth::{AuthzError, ensure_owner};
use medscribe_core::{ConsultationId, UserId};

use crate::blobs::{BlobError, BlobId, BlobStaging};
use crate::clinic::ClinicStore;
use crate::jobs::{Job, JobId, JobKind, JobParams, JobStatus, JobStore, JobStoreError};
use crate::ledger::LedgerError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("not owned by caller")]
    Unauthorized,
    #[error("{0}")]
    NotFound(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<JobStoreError> for DispatchError {
    fn from(e: JobStoreError) -> Self {
        match e {
            JobStoreError::NotFound(id) => DispatchError::NotFound(format!("job not found: {id}")),
            other => DispatchError::Storage(other.to_string()),
        }
    }
}

impl From<AuthzError> for DispatchError {
    fn from(e: AuthzError) -> Self {
        match e {
            AuthzError::NotOwner => DispatchError::Unauthorized,
        }
    }
}

impl From<LedgerError> for DispatchError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Storage(msg) => DispatchError::Storage(msg),
            other => DispatchError::NotFound(other.to_string()),
        }
    }
}

/// What a client asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRequest {
    Transcribe {
        subject_id: ConsultationId,
        blob_id: BlobId,
    },
    Chat {
        subject_id: ConsultationId,
        prompt: String,
    },
    Report {
        subject_id: ConsultationId,
    },
}

impl JobRequest {
    pub fn subject_id(&self) -> ConsultationId {
        match self {
            JobRequest::Transcribe { subject_id, .. }
            | JobRequest::Chat { subject_id, .. }
            | JobRequest::Report { subject_id } => *subject_id,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Transcribe { .. } => JobKind::Transcribe,
            JobRequest::Chat { .. } => JobKind::Chat,
            JobRequest::Report { .. } => JobKind::Report,
        }
    }

    fn into_params(self) -> JobParams {
        match self {
            JobRequest::Transcribe { blob_id, .. } => JobParams::Transcribe { blob_id },
            JobRequest::Chat { prompt, .. } => JobParams::Chat { prompt },
            JobRequest::Report { .. } => JobParams::Report,
        }
    }
}

/// Client-facing view of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobView {
    /// Pending or running.
    Processing,
    Completed { result: String },
    Failed { error: String },
}

impl JobView {
    pub fn of(job: &Job) -> Self {
        match job.status {
            JobStatus::Pending | JobStatus::Running => JobView::Processing,
            JobStatus::Done => JobView::Completed {
                result: job.result.clone().unwrap_or_default(),
            },
            JobStatus::Failed => JobView::Failed {
                error: job.error.clone().unwrap_or_default(),
            },
        }
    }
}

#[derive(Clone)]
pub struct JobDispatcher {
    jobs: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStaging>,
    clinic: Arc<dyn ClinicStore>,
    wake: Arc<Notify>,
}

impl JobDispatcher {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStaging>,
        clinic: Arc<dyn ClinicStore>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            jobs,
            blobs,
            clinic,
            wake,
        }
    }

    /// Signal the worker pool listens on.
    pub fn wake_signal(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    pub async fn submit(&self, requester: UserId, request: JobRequest) -> Result<Job, DispatchError> {
        let subject_id = request.subject_id();
        let kind = request.kind();

        let consultation = self.clinic.get_consultation(subject_id).await?;
        ensure_owner(requester, consultation.owner_user_id).inspect_err(|_| {
            warn!(consultation_id = %subject_id, kind = %kind, "job rejected: consultation not owned by requester");
        })?;

        match &request {
            JobRequest::Transcribe { blob_id, .. } => {
                let blob = match self.blobs.describe(*blob_id).await {
                    Ok(blob) => blob,
                    Err(BlobError::NotFound(_)) => {
                        return Err(rejected(subject_id, kind, format!("blob {blob_id} is not staged")));
                    }
                    Err(BlobError::Storage(msg)) => return Err(DispatchError::Storage(msg)),
                    Err(other) => return Err(rejected(subject_id, kind, other.to_string())),
                };
                if blob.subject_id != subject_id || blob.uploader_id != requester {
                    return Err(rejected(
                        subject_id,
                        kind,
                        format!("blob {blob_id} was not staged for this consultation"),
                    ));
                }
            }
            JobRequest::Chat { prompt, .. } => {
                if prompt.trim().is_empty() {
                    return Err(rejected(subject_id, kind, "prompt is empty".into()));
                }
            }
            JobRequest::Report { .. } => {
                if consultation.resources.is_empty() {
                    return Err(rejected(
                        subject_id,
                        kind,
                        "consultation has no resources to summarize".into(),
                    ));
                }
            }
        }

        let job = Job::new(requester, subject_id, request.into_params(), Utc::now());
        if let JobParams::Transcribe { blob_id } = &job.params {
            self.reserve_blob(*blob_id, &job).await?;
        }
        if let Err(e) = self.jobs.insert(job.clone()).await {
            if let JobParams::Transcribe { blob_id } = &job.params {
                self.abandon_blob(*blob_id).await;
            }
            return Err(e.into());
        }
        info!(job_id = %job.id, consultation_id = %subject_id, kind = %kind, "job submitted");
        self.wake.notify_one();
        Ok(job)
    }

    async fn reserve_blob(&self, blob_id: BlobId, job: &Job) -> Result<(), DispatchError> {
        match self.blobs.reserve(blob_id, job.id).await {
            Ok(()) => Ok(()),
            Err(BlobError::Storage(msg)) => Err(DispatchError::Storage(msg)),
            Err(BlobError::AlreadyReserved { job_id, .. }) => Err(rejected(
                job.subject_id,
                job.kind(),
                format!("blob {blob_id} is already used by job {job_id}"),
            )),
            Err(BlobError::NotFound(_)) => Err(rejected(
                job.subject_id,
                job.kind(),
                format!("blob {blob_id} is not staged"),
            )),
        }
    }

    /// A reservation whose job was never stored would pin the blob until the
    /// sweep, so the upload is dropped instead.
    async fn abandon_blob(&self, blob_id: BlobId) {
        if let Err(e) = self.blobs.release(blob_id).await {
            warn!(blob_id = %blob_id, error = %e, "could not release blob of an unstored job");
        }
    }

    /// Read-through onto the job store. Jobs of other users, or whose
    /// consultation changed hands, are reported as not found.
    pub async fn get_status(&self, requester: UserId, job_id: JobId) -> Result<Job, DispatchError> {
        let job = self.jobs.get(job_id).await?;
        if job.owner_user_id != requester {
            debug!(job_id = %job_id, "status poll for another user's job");
            return Err(DispatchError::NotFound(format!("job not found: {job_id}")));
        }
        let consultation = self.clinic.get_consultation(job.subject_id).await?;
        if !consultation.is_owned_by(requester) {
            return Err(DispatchError::NotFound(format!("job not found: {job_id}")));
        }
        Ok(job)
    }
}

fn rejected(subject_id: ConsultationId, kind: JobKind, reason: String) -> DispatchError {
    warn!(consultation_id = %subject_id, kind = %kind, reason = %reason, "job rejected");
    DispatchError::PreconditionFailed(reason)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use medscribe_core::{Consultation, NewConsultation, NewPatient, Patient, PatientId};

    use super::*;
    use crate::blobs::{InMemoryBlobStaging, NewBlob};
    use crate::clinic::InMemoryClinicStore;
    use crate::jobs::InMemoryJobStore;

    struct Setup {
        jobs: Arc<InMemoryJobStore>,
        blobs: Arc<InMemoryBlobStaging>,
        dispatcher: JobDispatcher,
        owner: UserId,
        consultation: ConsultationId,
    }

    async fn setup() -> Setup {
        let jobs = InMemoryJobStore::arc();
        let blobs = Arc::new(InMemoryBlobStaging::new());
        let clinic = InMemoryClinicStore::arc();
        let owner = UserId::new();

        let patient = Patient::register(
            PatientId::new(),
            owner,
            NewPatient {
                first_name: "Lucía".into(),
                middle_name: None,
                last_name: "Ramos".into(),
                second_last_name: None,
                address: "Calle Mayor 3".into(),
                date_of_birth: NaiveDate::from_ymd_opt(1971, 8, 30).unwrap(),
                description: None,
            },
        )
        .unwrap();
        let consultation = Consultation::schedule(
            ConsultationId::new(),
            owner,
            &patient,
            NewConsultation {
                patient_id: patient.id,
                scheduled_on: Utc::now(),
                time: "09:30".into(),
                description: String::new(),
            },
        )
        .unwrap();
        let consultation_id = consultation.id;
        clinic.insert_patient(patient).await.unwrap();
        clinic.insert_consultation(consultation).await.unwrap();

        let dispatcher = JobDispatcher::new(
            jobs.clone(),
            blobs.clone(),
            clinic,
            Arc::new(Notify::new()),
        );
        Setup {
            jobs,
            blobs,
            dispatcher,
            owner,
            consultation: consultation_id,
        }
    }

    #[tokio::test]
    async fn blank_prompt_is_a_failed_precondition() {
        let s = setup().await;
        let err = s
            .dispatcher
            .submit(
                s.owner,
                JobRequest::Chat {
                    subject_id: s.consultation,
                    prompt: "   ".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::PreconditionFailed(_)));
        assert!(s.jobs.is_empty());
    }

    #[tokio::test]
    async fn blob_uploaded_by_someone_else_is_rejected() {
        let s = setup().await;
        let blob_id = s
            .blobs
            .stage(NewBlob::new(s.consultation, UserId::new(), "a.webm", "audio/webm", vec![1, 2]))
            .await
            .unwrap();

        let err = s
            .dispatcher
            .submit(
                s.owner,
                JobRequest::Transcribe {
                    subject_id: s.consultation,
                    blob_id,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::PreconditionFailed(_)));
        assert!(s.jobs.is_empty());
    }

    #[tokio::test]
    async fn accepted_chat_is_pending_and_visible_to_its_owner_only() {
        let s = setup().await;
        let job = s
            .dispatcher
            .submit(
                s.owner,
                JobRequest::Chat {
                    subject_id: s.consultation,
                    prompt: "Paciente refiere".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.kind(), JobKind::Chat);

        let polled = s.dispatcher.get_status(s.owner, job.id).await.unwrap();
        assert_eq!(JobView::of(&polled), JobView::Processing);

        let err = s.dispatcher.get_status(UserId::new(), job.id).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }
}
