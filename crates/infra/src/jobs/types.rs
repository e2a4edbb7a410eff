//! Core job types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use medscribe_core::{ConsultationId, UserId};

use crate::blobs::BlobId;

use super::store::JobStoreError;

/// Unique job identifier (the handle clients poll with).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Transcribe,
    Chat,
    Report,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Transcribe => "transcribe",
            JobKind::Chat => "chat",
            JobKind::Report => "report",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific job input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobParams {
    /// Transcribe the staged blob.
    Transcribe { blob_id: BlobId },
    /// Complete a prompt.
    Chat { prompt: String },
    /// Summarize the subject's ledger.
    Report,
}

impl JobParams {
    pub fn kind(&self) -> JobKind {
        match self {
            JobParams::Transcribe { .. } => JobKind::Transcribe,
            JobParams::Chat { .. } => JobKind::Chat,
            JobParams::Report => JobKind::Report,
        }
    }
}

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting to be picked up
    Pending,
    /// Claimed by a worker
    Running,
    /// Completed successfully
    Done,
    /// Failed; `error` holds the reason
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "done" => Some(JobStatus::Done),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A background AI job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Consultation the job reads from and appends to.
    pub subject_id: ConsultationId,
    /// User who submitted the job.
    pub owner_user_id: UserId,
    pub params: JobParams,
    pub status: JobStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        owner_user_id: UserId,
        subject_id: ConsultationId,
        params: JobParams,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            subject_id,
            owner_user_id,
            params,
            status: JobStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> JobKind {
        self.params.kind()
    }

    /// pending → running
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Result<(), JobStoreError> {
        self.transition(JobStatus::Pending, JobStatus::Running, now)
    }

    /// running → done
    pub fn mark_done(&mut self, result: String, now: DateTime<Utc>) -> Result<(), JobStoreError> {
        self.transition(JobStatus::Running, JobStatus::Done, now)?;
        self.result = Some(result);
        Ok(())
    }

    /// running → failed
    pub fn mark_failed(&mut self, error: String, now: DateTime<Utc>) -> Result<(), JobStoreError> {
        self.transition(JobStatus::Running, JobStatus::Failed, now)?;
        self.error = Some(error);
        Ok(())
    }

    fn transition(
        &mut self,
        from: JobStatus,
        to: JobStatus,
        now: DateTime<Utc>,
    ) -> Result<(), JobStoreError> {
        if self.status != from {
            return Err(JobStoreError::IllegalTransition {
                job_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_job() -> Job {
        Job::new(
            UserId::new(),
            ConsultationId::new(),
            JobParams::Chat {
                prompt: "hi".into(),
            },
            Utc::now(),
        )
    }

    #[test]
    fn lifecycle_runs_forward_only() {
        let mut job = chat_job();
        assert_eq!(job.kind(), JobKind::Chat);
        assert_eq!(job.status, JobStatus::Pending);

        job.mark_running(Utc::now()).unwrap();
        job.mark_done("answer".into(), Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.result.as_deref(), Some("answer"));
    }

    #[test]
    fn terminal_jobs_are_never_reopened() {
        let mut job = chat_job();
        job.mark_running(Utc::now()).unwrap();
        job.mark_failed("boom".into(), Utc::now()).unwrap();

        let err = job.mark_done("late".into(), Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            JobStoreError::IllegalTransition {
                from: JobStatus::Failed,
                to: JobStatus::Done,
                ..
            }
        ));
        assert!(job.mark_running(Utc::now()).is_err());
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert_eq!(job.result, None);
    }

    #[test]
    fn pending_jobs_cannot_skip_running() {
        let mut job = chat_job();
        assert!(job.mark_done("x".into(), Utc::now()).is_err());
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn params_carry_a_kind_tag() {
        let json = serde_json::to_value(JobParams::Report).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "report"}));
        assert_eq!(JobParams::Report.kind().as_str(), "report");
        assert_eq!(JobStatus::parse(JobStatus::Running.as_str()), Some(JobStatus::Running));
    }
}
