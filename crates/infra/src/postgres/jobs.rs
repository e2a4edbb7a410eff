use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use medscribe_core::{ConsultationId, UserId};

use super::map_sqlx_error;
use crate::jobs::{Job, JobId, JobParams, JobStatus, JobStore, JobStoreError};

const JOB_COLUMNS: &str =
    "id, subject_id, owner_user_id, params, status, result, error, created_at, updated_at";

/// Job store over the `jobs` table.
///
/// Transitions are conditional updates on the expected status, so two workers
/// can never both move the same job forward.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn transition(
        &self,
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<(), JobStoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $3, result = COALESCE($4, result), error = COALESCE($5, error), updated_at = $6
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(job_id.0)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(result)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| storage("transition", e))?;

        if updated.rows_affected() == 1 {
            return Ok(());
        }

        // Nothing matched: either the job is gone or it is in another state.
        let current = self.get(job_id).await?;
        Err(JobStoreError::IllegalTransition {
            job_id,
            from: current.status,
            to,
        })
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, kind = %job.kind()), err)]
    async fn insert(&self, job: Job) -> Result<(), JobStoreError> {
        if job.status != JobStatus::Pending {
            return Err(JobStoreError::IllegalTransition {
                job_id: job.id,
                from: job.status,
                to: JobStatus::Pending,
            });
        }
        let params_json = serde_json::to_value(&job.params)
            .map_err(|e| JobStoreError::Storage(format!("failed to encode job params: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, subject_id, owner_user_id, params, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            "#,
        )
        .bind(job.id.0)
        .bind(job.kind().as_str())
        .bind(*job.subject_id.as_uuid())
        .bind(*job.owner_user_id.as_uuid())
        .bind(params_json)
        .bind(job.status.as_str())
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| storage("insert", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn mark_running(&self, job_id: JobId) -> Result<(), JobStoreError> {
        self.transition(job_id, JobStatus::Pending, JobStatus::Running, None, None)
            .await
    }

    #[instrument(skip(self, result), fields(job_id = %job_id), err)]
    async fn mark_done(&self, job_id: JobId, result: String) -> Result<(), JobStoreError> {
        self.transition(job_id, JobStatus::Running, JobStatus::Done, Some(result), None)
            .await
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn mark_failed(&self, job_id: JobId, error: String) -> Result<(), JobStoreError> {
        self.transition(job_id, JobStatus::Running, JobStatus::Failed, None, Some(error))
            .await
    }

    async fn get(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(job_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage("get", e))?;

        match row {
            Some(row) => JobRow::from_row(&row)?.try_into(),
            None => Err(JobStoreError::NotFound(job_id)),
        }
    }

    #[instrument(skip(self), err)]
    async fn claim_next(&self) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = 'running', updated_at = $1
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending'
                ORDER BY created_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage("claim_next", e))?;

        match row {
            Some(row) => Ok(Some(Job::try_from(JobRow::from_row(&row)?)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), err)]
    async fn fail_interrupted(&self, reason: &str) -> Result<usize, JobStoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', error = $1, updated_at = $2
            WHERE status = 'running'
            "#,
        )
        .bind(reason)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| storage("fail_interrupted", e))?;

        Ok(updated.rows_affected() as usize)
    }
}

fn storage(operation: &str, err: sqlx::Error) -> JobStoreError {
    JobStoreError::Storage(map_sqlx_error(operation, err).into_message())
}

struct JobRow {
    id: Uuid,
    subject_id: Uuid,
    owner_user_id: Uuid,
    params: serde_json::Value,
    status: String,
    result: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, JobStoreError> {
        let read = |e: sqlx::Error| storage("decode_job", e);
        Ok(JobRow {
            id: row.try_get("id").map_err(read)?,
            subject_id: row.try_get("subject_id").map_err(read)?,
            owner_user_id: row.try_get("owner_user_id").map_err(read)?,
            params: row.try_get("params").map_err(read)?,
            status: row.try_get("status").map_err(read)?,
            result: row.try_get("result").map_err(read)?,
            error: row.try_get("error").map_err(read)?,
            created_at: row.try_get("created_at").map_err(read)?,
            updated_at: row.try_get("updated_at").map_err(read)?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::parse(&row.status).ok_or_else(|| {
            JobStoreError::Storage(format!("unknown job status '{}'", row.status))
        })?;
        let params: JobParams = serde_json::from_value(row.params)
            .map_err(|e| JobStoreError::Storage(format!("failed to decode job params: {e}")))?;

        Ok(Job {
            id: JobId::from_uuid(row.id),
            subject_id: ConsultationId::from_uuid(row.subject_id),
            owner_user_id: UserId::from_uuid(row.owner_user_id),
            params,
            status,
            result: row.result,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
