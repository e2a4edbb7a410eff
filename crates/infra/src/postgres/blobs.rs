use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use medscribe_core::{ConsultationId, UserId};

use super::map_sqlx_error;
use crate::blobs::{sweep_cutoff, Blob, BlobError, BlobId, BlobInfo, BlobStaging, NewBlob};
use crate::jobs::JobId;

/// Blob staging over the `staged_blobs` table.
///
/// `reserve` and `take` are single conditional updates on `reserved_by` and
/// `consumed`; the bytes stay in the row until `release` or the sweeper deletes it.
#[derive(Debug, Clone)]
pub struct PgBlobStaging {
    pool: PgPool,
}

impl PgBlobStaging {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BlobStaging for PgBlobStaging {
    #[instrument(
        skip(self, new),
        fields(consultation_id = %new.subject_id, size = new.bytes.len()),
        err
    )]
    async fn stage(&self, new: NewBlob) -> Result<BlobId, BlobError> {
        let id = BlobId::new();
        sqlx::query(
            r#"
            INSERT INTO staged_blobs (id, subject_id, uploader_id, filename, content_type, bytes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id.0)
        .bind(*new.subject_id.as_uuid())
        .bind(*new.uploader_id.as_uuid())
        .bind(&new.filename)
        .bind(&new.content_type)
        .bind(&new.bytes)
        .bind(new.staged_at.unwrap_or_else(Utc::now))
        .execute(&self.pool)
        .await
        .map_err(|e| storage("stage", e))?;
        Ok(id)
    }

    async fn describe(&self, id: BlobId) -> Result<BlobInfo, BlobError> {
        let row = sqlx::query(
            r#"
            SELECT id, subject_id, uploader_id, filename, content_type,
                   octet_length(bytes)::BIGINT AS size, created_at
            FROM staged_blobs
            WHERE id = $1 AND NOT consumed
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage("describe", e))?
        .ok_or(BlobError::NotFound(id))?;

        let read = |e: sqlx::Error| storage("decode_blob", e);
        let size: i64 = row.try_get("size").map_err(read)?;
        Ok(BlobInfo {
            id,
            subject_id: ConsultationId::from_uuid(row.try_get("subject_id").map_err(read)?),
            uploader_id: UserId::from_uuid(row.try_get("uploader_id").map_err(read)?),
            filename: row.try_get("filename").map_err(read)?,
            content_type: row.try_get("content_type").map_err(read)?,
            size: usize::try_from(size).unwrap_or_default(),
            created_at: row.try_get("created_at").map_err(read)?,
        })
    }

    #[instrument(skip(self), fields(blob_id = %id, job_id = %job_id), err)]
    async fn reserve(&self, id: BlobId, job_id: JobId) -> Result<(), BlobError> {
        let updated = sqlx::query(
            r#"
            UPDATE staged_blobs
            SET reserved_by = $2
            WHERE id = $1 AND NOT consumed AND reserved_by IS NULL
            "#,
        )
        .bind(id.0)
        .bind(job_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| storage("reserve", e))?;

        if updated.rows_affected() == 1 {
            return Ok(());
        }

        let holder: Option<Option<Uuid>> =
            sqlx::query_scalar("SELECT reserved_by FROM staged_blobs WHERE id = $1 AND NOT consumed")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| storage("reserve", e))?;
        match holder.flatten() {
            Some(holder) => Err(BlobError::AlreadyReserved {
                blob_id: id,
                job_id: JobId(holder),
            }),
            None => Err(BlobError::NotFound(id)),
        }
    }

    #[instrument(skip(self), fields(blob_id = %id), err)]
    async fn take(&self, id: BlobId) -> Result<Blob, BlobError> {
        let row = sqlx::query(
            r#"
            UPDATE staged_blobs
            SET consumed = TRUE
            WHERE id = $1 AND NOT consumed
            RETURNING id, subject_id, uploader_id, filename, content_type, bytes, created_at
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage("take", e))?
        .ok_or(BlobError::NotFound(id))?;

        Ok(BlobRow::from_row(&row)?.into())
    }

    #[instrument(skip(self), fields(blob_id = %id), err)]
    async fn release(&self, id: BlobId) -> Result<bool, BlobError> {
        let deleted = sqlx::query("DELETE FROM staged_blobs WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| storage("release", e))?;
        Ok(deleted.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn sweep(&self, max_age: Duration, now: DateTime<Utc>) -> Result<usize, BlobError> {
        let deleted = sqlx::query("DELETE FROM staged_blobs WHERE created_at < $1")
            .bind(sweep_cutoff(max_age, now))
            .execute(&self.pool)
            .await
            .map_err(|e| storage("sweep", e))?;
        Ok(deleted.rows_affected() as usize)
    }
}

fn storage(operation: &str, err: sqlx::Error) -> BlobError {
    BlobError::Storage(map_sqlx_error(operation, err).into_message())
}

struct BlobRow {
    id: Uuid,
    subject_id: Uuid,
    uploader_id: Uuid,
    filename: String,
    content_type: String,
    bytes: Vec<u8>,
    created_at: DateTime<Utc>,
}

impl BlobRow {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, BlobError> {
        let read = |e: sqlx::Error| storage("decode_blob", e);
        Ok(BlobRow {
            id: row.try_get("id").map_err(read)?,
            subject_id: row.try_get("subject_id").map_err(read)?,
            uploader_id: row.try_get("uploader_id").map_err(read)?,
            filename: row.try_get("filename").map_err(read)?,
            content_type: row.try_get("content_type").map_err(read)?,
            bytes: row.try_get("bytes").map_err(read)?,
            created_at: row.try_get("created_at").map_err(read)?,
        })
    }
}

impl From<BlobRow> for Blob {
    fn from(row: BlobRow) -> Self {
        Blob {
            id: BlobId::from_uuid(row.id),
            subject_id: ConsultationId::from_uuid(row.subject_id),
            uploader_id: UserId::from_uuid(row.uploader_id),
            filename: row.filename,
            content_type: row.content_type,
            bytes: row.bytes,
            created_at: row.created_at,
        }
    }
}
