//! Blob staging area for uploaded audio.
//!
//! A staged blob is consumed at most once: [`BlobStaging::take`] flips the
//! record to consumed in the same step that hands out the bytes, so a second
//! `take` on the same id is `NotFound`. Consumed records linger until they are
//! released or swept.
//!
//! A blob also belongs to at most one job: [`BlobStaging::reserve`] binds it to
//! the transcription job that will consume it, and a second reservation fails.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use medscribe_core::{ConsultationId, UserId};

use crate::jobs::JobId;

/// Identifier of a staged upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(pub Uuid);

impl BlobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for BlobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for BlobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Upload waiting to be staged.
#[derive(Debug, Clone)]
pub struct NewBlob {
    pub subject_id: ConsultationId,
    pub uploader_id: UserId,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub staged_at: Option<DateTime<Utc>>,
}

impl NewBlob {
    pub fn new(
        subject_id: ConsultationId,
        uploader_id: UserId,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            subject_id,
            uploader_id,
            filename: filename.into(),
            content_type: content_type.into(),
            bytes,
            staged_at: None,
        }
    }

    /// Override the staging timestamp (defaults to now).
    pub fn staged_at(mut self, at: DateTime<Utc>) -> Self {
        self.staged_at = Some(at);
        self
    }
}

/// Metadata of a staged, not yet consumed blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub id: BlobId,
    pub subject_id: ConsultationId,
    pub uploader_id: UserId,
    pub filename: String,
    pub content_type: String,
    pub size: usize,
    pub created_at: DateTime<Utc>,
}

/// A blob handed to exactly one consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub id: BlobId,
    pub subject_id: ConsultationId,
    pub uploader_id: UserId,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(BlobId),
    #[error("blob {blob_id} is already bound to job {job_id}")]
    AlreadyReserved { blob_id: BlobId, job_id: JobId },
    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait BlobStaging: Send + Sync + 'static {
    /// Persist an upload and return its id.
    async fn stage(&self, blob: NewBlob) -> Result<BlobId, BlobError>;

    /// Metadata of an unconsumed blob.
    async fn describe(&self, id: BlobId) -> Result<BlobInfo, BlobError>;

    /// Bind an unconsumed blob to `job_id`. Succeeds once per blob.
    async fn reserve(&self, id: BlobId, job_id: JobId) -> Result<(), BlobError>;

    /// Hand out the blob and mark it consumed in one step.
    async fn take(&self, id: BlobId) -> Result<Blob, BlobError>;

    /// Delete the record, consumed or not. Returns whether anything was removed.
    async fn release(&self, id: BlobId) -> Result<bool, BlobError>;

    /// Delete every blob staged before `now - max_age`, consumed or not.
    async fn sweep(&self, max_age: Duration, now: DateTime<Utc>) -> Result<usize, BlobError>;
}

/// Oldest staging time that survives a sweep.
pub fn sweep_cutoff(max_age: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    chrono::Duration::from_std(max_age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug)]
struct StagedBlob {
    blob: Blob,
    consumed: bool,
    reserved_by: Option<JobId>,
}

/// In-memory staging area for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryBlobStaging {
    blobs: Mutex<HashMap<BlobId, StagedBlob>>,
}

impl InMemoryBlobStaging {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records still held, consumed ones included.
    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<BlobId, StagedBlob>>, BlobError> {
        self.blobs
            .lock()
            .map_err(|_| BlobError::Storage("blob staging lock poisoned".into()))
    }
}

#[async_trait]
impl BlobStaging for InMemoryBlobStaging {
    async fn stage(&self, new: NewBlob) -> Result<BlobId, BlobError> {
        let id = BlobId::new();
        let blob = Blob {
            id,
            subject_id: new.subject_id,
            uploader_id: new.uploader_id,
            filename: new.filename,
            content_type: new.content_type,
            bytes: new.bytes,
            created_at: new.staged_at.unwrap_or_else(Utc::now),
        };
        self.lock()?.insert(
            id,
            StagedBlob {
                blob,
                consumed: false,
                reserved_by: None,
            },
        );
        Ok(id)
    }

    async fn describe(&self, id: BlobId) -> Result<BlobInfo, BlobError> {
        let blobs = self.lock()?;
        match blobs.get(&id) {
            Some(staged) if !staged.consumed => {
                let b = &staged.blob;
                Ok(BlobInfo {
                    id,
                    subject_id: b.subject_id,
                    uploader_id: b.uploader_id,
                    filename: b.filename.clone(),
                    content_type: b.content_type.clone(),
                    size: b.bytes.len(),
                    created_at: b.created_at,
                })
            }
            _ => Err(BlobError::NotFound(id)),
        }
    }

    async fn reserve(&self, id: BlobId, job_id: JobId) -> Result<(), BlobError> {
        let mut blobs = self.lock()?;
        let staged = blobs
            .get_mut(&id)
            .filter(|s| !s.consumed)
            .ok_or(BlobError::NotFound(id))?;
        match staged.reserved_by {
            Some(holder) => Err(BlobError::AlreadyReserved {
                blob_id: id,
                job_id: holder,
            }),
            None => {
                staged.reserved_by = Some(job_id);
                Ok(())
            }
        }
    }

    async fn take(&self, id: BlobId) -> Result<Blob, BlobError> {
        let mut blobs = self.lock()?;
        let staged = blobs
            .get_mut(&id)
            .filter(|s| !s.consumed)
            .ok_or(BlobError::NotFound(id))?;
        staged.consumed = true;
        let bytes = std::mem::take(&mut staged.blob.bytes);
        Ok(Blob {
            bytes,
            ..staged.blob.clone()
        })
    }

    async fn release(&self, id: BlobId) -> Result<bool, BlobError> {
        Ok(self.lock()?.remove(&id).is_some())
    }

    async fn sweep(&self, max_age: Duration, now: DateTime<Utc>) -> Result<usize, BlobError> {
        let cutoff = sweep_cutoff(max_age, now);
        let mut blobs = self.lock()?;
        let before = blobs.len();
        blobs.retain(|_, staged| staged.blob.created_at >= cutoff);
        Ok(before - blobs.len())
    }
}
