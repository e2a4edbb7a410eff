//! Resource ledger: the append-only entry list of a consultation.
//!
//! `append` must be atomic per consultation. Implementations serialize writers
//! of one consultation (a per-row lock or an atomic list-append) and never
//! rewrite the whole list from a stale read.

use std::sync::Arc;

use async_trait::async_trait;

use medscribe_core::{ConsultationId, PatientId, ResourceEntry};

#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("consultation not found: {0}")]
    ConsultationNotFound(ConsultationId),
    #[error("patient not found: {0}")]
    PatientNotFound(PatientId),
    #[error("storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LedgerError::ConsultationNotFound(_) | LedgerError::PatientNotFound(_)
        )
    }
}

#[async_trait]
pub trait ResourceLedger: Send + Sync + 'static {
    /// Append one entry. Report entries also refresh the consultation's
    /// `report_text` in the same atomic step.
    async fn append(&self, subject: ConsultationId, entry: ResourceEntry) -> Result<(), LedgerError>;

    /// Snapshot of the entries in append order.
    async fn list(&self, subject: ConsultationId) -> Result<Vec<ResourceEntry>, LedgerError>;

    /// Text of the most recent report entry, read from the entries themselves.
    async fn latest_report(&self, subject: ConsultationId) -> Result<Option<String>, LedgerError> {
        let entries = self.list(subject).await?;
        Ok(entries
            .iter()
            .rev()
            .find_map(ResourceEntry::report_text)
            .map(str::to_string))
    }
}

#[async_trait]
impl<L: ResourceLedger + ?Sized> ResourceLedger for Arc<L> {
    async fn append(&self, subject: ConsultationId, entry: ResourceEntry) -> Result<(), LedgerError> {
        (**self).append(subject, entry).await
    }

    async fn list(&self, subject: ConsultationId) -> Result<Vec<ResourceEntry>, LedgerError> {
        (**self).list(subject).await
    }

    async fn latest_report(&self, subject: ConsultationId) -> Result<Option<String>, LedgerError> {
        (**self).latest_report(subject).await
    }
}
