//! Clinic records: patients and consultations.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{ConsultationId, PatientId, UserId};
use crate::resource::{ResourceEntry, ResourceKind};

/// Input for registering a patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPatient {
    pub first_name: String,
    #[serde(default)]
    pub middle_name: Option<String>,
    pub last_name: String,
    #[serde(default)]
    pub second_last_name: Option<String>,
    pub address: String,
    pub date_of_birth: NaiveDate,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewPatient {
    pub fn validate(&self) -> DomainResult<()> {
        if self.first_name.trim().is_empty() {
            return Err(DomainError::validation("first_name must not be empty"));
        }
        if self.last_name.trim().is_empty() {
            return Err(DomainError::validation("last_name must not be empty"));
        }
        Ok(())
    }
}

/// A patient owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    pub owner_user_id: UserId,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub second_last_name: Option<String>,
    pub address: String,
    pub date_of_birth: NaiveDate,
    pub description: Option<String>,
}

impl Patient {
    pub fn register(id: PatientId, owner_user_id: UserId, input: NewPatient) -> DomainResult<Self> {
        input.validate()?;
        Ok(Self {
            id,
            owner_user_id,
            first_name: input.first_name,
            middle_name: input.middle_name,
            last_name: input.last_name,
            second_last_name: input.second_last_name,
            address: input.address,
            date_of_birth: input.date_of_birth,
            description: input.description,
        })
    }
}

/// Input for scheduling a consultation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewConsultation {
    pub patient_id: PatientId,
    pub scheduled_on: DateTime<Utc>,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub description: String,
}

/// A consultation and its resource ledger.
///
/// `resources` is append-only. `report_text` caches the text of the most recently
/// appended report entry; historical reports stay in `resources`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consultation {
    pub id: ConsultationId,
    pub owner_user_id: UserId,
    pub patient_id: PatientId,
    pub scheduled_on: DateTime<Utc>,
    pub time: String,
    pub description: String,
    pub report_text: Option<String>,
    pub resources: Vec<ResourceEntry>,
}

impl Consultation {
    /// Schedule a consultation for a patient. The caller must own the patient.
    pub fn schedule(
        id: ConsultationId,
        owner_user_id: UserId,
        patient: &Patient,
        input: NewConsultation,
    ) -> DomainResult<Self> {
        if patient.id != input.patient_id {
            return Err(DomainError::validation("patient mismatch"));
        }
        if patient.owner_user_id != owner_user_id {
            return Err(DomainError::Unauthorized);
        }
        Ok(Self {
            id,
            owner_user_id,
            patient_id: input.patient_id,
            scheduled_on: input.scheduled_on,
            time: input.time,
            description: input.description,
            report_text: None,
            resources: Vec::new(),
        })
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.owner_user_id == user_id
    }

    /// Append one entry, refreshing the report cache for report entries.
    pub fn push_resource(&mut self, entry: ResourceEntry) {
        if let Some(text) = entry.report_text() {
            self.report_text = Some(text.to_string());
        }
        self.resources.push(entry);
    }

    /// Text of the most recent report entry, independent of the cached field.
    pub fn latest_report(&self) -> Option<&str> {
        self.resources
            .iter()
            .rev()
            .find(|e| e.kind() == ResourceKind::Report)
            .and_then(ResourceEntry::report_text)
    }
}
