//! Ownership-checked access to patients and consultations.

use std::sync::Arc;

use tracing::{debug, info};

use medscribe_auth::{AuthzError, ensure_owner};

use medscribe_core::{
    Consultation, ConsultationId, DomainError, NewConsultation, NewPatient, Patient, PatientId,
    ResourceEntry, UserId,
};

use crate::clinic::ClinicStore;
use crate::ledger::LedgerError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RecordsError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not owned by caller")]
    Unauthorized,
    #[error("{0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<LedgerError> for RecordsError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Storage(msg) => RecordsError::Storage(msg),
            other => RecordsError::NotFound(other.to_string()),
        }
    }
}

impl From<AuthzError> for RecordsError {
    fn from(e: AuthzError) -> Self {
        match e {
            AuthzError::NotOwner => RecordsError::Unauthorized,
        }
    }
}

impl From<DomainError> for RecordsError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                RecordsError::Validation(msg)
            }
            DomainError::Unauthorized => RecordsError::Unauthorized,
        }
    }
}

/// Patient and consultation operations on behalf of one user.
///
/// Unknown ids are `NotFound`; records owned by someone else are
/// `Unauthorized`. Ownership is checked on every call.
#[derive(Clone)]
pub struct ClinicRecords {
    store: Arc<dyn ClinicStore>,
}

impl ClinicRecords {
    pub fn new(store: Arc<dyn ClinicStore>) -> Self {
        Self { store }
    }

    pub async fn create_patient(
        &self,
        owner: UserId,
        input: NewPatient,
    ) -> Result<Patient, RecordsError> {
        let patient = Patient::register(PatientId::new(), owner, input)?;
        self.store.insert_patient(patient.clone()).await?;
        info!(patient_id = %patient.id, owner = %owner, "patient registered");
        Ok(patient)
    }

    pub async fn list_patients(&self, owner: UserId) -> Result<Vec<Patient>, RecordsError> {
        Ok(self.store.list_patients(owner).await?)
    }

    pub async fn get_patient(&self, owner: UserId, id: PatientId) -> Result<Patient, RecordsError> {
        let patient = self.store.get_patient(id).await?;
        ensure_owner(owner, patient.owner_user_id).inspect_err(|_| {
            debug!(patient_id = %id, "patient not owned by caller");
        })?;
        Ok(patient)
    }

    pub async fn create_consultation(
        &self,
        owner: UserId,
        input: NewConsultation,
    ) -> Result<Consultation, RecordsError> {
        let patient = self.get_patient(owner, input.patient_id).await?;
        let consultation = Consultation::schedule(ConsultationId::new(), owner, &patient, input)?;
        self.store.insert_consultation(consultation.clone()).await?;
        info!(
            consultation_id = %consultation.id,
            patient_id = %patient.id,
            "consultation scheduled"
        );
        Ok(consultation)
    }

    pub async fn get_consultation(
        &self,
        owner: UserId,
        id: ConsultationId,
    ) -> Result<Consultation, RecordsError> {
        let consultation = self.store.get_consultation(id).await?;
        ensure_owner(owner, consultation.owner_user_id).inspect_err(|_| {
            debug!(consultation_id = %id, "consultation not owned by caller");
        })?;
        Ok(consultation)
    }

    pub async fn list_consultations_for_patient(
        &self,
        owner: UserId,
        patient_id: PatientId,
    ) -> Result<Vec<Consultation>, RecordsError> {
        self.get_patient(owner, patient_id).await?;
        Ok(self.store.list_consultations_for_patient(patient_id).await?)
    }

    pub async fn resources(
        &self,
        owner: UserId,
        id: ConsultationId,
    ) -> Result<Vec<ResourceEntry>, RecordsError> {
        Ok(self.get_consultation(owner, id).await?.resources)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::*;
    use crate::clinic::InMemoryClinicStore;

    fn new_patient(first: &str) -> NewPatient {
        NewPatient {
            first_name: first.into(),
            middle_name: None,
            last_name: "Pérez".into(),
            second_last_name: Some("Luna".into()),
            address: "Av. Siempre Viva 742".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1975, 1, 2).unwrap(),
            description: None,
        }
    }

    fn new_consultation(patient_id: PatientId) -> NewConsultation {
        NewConsultation {
            patient_id,
            scheduled_on: Utc::now(),
            time: "10:30".into(),
            description: "follow-up".into(),
        }
    }

    #[tokio::test]
    async fn owner_can_schedule_and_read_back() {
        let records = ClinicRecords::new(InMemoryClinicStore::arc());
        let owner = UserId::new();

        let patient = records.create_patient(owner, new_patient("Luis")).await.unwrap();
        let c = records
            .create_consultation(owner, new_consultation(patient.id))
            .await
            .unwrap();

        assert_eq!(records.get_consultation(owner, c.id).await.unwrap(), c);
        assert!(records.resources(owner, c.id).await.unwrap().is_empty());
        assert_eq!(
            records
                .list_consultations_for_patient(owner, patient.id)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn other_users_are_rejected() {
        let records = ClinicRecords::new(InMemoryClinicStore::arc());
        let owner = UserId::new();
        let intruder = UserId::new();

        let patient = records.create_patient(owner, new_patient("Luis")).await.unwrap();
        let c = records
            .create_consultation(owner, new_consultation(patient.id))
            .await
            .unwrap();

        assert!(matches!(
            records.create_consultation(intruder, new_consultation(patient.id)).await,
            Err(RecordsError::Unauthorized)
        ));
        assert!(matches!(
            records.get_consultation(intruder, c.id).await,
            Err(RecordsError::Unauthorized)
        ));
        assert!(matches!(
            records.list_consultations_for_patient(intruder, patient.id).await,
            Err(RecordsError::Unauthorized)
        ));
        assert!(records.list_patients(intruder).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_and_invalid_inputs() {
        let records = ClinicRecords::new(InMemoryClinicStore::arc());
        let owner = UserId::new();

        assert!(matches!(
            records.get_consultation(owner, ConsultationId::new()).await,
            Err(RecordsError::NotFound(_))
        ));
        assert!(matches!(
            records.create_patient(owner, new_patient("  ")).await,
            Err(RecordsError::Validation(_))
        ));
    }
}
