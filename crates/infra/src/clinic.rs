//! Patient and consultation storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;

use medscribe_core::{Consultation, ConsultationId, Patient, PatientId, ResourceEntry, UserId};

use crate::ledger::{LedgerError, ResourceLedger};

/// Persistence for clinic records. Ownership rules live in
/// [`crate::records::ClinicRecords`]; stores only load and save.
#[async_trait]
pub trait ClinicStore: Send + Sync + 'static {
    async fn insert_patient(&self, patient: Patient) -> Result<(), LedgerError>;

    async fn get_patient(&self, id: PatientId) -> Result<Patient, LedgerError>;

    /// Patients registered by `owner`, ordered by last name.
    async fn list_patients(&self, owner: UserId) -> Result<Vec<Patient>, LedgerError>;

    async fn insert_consultation(&self, consultation: Consultation) -> Result<(), LedgerError>;

    /// Full consultation including its ledger snapshot.
    async fn get_consultation(&self, id: ConsultationId) -> Result<Consultation, LedgerError>;

    /// Consultations of a patient, earliest scheduled first.
    async fn list_consultations_for_patient(
        &self,
        patient_id: PatientId,
    ) -> Result<Vec<Consultation>, LedgerError>;
}

#[async_trait]
impl<S: ClinicStore + ?Sized> ClinicStore for Arc<S> {
    async fn insert_patient(&self, patient: Patient) -> Result<(), LedgerError> {
        (**self).insert_patient(patient).await
    }

    async fn get_patient(&self, id: PatientId) -> Result<Patient, LedgerError> {
        (**self).get_patient(id).await
    }

    async fn list_patients(&self, owner: UserId) -> Result<Vec<Patient>, LedgerError> {
        (**self).list_patients(owner).await
    }

    async fn insert_consultation(&self, consultation: Consultation) -> Result<(), LedgerError> {
        (**self).insert_consultation(consultation).await
    }

    async fn get_consultation(&self, id: ConsultationId) -> Result<Consultation, LedgerError> {
        (**self).get_consultation(id).await
    }

    async fn list_consultations_for_patient(
        &self,
        patient_id: PatientId,
    ) -> Result<Vec<Consultation>, LedgerError> {
        (**self).list_consultations_for_patient(patient_id).await
    }
}

type ConsultationCell = Arc<Mutex<Consultation>>;

/// In-memory clinic store and resource ledger for tests/dev.
///
/// Every consultation has its own lock, so appends on different consultations
/// never contend and appends on the same one are applied one at a time.
#[derive(Debug, Default)]
pub struct InMemoryClinicStore {
    patients: RwLock<HashMap<PatientId, Patient>>,
    consultations: RwLock<HashMap<ConsultationId, ConsultationCell>>,
}

impl InMemoryClinicStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn cell(&self, id: ConsultationId) -> Result<ConsultationCell, LedgerError> {
        self.consultations
            .read()
            .map_err(|_| poisoned())?
            .get(&id)
            .cloned()
            .ok_or(LedgerError::ConsultationNotFound(id))
    }

    fn snapshot(cell: &ConsultationCell) -> Result<Consultation, LedgerError> {
        Ok(cell.lock().map_err(|_| poisoned())?.clone())
    }
}

fn poisoned() -> LedgerError {
    LedgerError::Storage("clinic store lock poisoned".into())
}

#[async_trait]
impl ClinicStore for InMemoryClinicStore {
    async fn insert_patient(&self, patient: Patient) -> Result<(), LedgerError> {
        self.patients
            .write()
            .map_err(|_| poisoned())?
            .insert(patient.id, patient);
        Ok(())
    }

    async fn get_patient(&self, id: PatientId) -> Result<Patient, LedgerError> {
        self.patients
            .read()
            .map_err(|_| poisoned())?
            .get(&id)
            .cloned()
            .ok_or(LedgerError::PatientNotFound(id))
    }

    async fn list_patients(&self, owner: UserId) -> Result<Vec<Patient>, LedgerError> {
        let mut patients: Vec<Patient> = self
            .patients
            .read()
            .map_err(|_| poisoned())?
            .values()
            .filter(|p| p.owner_user_id == owner)
            .cloned()
            .collect();
        patients.sort_by(|a, b| {
            (&a.last_name, &a.first_name, a.id.as_uuid())
                .cmp(&(&b.last_name, &b.first_name, b.id.as_uuid()))
        });
        Ok(patients)
    }

    async fn insert_consultation(&self, consultation: Consultation) -> Result<(), LedgerError> {
        self.consultations
            .write()
            .map_err(|_| poisoned())?
            .insert(consultation.id, Arc::new(Mutex::new(consultation)));
        Ok(())
    }

    async fn get_consultation(&self, id: ConsultationId) -> Result<Consultation, LedgerError> {
        Self::snapshot(&self.cell(id)?)
    }

    async fn list_consultations_for_patient(
        &self,
        patient_id: PatientId,
    ) -> Result<Vec<Consultation>, LedgerError> {
        let cells: Vec<ConsultationCell> = self
            .consultations
            .read()
            .map_err(|_| poisoned())?
            .values()
            .cloned()
            .collect();

        let mut out = Vec::new();
        for cell in &cells {
            let consultation = Self::snapshot(cell)?;
            if consultation.patient_id == patient_id {
                out.push(consultation);
            }
        }
        out.sort_by_key(|c| (c.scheduled_on, *c.id.as_uuid()));
        Ok(out)
    }
}

#[async_trait]
impl ResourceLedger for InMemoryClinicStore {
    async fn append(&self, subject: ConsultationId, entry: ResourceEntry) -> Result<(), LedgerError> {
        let cell = self.cell(subject)?;
        let mut consultation = cell.lock().map_err(|_| poisoned())?;
        consultation.push_resource(entry);
        Ok(())
    }

    async fn list(&self, subject: ConsultationId) -> Result<Vec<ResourceEntry>, LedgerError> {
        let cell = self.cell(subject)?;
        let consultation = cell.lock().map_err(|_| poisoned())?;
        Ok(consultation.resources.clone())
    }
}
