use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use medscribe_core::{Consultation, ConsultationId, Patient, PatientId, ResourceEntry, UserId};

use super::{map_sqlx_error, DbFailure};
use crate::clinic::ClinicStore;
use crate::ledger::{LedgerError, ResourceLedger};

const PATIENT_COLUMNS: &str = "id, owner_user_id, first_name, middle_name, last_name, \
     second_last_name, address, date_of_birth, description";

const CONSULTATION_COLUMNS: &str =
    "id, owner_user_id, patient_id, scheduled_on, time_slot, description, report_text";

/// Patients, consultations and their resource ledgers.
///
/// Ledger entries live in `consultation_resources`, keyed by a per-consultation
/// sequence number. `append` holds the consultation row lock while it picks the
/// next number, so concurrent appends queue up instead of overwriting.
#[derive(Debug, Clone)]
pub struct PgClinicStore {
    pool: PgPool,
}

impl PgClinicStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn entries_for(
        &self,
        ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<ResourceEntry>>, LedgerError> {
        let rows = sqlx::query(
            r#"
            SELECT consultation_id, entry
            FROM consultation_resources
            WHERE consultation_id = ANY($1)
            ORDER BY consultation_id, seq
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("load_resources", e))?;

        let mut grouped: HashMap<Uuid, Vec<ResourceEntry>> = HashMap::new();
        for row in rows {
            let consultation_id: Uuid = row
                .try_get("consultation_id")
                .map_err(|e| storage("decode_resource", e))?;
            let entry: serde_json::Value =
                row.try_get("entry").map_err(|e| storage("decode_resource", e))?;
            grouped
                .entry(consultation_id)
                .or_default()
                .push(decode_entry(entry)?);
        }
        Ok(grouped)
    }
}

#[async_trait]
impl ClinicStore for PgClinicStore {
    #[instrument(skip(self, patient), fields(patient_id = %patient.id), err)]
    async fn insert_patient(&self, patient: Patient) -> Result<(), LedgerError> {
        sqlx::query(&format!(
            "INSERT INTO patients ({PATIENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(*patient.id.as_uuid())
        .bind(*patient.owner_user_id.as_uuid())
        .bind(&patient.first_name)
        .bind(&patient.middle_name)
        .bind(&patient.last_name)
        .bind(&patient.second_last_name)
        .bind(&patient.address)
        .bind(patient.date_of_birth)
        .bind(&patient.description)
        .execute(&self.pool)
        .await
        .map_err(|e| storage("insert_patient", e))?;
        Ok(())
    }

    async fn get_patient(&self, id: PatientId) -> Result<Patient, LedgerError> {
        let row = sqlx::query(&format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage("get_patient", e))?
            .ok_or(LedgerError::PatientNotFound(id))?;
        Ok(PatientRow::from_row(&row)?.into())
    }

    async fn list_patients(&self, owner: UserId) -> Result<Vec<Patient>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {PATIENT_COLUMNS} FROM patients WHERE owner_user_id = $1 ORDER BY last_name, first_name, id"
        ))
        .bind(*owner.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("list_patients", e))?;

        rows.iter()
            .map(|row| PatientRow::from_row(row).map(Patient::from))
            .collect()
    }

    #[instrument(skip(self, consultation), fields(consultation_id = %consultation.id), err)]
    async fn insert_consultation(&self, consultation: Consultation) -> Result<(), LedgerError> {
        sqlx::query(&format!(
            "INSERT INTO consultations ({CONSULTATION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(*consultation.id.as_uuid())
        .bind(*consultation.owner_user_id.as_uuid())
        .bind(*consultation.patient_id.as_uuid())
        .bind(consultation.scheduled_on)
        .bind(&consultation.time)
        .bind(&consultation.description)
        .bind(&consultation.report_text)
        .execute(&self.pool)
        .await
        .map_err(|e| match map_sqlx_error("insert_consultation", e) {
            DbFailure::MissingReference(_) => LedgerError::PatientNotFound(consultation.patient_id),
            other => LedgerError::Storage(other.into_message()),
        })?;
        Ok(())
    }

    async fn get_consultation(&self, id: ConsultationId) -> Result<Consultation, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {CONSULTATION_COLUMNS} FROM consultations WHERE id = $1"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage("get_consultation", e))?
        .ok_or(LedgerError::ConsultationNotFound(id))?;

        let mut resources = self.entries_for(&[*id.as_uuid()]).await?;
        let entries = resources.remove(id.as_uuid()).unwrap_or_default();
        Ok(ConsultationRow::from_row(&row)?.into_consultation(entries))
    }

    async fn list_consultations_for_patient(
        &self,
        patient_id: PatientId,
    ) -> Result<Vec<Consultation>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {CONSULTATION_COLUMNS} FROM consultations WHERE patient_id = $1 ORDER BY scheduled_on, id"
        ))
        .bind(*patient_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("list_consultations", e))?;

        let consultations = rows
            .iter()
            .map(ConsultationRow::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let ids: Vec<Uuid> = consultations.iter().map(|c| c.id).collect();
        let mut resources = self.entries_for(&ids).await?;

        Ok(consultations
            .into_iter()
            .map(|c| {
                let entries = resources.remove(&c.id).unwrap_or_default();
                c.into_consultation(entries)
            })
            .collect())
    }
}

#[async_trait]
impl ResourceLedger for PgClinicStore {
    #[instrument(skip(self, entry), fields(consultation_id = %subject, kind = ?entry.kind()), err)]
    async fn append(&self, subject: ConsultationId, entry: ResourceEntry) -> Result<(), LedgerError> {
        let encoded = serde_json::to_value(&entry)
            .map_err(|e| LedgerError::Storage(format!("failed to encode resource entry: {e}")))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage("begin_transaction", e))?;

        lock_consultation(&mut tx, subject).await?;

        sqlx::query(
            r#"
            INSERT INTO consultation_resources (consultation_id, seq, entry)
            SELECT $1, COALESCE(MAX(seq), 0) + 1, $2
            FROM consultation_resources
            WHERE consultation_id = $1
            "#,
        )
        .bind(*subject.as_uuid())
        .bind(encoded)
        .execute(&mut *tx)
        .await
        .map_err(|e| storage("append_resource", e))?;

        if let Some(text) = entry.report_text() {
            sqlx::query("UPDATE consultations SET report_text = $2 WHERE id = $1")
                .bind(*subject.as_uuid())
                .bind(text)
                .execute(&mut *tx)
                .await
                .map_err(|e| storage("update_report_text", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| storage("commit_transaction", e))?;
        Ok(())
    }

    async fn list(&self, subject: ConsultationId) -> Result<Vec<ResourceEntry>, LedgerError> {
        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM consultations WHERE id = $1")
            .bind(*subject.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage("list_resources", e))?;
        if exists.is_none() {
            return Err(LedgerError::ConsultationNotFound(subject));
        }

        let mut resources = self.entries_for(&[*subject.as_uuid()]).await?;
        Ok(resources.remove(subject.as_uuid()).unwrap_or_default())
    }
}

/// Take the consultation row lock for the rest of the transaction.
async fn lock_consultation(
    tx: &mut Transaction<'_, Postgres>,
    subject: ConsultationId,
) -> Result<(), LedgerError> {
    let locked: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM consultations WHERE id = $1 FOR UPDATE")
            .bind(*subject.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| storage("lock_consultation", e))?;
    match locked {
        Some(_) => Ok(()),
        None => Err(LedgerError::ConsultationNotFound(subject)),
    }
}

fn storage(operation: &str, err: sqlx::Error) -> LedgerError {
    LedgerError::Storage(map_sqlx_error(operation, err).into_message())
}

fn decode_entry(value: serde_json::Value) -> Result<ResourceEntry, LedgerError> {
    serde_json::from_value(value)
        .map_err(|e| LedgerError::Storage(format!("failed to decode resource entry: {e}")))
}

struct PatientRow {
    id: Uuid,
    owner_user_id: Uuid,
    first_name: String,
    middle_name: Option<String>,
    last_name: String,
    second_last_name: Option<String>,
    address: String,
    date_of_birth: NaiveDate,
    description: Option<String>,
}

impl PatientRow {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, LedgerError> {
        let read = |e: sqlx::Error| storage("decode_patient", e);
        Ok(PatientRow {
            id: row.try_get("id").map_err(read)?,
            owner_user_id: row.try_get("owner_user_id").map_err(read)?,
            first_name: row.try_get("first_name").map_err(read)?,
            middle_name: row.try_get("middle_name").map_err(read)?,
            last_name: row.try_get("last_name").map_err(read)?,
            second_last_name: row.try_get("second_last_name").map_err(read)?,
            address: row.try_get("address").map_err(read)?,
            date_of_birth: row.try_get("date_of_birth").map_err(read)?,
            description: row.try_get("description").map_err(read)?,
        })
    }
}

impl From<PatientRow> for Patient {
    fn from(row: PatientRow) -> Self {
        Patient {
            id: PatientId::from_uuid(row.id),
            owner_user_id: UserId::from_uuid(row.owner_user_id),
            first_name: row.first_name,
            middle_name: row.middle_name,
            last_name: row.last_name,
            second_last_name: row.second_last_name,
            address: row.address,
            date_of_birth: row.date_of_birth,
            description: row.description,
        }
    }
}

struct ConsultationRow {
    id: Uuid,
    owner_user_id: Uuid,
    patient_id: Uuid,
    scheduled_on: DateTime<Utc>,
    time_slot: String,
    description: String,
    report_text: Option<String>,
}

impl ConsultationRow {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, LedgerError> {
        let read = |e: sqlx::Error| storage("decode_consultation", e);
        Ok(ConsultationRow {
            id: row.try_get("id").map_err(read)?,
            owner_user_id: row.try_get("owner_user_id").map_err(read)?,
            patient_id: row.try_get("patient_id").map_err(read)?,
            scheduled_on: row.try_get("scheduled_on").map_err(read)?,
            time_slot: row.try_get("time_slot").map_err(read)?,
            description: row.try_get("description").map_err(read)?,
            report_text: row.try_get("report_text").map_err(read)?,
        })
    }

    fn into_consultation(self, resources: Vec<ResourceEntry>) -> Consultation {
        Consultation {
            id: ConsultationId::from_uuid(self.id),
            owner_user_id: UserId::from_uuid(self.owner_user_id),
            patient_id: PatientId::from_uuid(self.patient_id),
            scheduled_on: self.scheduled_on,
            time: self.time_slot,
            description: self.description,
            report_text: self.report_text,
            resources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_entries_decode_by_kind_tag() {
        let entry = decode_entry(serde_json::json!({
            "kind": "qa",
            "question": "¿Alergias?",
            "answer": "Penicilina"
        }))
        .unwrap();
        assert_eq!(entry, ResourceEntry::qa("¿Alergias?", "Penicilina"));
    }

    #[test]
    fn malformed_entry_is_a_storage_error() {
        let err = decode_entry(serde_json::json!({ "kind": "memo" })).unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)));
    }
}
