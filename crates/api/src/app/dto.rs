use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use medscribe_core::{Consultation, Patient};
use medscribe_infra::{Job, JobKind, JobView};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateConsultationRequest {
    pub patient_id: String,
    pub scheduled_on: DateTime<Utc>,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatJobRequest {
    #[serde(alias = "subject_id")]
    pub consultation_id: String,
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct ReportJobRequest {
    #[serde(alias = "subject_id")]
    pub consultation_id: String,
}

// -------------------------
// Response mapping
// -------------------------

pub fn patient_to_json(p: &Patient) -> Value {
    json!({
        "id": p.id.to_string(),
        "first_name": p.first_name,
        "middle_name": p.middle_name,
        "last_name": p.last_name,
        "second_last_name": p.second_last_name,
        "address": p.address,
        "date_of_birth": p.date_of_birth.to_string(),
        "description": p.description,
    })
}

fn patient_summary(p: &Patient) -> Value {
    json!({
        "id": p.id.to_string(),
        "first_name": p.first_name,
        "last_name": p.last_name,
    })
}

/// Consultation without its resources (list views).
pub fn consultation_to_json(c: &Consultation) -> Value {
    json!({
        "id": c.id.to_string(),
        "patient_id": c.patient_id.to_string(),
        "scheduled_on": c.scheduled_on.to_rfc3339(),
        "time": c.time,
        "description": c.description,
        "report_text": c.report_text,
        "resource_count": c.resources.len(),
    })
}

/// Consultation detail: patient summary plus the full ledger in append order.
pub fn consultation_detail_to_json(c: &Consultation, patient: &Patient) -> Value {
    json!({
        "id": c.id.to_string(),
        "patient": patient_summary(patient),
        "scheduled_on": c.scheduled_on.to_rfc3339(),
        "time": c.time,
        "description": c.description,
        "report_text": c.report_text,
        "resources": c.resources,
    })
}

/// Field carrying a finished job's result on the polling endpoint.
pub fn result_field(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Transcribe => "transcription",
        JobKind::Chat => "response",
        JobKind::Report => "report",
    }
}

pub fn job_accepted_json(job: &Job) -> Value {
    json!({
        "job_id": job.id.to_string(),
        "status": "processing",
    })
}

pub fn job_status_json(job: &Job) -> Value {
    let job_id = job.id.to_string();
    match JobView::of(job) {
        JobView::Processing => json!({ "job_id": job_id, "status": "processing" }),
        JobView::Completed { result } => {
            let mut body = json!({ "job_id": job_id, "status": "completed" });
            body[result_field(job.kind())] = Value::String(result);
            body
        }
        JobView::Failed { error } => json!({
            "job_id": job_id,
            "status": "failed",
            "error": error,
        }),
    }
}
