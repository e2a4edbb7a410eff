//! Background AI jobs: submit returns 202 with a job id, clients poll by id.

use std::sync::Arc;

use axum::{
    extract::{Extension, Multipart, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::warn;

use medscribe_core::ConsultationId;
use medscribe_infra::{JobId, JobKind, JobRequest, NewBlob};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/transcribe", post(submit_transcription))
        .route("/transcribe/:id", get(poll_transcription))
        .route("/chat", post(submit_chat))
        .route("/chat/:id", get(poll_chat))
        .route("/report", post(submit_report))
        .route("/report/:id", get(poll_report))
}

/// Parts of the transcription upload form.
#[derive(Default)]
struct UploadForm {
    consultation_id: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
    bytes: Option<Vec<u8>>,
}

async fn read_upload(mut multipart: Multipart) -> Result<UploadForm, axum::response::Response> {
    let bad_form = |msg: String| errors::json_error(StatusCode::BAD_REQUEST, "invalid_upload", msg);
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_form(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "consultation_id" | "subject_id" => {
                form.consultation_id = Some(field.text().await.map_err(|e| bad_form(e.body_text()))?);
            }
            "file" | "audio" => {
                form.filename = field.file_name().map(str::to_string);
                form.content_type = field.content_type().map(str::to_string);
                form.bytes = Some(field.bytes().await.map_err(|e| bad_form(e.body_text()))?.to_vec());
            }
            _ => {}
        }
    }

    Ok(form)
}

pub async fn submit_transcription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    multipart: Multipart,
) -> axum::response::Response {
    let form = match read_upload(multipart).await {
        Ok(form) => form,
        Err(res) => return res,
    };
    let Some(raw_id) = form.consultation_id else {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_upload", "consultation_id is required");
    };
    let consultation_id: ConsultationId = match errors::parse_id(raw_id.trim(), "consultation") {
        Ok(v) => v,
        Err(res) => return res,
    };
    let Some(bytes) = form.bytes.filter(|b| !b.is_empty()) else {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_upload", "audio file is required");
    };

    let user = principal.user_id();

    // Nothing is staged for a consultation the caller cannot see.
    if let Err(e) = services.records.get_consultation(user, consultation_id).await {
        return errors::records_error_to_response(e);
    }

    let upload = NewBlob::new(
        consultation_id,
        user,
        form.filename.unwrap_or_else(|| "recording".to_string()),
        form.content_type.unwrap_or_else(|| "application/octet-stream".to_string()),
        bytes,
    );
    let blob_id = match services.blobs.stage(upload).await {
        Ok(id) => id,
        Err(e) => return errors::blob_error_to_response(e),
    };

    let request = JobRequest::Transcribe {
        subject_id: consultation_id,
        blob_id,
    };
    match services.dispatcher.submit(user, request).await {
        Ok(job) => {
            let mut body = dto::job_accepted_json(&job);
            body["consultation_id"] = consultation_id.to_string().into();
            body["blob_id"] = blob_id.to_string().into();
            (StatusCode::ACCEPTED, Json(body)).into_response()
        }
        Err(e) => {
            if let Err(release) = services.blobs.release(blob_id).await {
                warn!(blob_id = %blob_id, error = %release, "could not release rejected upload");
            }
            errors::dispatch_error_to_response(e)
        }
    }
}

pub async fn submit_chat(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::ChatJobRequest>,
) -> axum::response::Response {
    let consultation_id: ConsultationId = match errors::parse_id(&body.consultation_id, "consultation") {
        Ok(v) => v,
        Err(res) => return res,
    };
    let request = JobRequest::Chat {
        subject_id: consultation_id,
        prompt: body.prompt,
    };
    submit(&services, principal, request).await
}

pub async fn submit_report(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::ReportJobRequest>,
) -> axum::response::Response {
    let consultation_id: ConsultationId = match errors::parse_id(&body.consultation_id, "consultation") {
        Ok(v) => v,
        Err(res) => return res,
    };
    let request = JobRequest::Report {
        subject_id: consultation_id,
    };
    submit(&services, principal, request).await
}

async fn submit(
    services: &AppServices,
    principal: PrincipalContext,
    request: JobRequest,
) -> axum::response::Response {
    match services.dispatcher.submit(principal.user_id(), request).await {
        Ok(job) => (StatusCode::ACCEPTED, Json(dto::job_accepted_json(&job))).into_response(),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn poll_transcription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    poll(&services, principal, &id, JobKind::Transcribe).await
}

pub async fn poll_chat(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    poll(&services, principal, &id, JobKind::Chat).await
}

pub async fn poll_report(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    poll(&services, principal, &id, JobKind::Report).await
}

async fn poll(
    services: &AppServices,
    principal: PrincipalContext,
    raw_id: &str,
    kind: JobKind,
) -> axum::response::Response {
    let job_id: JobId = match errors::parse_id(raw_id, "job") {
        Ok(v) => v,
        Err(res) => return res,
    };

    let job = match services.dispatcher.get_status(principal.user_id(), job_id).await {
        Ok(job) => job,
        Err(e) => return errors::dispatch_error_to_response(e),
    };
    if job.kind() != kind {
        return errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("job not found: {job_id}"),
        );
    }

    (StatusCode::OK, Json(dto::job_status_json(&job))).into_response()
}
