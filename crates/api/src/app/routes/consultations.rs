use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use medscribe_core::{ConsultationId, NewConsultation, PatientId};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_consultation))
        .route("/:id", get(get_consultation))
        .route("/:id/resources", get(list_resources))
}

pub async fn create_consultation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateConsultationRequest>,
) -> axum::response::Response {
    let patient_id: PatientId = match errors::parse_id(&body.patient_id, "patient") {
        Ok(v) => v,
        Err(res) => return res,
    };

    let input = NewConsultation {
        patient_id,
        scheduled_on: body.scheduled_on,
        time: body.time,
        description: body.description,
    };

    match services
        .records
        .create_consultation(principal.user_id(), input)
        .await
    {
        Ok(consultation) => (
            StatusCode::CREATED,
            Json(dto::consultation_to_json(&consultation)),
        )
            .into_response(),
        Err(e) => errors::records_error_to_response(e),
    }
}

pub async fn get_consultation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let consultation_id: ConsultationId = match errors::parse_id(&id, "consultation") {
        Ok(v) => v,
        Err(res) => return res,
    };

    let user = principal.user_id();
    let consultation = match services.records.get_consultation(user, consultation_id).await {
        Ok(c) => c,
        Err(e) => return errors::records_error_to_response(e),
    };
    let patient = match services.records.get_patient(user, consultation.patient_id).await {
        Ok(p) => p,
        Err(e) => return errors::records_error_to_response(e),
    };

    (
        StatusCode::OK,
        Json(dto::consultation_detail_to_json(&consultation, &patient)),
    )
        .into_response()
}

pub async fn list_resources(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let consultation_id: ConsultationId = match errors::parse_id(&id, "consultation") {
        Ok(v) => v,
        Err(res) => return res,
    };

    match services
        .records
        .resources(principal.user_id(), consultation_id)
        .await
    {
        Ok(items) => (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response(),
        Err(e) => errors::records_error_to_response(e),
    }
}
