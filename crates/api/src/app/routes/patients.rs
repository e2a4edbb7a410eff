use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use medscribe_core::{NewPatient, PatientId};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_patient).get(list_patients))
        .route("/:id/consultations", get(list_consultations))
}

pub async fn create_patient(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<NewPatient>,
) -> axum::response::Response {
    match services.records.create_patient(principal.user_id(), body).await {
        Ok(patient) => (StatusCode::CREATED, Json(dto::patient_to_json(&patient))).into_response(),
        Err(e) => errors::records_error_to_response(e),
    }
}

pub async fn list_patients(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    match services.records.list_patients(principal.user_id()).await {
        Ok(patients) => {
            let items = patients.iter().map(dto::patient_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::records_error_to_response(e),
    }
}

pub async fn list_consultations(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let patient_id: PatientId = match errors::parse_id(&id, "patient") {
        Ok(v) => v,
        Err(res) => return res,
    };

    match services
        .records
        .list_consultations_for_patient(principal.user_id(), patient_id)
        .await
    {
        Ok(consultations) => {
            let items = consultations
                .iter()
                .map(dto::consultation_to_json)
                .collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::records_error_to_response(e),
    }
}
