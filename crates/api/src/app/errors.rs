//! Consistent JSON error responses: `{"error": <code>, "message": <text>}`.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use medscribe_infra::{BlobError, DispatchError, RecordsError};

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Unauthorized => json_error(StatusCode::FORBIDDEN, "forbidden", err.to_string()),
        DispatchError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        DispatchError::PreconditionFailed(msg) => {
            json_error(StatusCode::PRECONDITION_FAILED, "precondition_failed", msg)
        }
        DispatchError::Storage(msg) => storage_error(msg),
    }
}

pub fn records_error_to_response(err: RecordsError) -> axum::response::Response {
    match err {
        RecordsError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        RecordsError::Unauthorized => json_error(StatusCode::FORBIDDEN, "forbidden", err.to_string()),
        RecordsError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        RecordsError::Storage(msg) => storage_error(msg),
    }
}

pub fn blob_error_to_response(err: BlobError) -> axum::response::Response {
    match err {
        BlobError::NotFound(id) => json_error(
            StatusCode::PRECONDITION_FAILED,
            "precondition_failed",
            format!("blob {id} is not staged"),
        ),
        BlobError::AlreadyReserved { blob_id, job_id } => json_error(
            StatusCode::PRECONDITION_FAILED,
            "precondition_failed",
            format!("blob {blob_id} is already used by job {job_id}"),
        ),
        BlobError::Storage(msg) => storage_error(msg),
    }
}

fn storage_error(msg: String) -> axum::response::Response {
    error!(error = %msg, "storage failure");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg)
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path id, answering 400 for malformed input.
pub fn parse_id<T: std::str::FromStr>(raw: &str, what: &'static str) -> Result<T, axum::response::Response> {
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id")))
}
