use axum::{routing::get, Router};

pub mod consultations;
pub mod jobs;
pub mod patients;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/patients", patients::router())
        .nest("/consultations", consultations::router())
        .nest("/jobs", jobs::router())
}
