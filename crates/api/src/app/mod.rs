//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, dispatcher, worker pool, sweeper
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, routing::get, Extension, Router};
use tower::ServiceBuilder;

use medscribe_ai::AiBackend;
use medscribe_auth::Hs256TokenValidator;

use crate::config::AppConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{Background, ServiceError};

/// Router plus the background tasks feeding it.
pub struct App {
    pub router: Router,
    pub background: Background,
}

/// Build the full HTTP router and start the job workers.
pub async fn build_app(config: &AppConfig, backend: Arc<dyn AiBackend>) -> Result<App, ServiceError> {
    let tokens = Arc::new(Hs256TokenValidator::new(config.jwt_secret.as_bytes()));
    let auth_state = middleware::AuthState { tokens };

    let (services, background) = services::build_services(config, backend).await?;

    // Protected routes: require a valid bearer token.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    let router = Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(
            ServiceBuilder::new().layer(DefaultBodyLimit::max(config.max_upload_bytes)),
        );

    Ok(App { router, background })
}
