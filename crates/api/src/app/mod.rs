//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: backend, session manager, token issuer and principal store
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: error taxonomy and its HTTP mapping

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use authgate_infra::SessionManager;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<AppServices>,
    pub sessions: Arc<SessionManager>,
    /// Normalized route prefix (`""` mounts at the root).
    pub base_path: String,
}

/// Build the full HTTP router (public entrypoint used by `main.rs` and the
/// black-box tests).
pub fn build_app(state: AppState) -> Router {
    // Every auth route runs inside a provider session for its project.
    let auth = routes::router()
        .route_layer(axum::middleware::from_fn_with_state(
            state.sessions.clone(),
            middleware::session_middleware,
        ))
        .layer(Extension(state.services.clone()));

    let router = Router::new().route("/health", get(routes::system::health));
    let router = if state.base_path.is_empty() {
        router.merge(auth)
    } else {
        router.nest(&state.base_path, auth)
    };

    router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    )
}
