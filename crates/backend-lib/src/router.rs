// ============================
// repogate-lib/src/router.rs
// ============================
//! HTTP routes of the forward-auth surface.
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    routing::get,
    Json, Router,
};
use repogate_common::HealthStatus;
use tower_http::trace::TraceLayer;

use crate::middleware::require_auth;
use crate::AppState;

/// Create the service router
pub fn create_router(state: Arc<AppState>) -> Router {
    let guarded = Router::new()
        .route("/auth", get(authorized).put(authorized))
        .route_layer(middleware::from_fn_with_state(Arc::clone(&state), require_auth));

    Router::new()
        .route("/health", get(health))
        .merge(guarded)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        hosts: state.settings.hosts.len(),
    })
}

/// Reached only once `require_auth` accepted the request
async fn authorized() -> StatusCode {
    StatusCode::NO_CONTENT
}
