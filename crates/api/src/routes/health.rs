use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use stagehand_core::coordinator::CoordinatorState;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process answers.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    pub coordinator: CoordinatorState,
}

/// Readiness response payload.
#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub coordinator: CoordinatorState,
}

/// GET /health -- liveness; reports the coordinator state without gating on it.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        coordinator: state.status.current(),
    })
}

/// GET /ready -- 200 once the coordinator is `Ready`, 503 before that or
/// after a failure.
async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let coordinator = state.status.current();
    let ready = coordinator.is_ready();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(ReadyResponse { ready, coordinator }))
}

/// Mount health and readiness routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness))
}
