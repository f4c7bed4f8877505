use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use tracing::warn;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up")),
    tag = "health"
)]
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "codehost-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Ready once both the database and the container engine answer.
#[utoipa::path(
    get,
    path = "/health/ready",
    responses(
        (status = 200, description = "Database and engine reachable"),
        (status = 503, description = "A dependency is unreachable")
    ),
    tag = "health"
)]
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let orchestrator = &state.orchestrator;

    let db_ok = orchestrator
        .store()
        .ping()
        .await
        .inspect_err(|e| warn!(error = %e, "database ping failed"))
        .is_ok();
    let engine_ok = orchestrator
        .runtime()
        .ping()
        .await
        .inspect_err(|e| warn!(error = %e, "engine ping failed"))
        .is_ok();
    let ready = db_ok && engine_ok;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if ready { "ready" } else { "not_ready" },
            "service": "codehost-api",
            "version": env!("CARGO_PKG_VERSION"),
            "database": if db_ok { "connected" } else { "disconnected" },
            "engine": if engine_ok { orchestrator.runtime().name() } else { "unreachable" }
        })),
    )
}
