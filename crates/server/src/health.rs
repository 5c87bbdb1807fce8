//! Liveness and deep health endpoints. Neither requires a credential.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct Liveness {
    pub status: &'static str,
    pub time: String,
}

/// GET /health: process is up; does not touch the store
pub async fn health() -> Json<Liveness> {
    Json(Liveness {
        status: "ok",
        time: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
    })
}

/// GET /health/full: round-trip to the store
pub async fn health_full(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.backend_version() {
        Ok(version) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ok", "sqlite_version": version })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "deep health check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "status": "error", "detail": e.to_string() })),
            )
        }
    }
}
