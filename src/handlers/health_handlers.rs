//! Liveness & health handlers.
//!
//! - GET /        -> liveness only, never touches a backend
//! - GET /health  -> probes the metadata store and the blob store independently

use crate::services::{AppState, health::check_backends};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

/// `GET /`
///
/// Liveness probe: always returns 200 OK.
pub async fn root() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(LivenessResponse {
            message: "Recipe Repository Service is running!",
        }),
    )
}

/// `GET /health`
///
/// 200 with `{"status":"ok","services":{...}}` when both backends answer,
/// otherwise 500 with `"status":"degraded"` and the unreachable backend marked.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = check_backends(state.metadata.as_ref(), state.blobs.as_ref()).await;
    let status = if report.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(report))
}

#[derive(Serialize)]
struct LivenessResponse {
    message: &'static str,
}
