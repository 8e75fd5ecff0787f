use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// Readiness probe: returns 200 once the verse index is loaded, else 503.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    match state.service.current().await {
        Some(corpus) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "checks": { "index": "ok" },
                "verses": corpus.len()
            })),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "checks": { "index": "fail" },
                "reason": "index has not been built"
            })),
        ),
    }
}
