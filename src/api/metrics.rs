//! Prometheus /metrics endpoint

use crate::state::HasConfig;
use axum::{extract::State, http::StatusCode, response::IntoResponse};

/// GET /metrics: Prometheus text exposition format
pub async fn metrics_handler<S: HasConfig>(State(state): State<S>) -> impl IntoResponse {
    match state.metrics_handle() {
        Some(h) => (StatusCode::OK, h.render()),
        None => (StatusCode::NOT_FOUND, "Metrics not enabled".to_string()),
    }
}
