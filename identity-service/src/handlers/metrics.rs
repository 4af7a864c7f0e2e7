use axum::{extract::State, response::IntoResponse};
use service_core::error::AppError;

use crate::AppState;

/// Prometheus text exposition of the process metrics.
pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    state
        .metrics_handle
        .as_ref()
        .map(|handle| handle.render())
        .ok_or_else(|| AppError::NotEnabled("Metrics".to_string()))
}
