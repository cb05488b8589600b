//! Health check handler

use std::sync::Arc;

use axum::extract::State;
use serde::Serialize;

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, ok};

/// Health check response data
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Ledger backend in use
    pub store: &'static str,
    pub version: &'static str,
    /// Server timestamp in milliseconds
    pub timestamp_ms: i64,
}

/// GET /api/v1/health
///
/// - Healthy: 200 OK + {code: 0, data: {store, version, timestamp_ms}}
/// - Unhealthy: 503 Service Unavailable, store details only in the log
pub async fn health_check(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    if let Err(e) = state.store.health_check().await {
        tracing::error!(store = state.store.name(), error = %e, "[HEALTH] Store ping failed");
        return ApiError::service_unavailable("unavailable").into_err();
    }
    ok(HealthResponse {
        store: state.store.name(),
        version: env!("GIT_HASH"),
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
    })
}
