//! Commission rate handlers

use std::sync::Arc;

use axum::{Json, extract::State};

use super::super::state::AppState;
use super::super::types::{ApiResult, ok};
use crate::commission::{CommissionRates, RatePatch};

/// GET /api/v1/commission
pub async fn get_rates(State(state): State<Arc<AppState>>) -> ApiResult<CommissionRates> {
    ok(state.commission.current_rates().await?)
}

/// PATCH /api/v1/admin/commission
///
/// Only the supplied rates change. Escrows already open keep their rate.
pub async fn update_rates(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<RatePatch>,
) -> ApiResult<CommissionRates> {
    ok(state.commission.update_rates(patch).await?)
}
