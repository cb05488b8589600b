//! Withdrawal handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, ReasonRequest, WithdrawalApiRequest, ok};
use super::helpers::Caller;
use crate::core_types::WithdrawalId;
use crate::withdrawal::WithdrawalRequest;

fn parse_withdrawal_id(raw: &str) -> Result<WithdrawalId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid withdrawal id: {}", raw)))
}

/// POST /api/v1/withdrawals
///
/// Completes immediately unless `review` is set.
pub async fn request_withdrawal(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Json(req): Json<WithdrawalApiRequest>,
) -> ApiResult<WithdrawalRequest> {
    let processor = state.withdrawals.as_ref();
    let request = state
        .retry
        .run(move || {
            let recipient = req.recipient.clone();
            async move {
                if req.review {
                    processor
                        .submit_for_review(user_id, req.amount, req.method, recipient)
                        .await
                } else {
                    processor.request(user_id, req.amount, req.method, recipient).await
                }
            }
        })
        .await?;
    ok(request)
}

/// GET /api/v1/withdrawals
pub async fn list_withdrawals(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
) -> ApiResult<Vec<WithdrawalRequest>> {
    ok(state.withdrawals.list_for_user(user_id).await?)
}

/// POST /api/v1/withdrawals/{withdrawal_id}/cancel
pub async fn cancel_withdrawal(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Path(withdrawal_id): Path<String>,
) -> ApiResult<WithdrawalRequest> {
    let id = parse_withdrawal_id(&withdrawal_id)?;
    ok(state.withdrawals.cancel(user_id, id).await?)
}

/// POST /api/v1/admin/withdrawals/{withdrawal_id}/approve
pub async fn approve(
    State(state): State<Arc<AppState>>,
    Path(withdrawal_id): Path<String>,
) -> ApiResult<WithdrawalRequest> {
    let id = parse_withdrawal_id(&withdrawal_id)?;
    let processor = state.withdrawals.as_ref();
    ok(state.retry.run(move || processor.approve(id)).await?)
}

/// POST /api/v1/admin/withdrawals/{withdrawal_id}/processing
pub async fn mark_processing(
    State(state): State<Arc<AppState>>,
    Path(withdrawal_id): Path<String>,
) -> ApiResult<WithdrawalRequest> {
    let id = parse_withdrawal_id(&withdrawal_id)?;
    ok(state.withdrawals.mark_processing(id).await?)
}

/// POST /api/v1/admin/withdrawals/{withdrawal_id}/complete
pub async fn complete(
    State(state): State<Arc<AppState>>,
    Path(withdrawal_id): Path<String>,
) -> ApiResult<WithdrawalRequest> {
    let id = parse_withdrawal_id(&withdrawal_id)?;
    ok(state.withdrawals.complete(id).await?)
}

/// POST /api/v1/admin/withdrawals/{withdrawal_id}/fail
pub async fn fail(
    State(state): State<Arc<AppState>>,
    Path(withdrawal_id): Path<String>,
    Json(req): Json<ReasonRequest>,
) -> ApiResult<WithdrawalRequest> {
    let id = parse_withdrawal_id(&withdrawal_id)?;
    let processor = state.withdrawals.as_ref();
    ok(state
        .retry
        .run(move || processor.fail(id, req.reason.clone()))
        .await?)
}

/// POST /api/v1/admin/withdrawals/{withdrawal_id}/reject
pub async fn reject(
    State(state): State<Arc<AppState>>,
    Path(withdrawal_id): Path<String>,
    Json(req): Json<ReasonRequest>,
) -> ApiResult<WithdrawalRequest> {
    let id = parse_withdrawal_id(&withdrawal_id)?;
    ok(state.withdrawals.reject(id, req.reason).await?)
}
