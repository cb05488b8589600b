//! Escrow handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, ClassEscrowRequest, PayEscrowRequest, ok};
use super::helpers::Caller;
use crate::core_types::EscrowId;
use crate::escrow::Escrow;

fn parse_escrow_id(raw: &str) -> Result<EscrowId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid escrow id: {}", raw)))
}

/// POST /api/v1/escrows
///
/// Hold funds from the caller's wallet at the supplied commission rate.
pub async fn pay_escrow(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Json(req): Json<PayEscrowRequest>,
) -> ApiResult<Escrow> {
    let escrows = state.escrows.as_ref();
    let escrow = state
        .retry
        .run(move || escrows.pay_escrow(user_id, req.class_id, req.amount, req.commission_rate))
        .await?;
    ok(escrow)
}

/// POST /api/v1/escrows/class
///
/// Hold funds at the rate the live table gives for the class.
pub async fn pay_escrow_for_class(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Json(req): Json<ClassEscrowRequest>,
) -> ApiResult<Escrow> {
    let escrows = state.escrows.as_ref();
    let escrow = state
        .retry
        .run(move || escrows.pay_escrow_for_class(user_id, req.class_id, req.amount))
        .await?;
    ok(escrow)
}

/// POST /api/v1/escrows/gateway
///
/// Open an escrow to be funded by a gateway payment.
pub async fn open_for_gateway(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Json(req): Json<ClassEscrowRequest>,
) -> ApiResult<Escrow> {
    let rate = state.escrows.resolve_rate(req.class_id).await?;
    let escrow = state
        .escrows
        .open_for_gateway(user_id, req.class_id, req.amount, rate)
        .await?;
    ok(escrow)
}

/// GET /api/v1/escrows/{escrow_id}
///
/// Visible to the payer and the tutor only.
pub async fn get_escrow(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Path(escrow_id): Path<String>,
) -> ApiResult<Escrow> {
    let escrow = state.escrows.get(parse_escrow_id(&escrow_id)?).await?;
    if escrow.payer_user_id != user_id && escrow.tutor_user_id != user_id {
        return ApiError::domain(403, "FORBIDDEN", "Not a party to this escrow".to_string())
            .into_err();
    }
    ok(escrow)
}

/// POST /api/v1/admin/escrows/{escrow_id}/release
pub async fn release(
    State(state): State<Arc<AppState>>,
    Path(escrow_id): Path<String>,
) -> ApiResult<Escrow> {
    let escrow_id = parse_escrow_id(&escrow_id)?;
    let escrows = state.escrows.as_ref();
    ok(state.retry.run(move || escrows.release(escrow_id)).await?)
}

/// POST /api/v1/admin/escrows/{escrow_id}/refund
pub async fn refund(
    State(state): State<Arc<AppState>>,
    Path(escrow_id): Path<String>,
) -> ApiResult<Escrow> {
    let escrow_id = parse_escrow_id(&escrow_id)?;
    let escrows = state.escrows.as_ref();
    ok(state.retry.run(move || escrows.refund(escrow_id)).await?)
}
