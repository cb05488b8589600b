//! Payment handlers, including the provider callback endpoints

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::Value;

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, RefundRequest, ok};
use super::helpers::Caller;
use crate::core_types::{PaymentId, UserId};
use crate::payment::{CreatePaymentRequest, Payment, PaymentLog, ProviderKind};

fn parse_payment_id(raw: &str) -> Result<PaymentId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid payment id: {}", raw)))
}

async fn owned_payment(
    state: &AppState,
    user_id: UserId,
    raw_id: &str,
) -> Result<Payment, ApiError> {
    let payment = state.payments.payment(parse_payment_id(raw_id)?).await?;
    if payment.user_id != user_id {
        return Err(ApiError::domain(403, "FORBIDDEN", "Not your payment".to_string()));
    }
    Ok(payment)
}

/// POST /api/v1/payments
pub async fn create_payment(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Json(req): Json<CreatePaymentRequest>,
) -> ApiResult<Payment> {
    ok(state.payments.create_payment(user_id, req).await?)
}

/// GET /api/v1/payments/{payment_id}
pub async fn get_payment(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Path(payment_id): Path<String>,
) -> ApiResult<Payment> {
    ok(owned_payment(&state, user_id, &payment_id).await?)
}

/// POST /api/v1/payments/{payment_id}/query
///
/// Ask the provider and reconcile.
pub async fn query_payment(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Path(payment_id): Path<String>,
) -> ApiResult<Payment> {
    let payment = owned_payment(&state, user_id, &payment_id).await?;
    ok(state.payments.query_status(payment.id).await?)
}

/// POST /api/v1/payments/{payment_id}/retry
pub async fn retry_payment(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Path(payment_id): Path<String>,
) -> ApiResult<Payment> {
    let payment_id = parse_payment_id(&payment_id)?;
    ok(state.payments.retry(payment_id, user_id).await?)
}

/// GET /api/v1/payments/{payment_id}/logs
pub async fn payment_logs(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Path(payment_id): Path<String>,
) -> ApiResult<Vec<PaymentLog>> {
    let payment = owned_payment(&state, user_id, &payment_id).await?;
    ok(state.payments.logs(payment.id).await?)
}

/// POST /api/v1/admin/payments/{payment_id}/refund
pub async fn refund_payment(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<String>,
    Json(req): Json<RefundRequest>,
) -> ApiResult<Payment> {
    let payment_id = parse_payment_id(&payment_id)?;
    ok(state.payments.refund(payment_id, req.amount).await?)
}

async fn callback(state: &AppState, kind: ProviderKind, payload: Value) -> Response {
    let rendered = match state.payments.handle_callback(kind, &payload).await {
        Ok(ack) => state.payments.render_ack(kind, &ack),
        Err(e) => Err(e),
    };
    match rendered {
        Ok((status, body)) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
            if status == StatusCode::NO_CONTENT {
                status.into_response()
            } else {
                (status, Json(body)).into_response()
            }
        }
        // Nothing recorded; a 5xx makes the provider redeliver
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// POST /api/v1/payments/momo/ipn
pub async fn momo_ipn(State(state): State<Arc<AppState>>, Json(payload): Json<Value>) -> Response {
    callback(&state, ProviderKind::MoMo, payload).await
}

/// POST /api/v1/payments/payos/webhook
pub async fn payos_webhook(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Value>,
) -> Response {
    callback(&state, ProviderKind::PayOs, payload).await
}
