//! API Response types and error codes
//!
//! - `ApiResponse<T>`: Unified response wrapper
//! - `ApiError`: Error half of every handler result
//! - `error_codes`: Standard error code constants

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::commission::CommissionError;
use crate::escrow::EscrowError;
use crate::ledger::Transaction;
use crate::payment::PaymentError;
use crate::wallet::WalletError;
use crate::withdrawal::WithdrawalError;

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// All API responses follow this structure:
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: actual data (success) or null (error)
/// - error: stable error name (errors only)
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: error_codes::SUCCESS,
            msg: "ok".to_string(),
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: i32, error: &'static str, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
            error: Some(error),
        }
    }
}

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

/// 200 with `data`
pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

/// Ledger entry as listed over HTTP.
///
/// `balance_delta` is what the entry moved the balance by. It is zero for
/// `COMMISSION` entries, so a wallet's deltas sum to its balance even where
/// its amounts do not.
#[derive(Debug, Serialize)]
pub struct TransactionView {
    #[serde(flatten)]
    pub entry: Transaction,
    pub balance_delta: Decimal,
}

impl From<Transaction> for TransactionView {
    fn from(entry: Transaction) -> Self {
        Self {
            balance_delta: entry.balance_delta(),
            entry,
        }
    }
}

// ============================================================================
// Error Codes
// ============================================================================

/// Standard API error codes
pub mod error_codes {
    // Success
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const INSUFFICIENT_BALANCE: i32 = 1002;

    // Auth errors (2xxx)
    pub const MISSING_AUTH: i32 = 2001;
    pub const FORBIDDEN: i32 = 2003;

    // Resource errors (4xxx)
    pub const NOT_FOUND: i32 = 4004;
    pub const STATE_CONFLICT: i32 = 4009;
    pub const UNPROCESSABLE: i32 = 4022;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
    pub const PROVIDER_ERROR: i32 = 5002;
}

// ============================================================================
// ApiError
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub error: &'static str,
    pub msg: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: i32, error: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            error,
            msg: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_PARAMETER,
            "INVALID_PARAMETER",
            msg,
        )
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, error_codes::MISSING_AUTH, "UNAUTHORIZED", msg)
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            error_codes::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            msg,
        )
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            error_codes::INTERNAL_ERROR,
            "INTERNAL_ERROR",
            msg,
        )
    }

    /// Map a component error by its `http_status()` / `code()` pair
    pub fn domain(http_status: u16, error: &'static str, msg: String) -> Self {
        let status = StatusCode::from_u16(http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = match (http_status, error) {
            (_, "INSUFFICIENT_BALANCE") => error_codes::INSUFFICIENT_BALANCE,
            (400, _) => error_codes::INVALID_PARAMETER,
            (403, _) => error_codes::FORBIDDEN,
            (404, _) => error_codes::NOT_FOUND,
            (409, _) => error_codes::STATE_CONFLICT,
            (422, _) => error_codes::UNPROCESSABLE,
            (502, _) => error_codes::PROVIDER_ERROR,
            _ => error_codes::INTERNAL_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error, msg = %msg, "Request failed");
        }
        Self::new(status, code, error, msg)
    }

    pub fn into_err<T>(self) -> ApiResult<T> {
        Err(self)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()>::error(self.code, self.error, self.msg);
        (self.status, Json(body)).into_response()
    }
}

macro_rules! impl_from_domain_error {
    ($($err:ty),* $(,)?) => {
        $(
            impl From<$err> for ApiError {
                fn from(e: $err) -> Self {
                    ApiError::domain(e.http_status(), e.code(), e.to_string())
                }
            }
        )*
    };
}

impl_from_domain_error!(WalletError, EscrowError, PaymentError, WithdrawalError, CommissionError);
