//! Payment error types

use rust_decimal::Decimal;
use thiserror::Error;

use super::types::{PaymentStatus, ProviderKind};
use crate::core_types::{EscrowId, PaymentId, UserId};
use crate::escrow::{EscrowError, EscrowStatus};
use crate::ledger::StoreError;
use crate::retry::Retryable;
use crate::wallet::WalletError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PaymentError {
    // === Validation Errors ===
    #[error("Amount must be a positive whole number, got {0}")]
    InvalidAmount(Decimal),

    #[error("Payment amount {actual} does not match escrow amount {expected}")]
    AmountMismatch { expected: Decimal, actual: Decimal },

    #[error("Payment provider {0} is not configured")]
    ProviderNotConfigured(ProviderKind),

    #[error("Invalid callback signature")]
    InvalidSignature,

    #[error("Malformed provider payload: {0}")]
    MalformedPayload(String),

    #[error("Only the initiating user may do this")]
    Forbidden,

    // === Lookup Errors ===
    #[error("Payment not found: {0}")]
    PaymentNotFound(PaymentId),

    #[error("Escrow not found: {0}")]
    EscrowNotFound(EscrowId),

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    // === State Errors ===
    #[error("Escrow {escrow_id} is {status}, not awaiting payment")]
    EscrowNotPayable {
        escrow_id: EscrowId,
        status: EscrowStatus,
    },

    #[error("Payment {payment_id} is {status}, cannot {action}")]
    InvalidState {
        payment_id: PaymentId,
        status: PaymentStatus,
        action: &'static str,
    },

    #[error(transparent)]
    Escrow(EscrowError),

    #[error(transparent)]
    Wallet(WalletError),

    // === External Errors ===
    #[error("{provider} rejected the request: {code} {message}")]
    ProviderRejected {
        provider: ProviderKind,
        code: String,
        message: String,
    },

    #[error("{provider} unavailable: {reason}")]
    ProviderUnavailable {
        provider: ProviderKind,
        reason: String,
    },

    // === Infrastructure Errors ===
    #[error("Payment was modified concurrently, please retry")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PaymentError {
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::InvalidAmount(_) => "INVALID_AMOUNT",
            PaymentError::AmountMismatch { .. } => "AMOUNT_MISMATCH",
            PaymentError::ProviderNotConfigured(_) => "PROVIDER_NOT_CONFIGURED",
            PaymentError::InvalidSignature => "INVALID_SIGNATURE",
            PaymentError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            PaymentError::Forbidden => "FORBIDDEN",
            PaymentError::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            PaymentError::EscrowNotFound(_) => "ESCROW_NOT_FOUND",
            PaymentError::UserNotFound(_) => "USER_NOT_FOUND",
            PaymentError::EscrowNotPayable { .. } => "ESCROW_NOT_PAYABLE",
            PaymentError::InvalidState { .. } => "INVALID_PAYMENT_STATE",
            PaymentError::Escrow(e) => e.code(),
            PaymentError::Wallet(e) => e.code(),
            PaymentError::ProviderRejected { .. } => "PROVIDER_REJECTED",
            PaymentError::ProviderUnavailable { .. } => "PROVIDER_UNAVAILABLE",
            PaymentError::Conflict(_) => "CONCURRENT_MODIFICATION",
            PaymentError::Storage(_) => "STORAGE_ERROR",
            PaymentError::Config(_) => "CONFIG_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            PaymentError::InvalidAmount(_)
            | PaymentError::AmountMismatch { .. }
            | PaymentError::ProviderNotConfigured(_)
            | PaymentError::InvalidSignature
            | PaymentError::MalformedPayload(_) => 400,
            PaymentError::Forbidden => 403,
            PaymentError::PaymentNotFound(_)
            | PaymentError::EscrowNotFound(_)
            | PaymentError::UserNotFound(_) => 404,
            PaymentError::EscrowNotPayable { .. }
            | PaymentError::InvalidState { .. }
            | PaymentError::Conflict(_) => 409,
            PaymentError::Escrow(e) => e.http_status(),
            PaymentError::Wallet(e) => e.http_status(),
            PaymentError::ProviderRejected { .. } | PaymentError::ProviderUnavailable { .. } => 502,
            PaymentError::Storage(_) | PaymentError::Config(_) => 500,
        }
    }
}

impl Retryable for PaymentError {
    fn is_conflict(&self) -> bool {
        matches!(self, PaymentError::Conflict(_))
    }
}

impl From<StoreError> for PaymentError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => PaymentError::Conflict(msg),
            other => PaymentError::Storage(other.to_string()),
        }
    }
}

impl From<EscrowError> for PaymentError {
    fn from(e: EscrowError) -> Self {
        match e {
            EscrowError::Conflict(msg) => PaymentError::Conflict(msg),
            EscrowError::EscrowNotFound(id) => PaymentError::EscrowNotFound(id),
            other => PaymentError::Escrow(other),
        }
    }
}

impl From<WalletError> for PaymentError {
    fn from(e: WalletError) -> Self {
        match e {
            WalletError::Conflict(msg) => PaymentError::Conflict(msg),
            other => PaymentError::Wallet(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status() {
        assert_eq!(PaymentError::InvalidSignature.http_status(), 400);
        assert_eq!(PaymentError::Forbidden.http_status(), 403);
        assert_eq!(
            PaymentError::ProviderUnavailable {
                provider: ProviderKind::MoMo,
                reason: "timeout".into(),
            }
            .http_status(),
            502
        );
    }

    #[test]
    fn test_nested_conflicts_are_retryable() {
        assert!(PaymentError::from(EscrowError::Conflict("x".into())).is_conflict());
        assert!(PaymentError::from(WalletError::Conflict("x".into())).is_conflict());
        assert!(!PaymentError::from(WalletError::InvalidAmount).is_conflict());
    }
}
