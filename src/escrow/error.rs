//! Escrow error types

use rust_decimal::Decimal;
use thiserror::Error;

use super::state::EscrowStatus;
use crate::commission::CommissionError;
use crate::core_types::{ClassId, EscrowId};
use crate::ledger::StoreError;
use crate::retry::Retryable;
use crate::wallet::WalletError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EscrowError {
    // === Validation Errors ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Commission rate must be in (0, 1], got {0}")]
    InvalidCommissionRate(Decimal),

    // === Lookup Errors ===
    #[error("Class not found: {0}")]
    ClassNotFound(ClassId),

    /// The class exists but its tutor cannot be resolved; a data problem in
    /// the scheduling service, not a crash
    #[error("Tutor could not be resolved for class {0}")]
    TutorUnresolved(ClassId),

    #[error("Escrow not found: {0}")]
    EscrowNotFound(EscrowId),

    // === State Errors ===
    #[error("Escrow {escrow_id} is {status}, cannot {action}")]
    InvalidState {
        escrow_id: EscrowId,
        status: EscrowStatus,
        action: &'static str,
    },

    #[error("Settlement wallet cannot cover {required} (available {available})")]
    InsufficientSettlementFunds {
        available: Decimal,
        required: Decimal,
    },

    #[error(transparent)]
    Wallet(WalletError),

    // === Infrastructure Errors ===
    #[error("Escrow was modified concurrently, please retry")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl EscrowError {
    pub fn code(&self) -> &'static str {
        match self {
            EscrowError::InvalidAmount => "INVALID_AMOUNT",
            EscrowError::InvalidCommissionRate(_) => "INVALID_COMMISSION_RATE",
            EscrowError::ClassNotFound(_) => "CLASS_NOT_FOUND",
            EscrowError::TutorUnresolved(_) => "TUTOR_UNRESOLVED",
            EscrowError::EscrowNotFound(_) => "ESCROW_NOT_FOUND",
            EscrowError::InvalidState { .. } => "INVALID_ESCROW_STATE",
            EscrowError::InsufficientSettlementFunds { .. } => "INSUFFICIENT_SETTLEMENT_FUNDS",
            EscrowError::Wallet(e) => e.code(),
            EscrowError::Conflict(_) => "CONCURRENT_MODIFICATION",
            EscrowError::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            EscrowError::InvalidAmount | EscrowError::InvalidCommissionRate(_) => 400,
            EscrowError::ClassNotFound(_) | EscrowError::EscrowNotFound(_) => 404,
            EscrowError::TutorUnresolved(_) | EscrowError::InsufficientSettlementFunds { .. } => {
                422
            }
            EscrowError::InvalidState { .. } | EscrowError::Conflict(_) => 409,
            EscrowError::Wallet(e) => e.http_status(),
            EscrowError::Storage(_) => 500,
        }
    }
}

impl Retryable for EscrowError {
    fn is_conflict(&self) -> bool {
        matches!(self, EscrowError::Conflict(_))
    }
}

impl From<StoreError> for EscrowError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => EscrowError::Conflict(msg),
            other => EscrowError::Storage(other.to_string()),
        }
    }
}

impl From<WalletError> for EscrowError {
    fn from(e: WalletError) -> Self {
        match e {
            WalletError::Conflict(msg) => EscrowError::Conflict(msg),
            other => EscrowError::Wallet(other),
        }
    }
}

impl From<CommissionError> for EscrowError {
    fn from(e: CommissionError) -> Self {
        match e {
            CommissionError::InvalidRate(rate) => EscrowError::InvalidCommissionRate(rate),
            CommissionError::Store(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status() {
        assert_eq!(EscrowError::TutorUnresolved(1).http_status(), 422);
        assert_eq!(
            EscrowError::InvalidState {
                escrow_id: EscrowId::new(),
                status: EscrowStatus::Released,
                action: "release",
            }
            .http_status(),
            409
        );
        assert_eq!(
            EscrowError::from(WalletError::WalletFrozen(3)).http_status(),
            422
        );
    }

    #[test]
    fn test_wallet_conflict_stays_retryable() {
        assert!(EscrowError::from(WalletError::Conflict("v".into())).is_conflict());
        assert!(EscrowError::from(StoreError::Conflict("v".into())).is_conflict());
    }
}
