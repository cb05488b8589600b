//! Withdrawal error types

use rust_decimal::Decimal;
use thiserror::Error;

use super::types::WithdrawalStatus;
use crate::core_types::WithdrawalId;
use crate::ledger::StoreError;
use crate::retry::Retryable;
use crate::wallet::WalletError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WithdrawalError {
    // === Validation Errors ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Amount {amount} is below the minimum withdrawal of {minimum}")]
    BelowMinimum { amount: Decimal, minimum: Decimal },

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(&'static str),

    #[error("Only the requesting user may do this")]
    Forbidden,

    // === Lookup Errors ===
    #[error("Withdrawal not found: {0}")]
    WithdrawalNotFound(WithdrawalId),

    // === State Errors ===
    #[error("Withdrawal {withdrawal_id} is {status}, cannot {action}")]
    InvalidState {
        withdrawal_id: WithdrawalId,
        status: WithdrawalStatus,
        action: &'static str,
    },

    #[error(transparent)]
    Wallet(WalletError),

    // === Infrastructure Errors ===
    #[error("Withdrawal was modified concurrently, please retry")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl WithdrawalError {
    pub fn code(&self) -> &'static str {
        match self {
            WithdrawalError::InvalidAmount => "INVALID_AMOUNT",
            WithdrawalError::BelowMinimum { .. } => "BELOW_MINIMUM",
            WithdrawalError::InvalidRecipient(_) => "INVALID_RECIPIENT",
            WithdrawalError::Forbidden => "FORBIDDEN",
            WithdrawalError::WithdrawalNotFound(_) => "WITHDRAWAL_NOT_FOUND",
            WithdrawalError::InvalidState { .. } => "INVALID_WITHDRAWAL_STATE",
            WithdrawalError::Wallet(e) => e.code(),
            WithdrawalError::Conflict(_) => "CONCURRENT_MODIFICATION",
            WithdrawalError::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            WithdrawalError::InvalidAmount
            | WithdrawalError::BelowMinimum { .. }
            | WithdrawalError::InvalidRecipient(_) => 400,
            WithdrawalError::Forbidden => 403,
            WithdrawalError::WithdrawalNotFound(_) => 404,
            WithdrawalError::InvalidState { .. } | WithdrawalError::Conflict(_) => 409,
            WithdrawalError::Wallet(e) => e.http_status(),
            WithdrawalError::Storage(_) => 500,
        }
    }
}

impl Retryable for WithdrawalError {
    fn is_conflict(&self) -> bool {
        matches!(self, WithdrawalError::Conflict(_))
    }
}

impl From<StoreError> for WithdrawalError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => WithdrawalError::Conflict(msg),
            other => WithdrawalError::Storage(other.to_string()),
        }
    }
}

impl From<WalletError> for WithdrawalError {
    fn from(e: WalletError) -> Self {
        match e {
            WalletError::Conflict(msg) => WithdrawalError::Conflict(msg),
            other => WithdrawalError::Wallet(other),
        }
    }
}
