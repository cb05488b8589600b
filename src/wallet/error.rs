//! Wallet error types

use rust_decimal::Decimal;
use thiserror::Error;

use crate::core_types::UserId;
use crate::ledger::StoreError;
use crate::retry::Retryable;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WalletError {
    // === Validation Errors ===
    #[error("Amount must be greater than zero and at most 10^18")]
    InvalidAmount,

    #[error("Source and target wallet cannot be the same")]
    SameWallet,

    // === Resource Errors ===
    #[error("Wallet of user {0} is frozen")]
    WalletFrozen(UserId),

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        user_id: UserId,
        available: Decimal,
        requested: Decimal,
    },

    #[error("Wallet not found for user {0}")]
    WalletNotFound(UserId),

    // === Infrastructure Errors ===
    /// Lost an optimistic race; safe to retry
    #[error("Wallet was modified concurrently, please retry")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl WalletError {
    pub fn code(&self) -> &'static str {
        match self {
            WalletError::InvalidAmount => "INVALID_AMOUNT",
            WalletError::SameWallet => "SAME_WALLET",
            WalletError::WalletFrozen(_) => "WALLET_FROZEN",
            WalletError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            WalletError::WalletNotFound(_) => "WALLET_NOT_FOUND",
            WalletError::Conflict(_) => "CONCURRENT_MODIFICATION",
            WalletError::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            WalletError::InvalidAmount | WalletError::SameWallet => 400,
            WalletError::WalletFrozen(_) | WalletError::InsufficientBalance { .. } => 422,
            WalletError::WalletNotFound(_) => 404,
            WalletError::Conflict(_) => 409,
            WalletError::Storage(_) => 500,
        }
    }
}

impl Retryable for WalletError {
    fn is_conflict(&self) -> bool {
        matches!(self, WalletError::Conflict(_))
    }
}

impl From<StoreError> for WalletError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => WalletError::Conflict(msg),
            other => WalletError::Storage(other.to_string()),
        }
    }
}
