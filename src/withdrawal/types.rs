use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::{TransactionId, UserId, WithdrawalId};

/// Withdrawal status
///
/// Default path: straight to COMPLETED. Administrative path:
///
/// ```text
/// PENDING → APPROVED → PROCESSING → COMPLETED
///    ↓  ↓       ↓           ↓
/// REJECTED CANCELLED     FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum WithdrawalStatus {
    Pending = 0,
    Approved = 10,
    Processing = 20,
    Completed = 30,
    Rejected = -10,
    Cancelled = -20,
    Failed = -30,
}

impl WithdrawalStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Completed
                | WithdrawalStatus::Rejected
                | WithdrawalStatus::Cancelled
                | WithdrawalStatus::Failed
        )
    }

    /// Funds have left the wallet and not been returned
    #[inline]
    pub fn holds_funds(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Approved | WithdrawalStatus::Processing | WithdrawalStatus::Completed
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(WithdrawalStatus::Pending),
            10 => Some(WithdrawalStatus::Approved),
            20 => Some(WithdrawalStatus::Processing),
            30 => Some(WithdrawalStatus::Completed),
            -10 => Some(WithdrawalStatus::Rejected),
            -20 => Some(WithdrawalStatus::Cancelled),
            -30 => Some(WithdrawalStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "PENDING",
            WithdrawalStatus::Approved => "APPROVED",
            WithdrawalStatus::Processing => "PROCESSING",
            WithdrawalStatus::Completed => "COMPLETED",
            WithdrawalStatus::Rejected => "REJECTED",
            WithdrawalStatus::Cancelled => "CANCELLED",
            WithdrawalStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payout channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum WithdrawalMethod {
    BankTransfer = 1,
    EWallet = 2,
}

impl WithdrawalMethod {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(WithdrawalMethod::BankTransfer),
            2 => Some(WithdrawalMethod::EWallet),
            _ => None,
        }
    }
}

/// Where the payout goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientInfo {
    pub account_name: String,
    pub account_number: String,
    /// Required for bank transfers
    #[serde(default)]
    pub bank_name: Option<String>,
}

/// A user's cash-out request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: WithdrawalId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub method: WithdrawalMethod,
    pub recipient: RecipientInfo,
    pub status: WithdrawalStatus,
    /// Ledger entry that moved the funds, once they moved
    pub transaction_id: Option<TransactionId>,
    /// Rejection / failure reason
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WithdrawalRequest {
    pub fn new(
        user_id: UserId,
        amount: Decimal,
        method: WithdrawalMethod,
        recipient: RecipientInfo,
        status: WithdrawalStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: WithdrawalId::new(),
            user_id,
            amount,
            method,
            recipient,
            status,
            transaction_id: None,
            reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transitioned(&self, next: WithdrawalStatus) -> Self {
        let mut request = self.clone();
        request.status = next;
        request.updated_at = Utc::now();
        request
    }
}
