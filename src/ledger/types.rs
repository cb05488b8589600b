//! Wallet and ledger entry types
//!
//! A wallet's balance is a cached projection of its ledger: it must always
//! equal the sum of its balance-affecting transactions.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::{TransactionId, UserId, WalletId};

/// Largest amount a single operation accepts (10^18).
///
/// Keeps every balance and ledger sum far inside `Decimal`'s range.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xA764_0000, 0x0DE0_B6B3, 0, false, 0);

/// One wallet per user. Never deleted, only frozen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub balance: Decimal,
    pub currency: String,
    pub is_frozen: bool,
    /// Optimistic concurrency token, bumped on every committed write
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Fresh zero-balance wallet
    pub fn new(user_id: UserId, currency: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: WalletId::new(),
            user_id,
            balance: Decimal::ZERO,
            currency: currency.into(),
            is_frozen: false,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[inline]
    pub fn can_cover(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }
}

/// Ledger entry kind
///
/// IDs are stored as SMALLINT in `ledger_transactions_tb.kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum TransactionKind {
    Credit = 1,
    Debit = 2,
    TransferIn = 3,
    TransferOut = 4,
    EscrowIn = 5,
    PayoutIn = 6,
    PayoutOut = 7,
    /// Revenue bookkeeping on release. Carries the commission amount but does
    /// not move the balance: the commission simply stays in settlement.
    /// Excluded from [`ledger_sum`]; HTTP listings show it with a zero
    /// `balance_delta`.
    Commission = 8,
    RefundIn = 9,
    RefundOut = 10,
}

impl TransactionKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TransactionKind::Credit),
            2 => Some(TransactionKind::Debit),
            3 => Some(TransactionKind::TransferIn),
            4 => Some(TransactionKind::TransferOut),
            5 => Some(TransactionKind::EscrowIn),
            6 => Some(TransactionKind::PayoutIn),
            7 => Some(TransactionKind::PayoutOut),
            8 => Some(TransactionKind::Commission),
            9 => Some(TransactionKind::RefundIn),
            10 => Some(TransactionKind::RefundOut),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Credit => "CREDIT",
            TransactionKind::Debit => "DEBIT",
            TransactionKind::TransferIn => "TRANSFER_IN",
            TransactionKind::TransferOut => "TRANSFER_OUT",
            TransactionKind::EscrowIn => "ESCROW_IN",
            TransactionKind::PayoutIn => "PAYOUT_IN",
            TransactionKind::PayoutOut => "PAYOUT_OUT",
            TransactionKind::Commission => "COMMISSION",
            TransactionKind::RefundIn => "REFUND_IN",
            TransactionKind::RefundOut => "REFUND_OUT",
        }
    }

    /// Whether entries of this kind count toward the wallet balance
    #[inline]
    pub fn affects_balance(&self) -> bool {
        !matches!(self, TransactionKind::Commission)
    }

    /// Sign applied to the absolute amount when the entry is recorded
    pub fn sign(&self) -> Decimal {
        match self {
            TransactionKind::Debit
            | TransactionKind::TransferOut
            | TransactionKind::PayoutOut
            | TransactionKind::RefundOut => Decimal::NEGATIVE_ONE,
            _ => Decimal::ONE,
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Entry status. Operations are synchronous, so every recorded entry is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    #[default]
    Succeeded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        "SUCCEEDED"
    }
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub wallet_id: WalletId,
    /// Signed: credits positive, debits negative
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub note: Option<String>,
    pub counterparty_user_id: Option<UserId>,
    /// Id of the escrow / payment / withdrawal that produced the entry
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Build an entry from an absolute amount; the sign comes from `kind`.
    pub fn record(wallet_id: WalletId, kind: TransactionKind, amount: Decimal) -> Self {
        Self {
            id: TransactionId::new(),
            wallet_id,
            amount: amount.abs() * kind.sign(),
            kind,
            status: TransactionStatus::Succeeded,
            note: None,
            counterparty_user_id: None,
            reference: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }

    pub fn with_counterparty(mut self, user_id: UserId) -> Self {
        self.counterparty_user_id = Some(user_id);
        self
    }

    pub fn with_reference(mut self, reference: impl ToString) -> Self {
        self.reference = Some(reference.to_string());
        self
    }

    /// Contribution of this entry to the wallet balance
    #[inline]
    pub fn balance_delta(&self) -> Decimal {
        if self.kind.affects_balance() {
            self.amount
        } else {
            Decimal::ZERO
        }
    }
}

/// Sum of balance-affecting entries; `None` on overflow
pub fn ledger_sum<'a>(entries: impl IntoIterator<Item = &'a Transaction>) -> Option<Decimal> {
    entries
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, e| acc.checked_add(e.balance_delta()))
}
