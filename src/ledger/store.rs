//! Ledger store contract
//!
//! The store is the single relational source of truth for wallets, ledger
//! entries, escrows, payments and withdrawals. Components never write rows
//! directly: they describe a [`UnitOfWork`] and hand it to
//! [`LedgerStore::commit`], which applies it atomically or not at all.
//!
//! # Concurrency
//!
//! Every wallet touched by a unit of work carries the `version` the caller
//! read. Every row update carries the state the caller read. If any of them
//! changed in the meantime the whole unit is rejected with
//! [`StoreError::Conflict`] and the caller decides whether to retry.
//!
//! Wallet balances are never written as absolute values: the store derives
//! the new balance from the entries posted in the same unit, so a balance
//! cannot drift from its ledger.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use super::types::{Transaction, Wallet};
use crate::commission::CommissionRates;
use crate::core_types::{EscrowId, PaymentId, UserId, WalletId, WithdrawalId};
use crate::escrow::{Escrow, EscrowStatus};
use crate::payment::{Payment, PaymentLog, PaymentStatus, ProviderKind};
use crate::withdrawal::{WithdrawalRequest, WithdrawalStatus};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Optimistic check failed: a row changed since it was read
    #[error("Concurrent modification, please retry: {0}")]
    Conflict(String),

    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Row not found: {0}")]
    NotFound(String),

    /// A write would break a ledger invariant (e.g. negative balance)
    #[error("Ledger invariant violated: {0}")]
    Invariant(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    #[inline]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Conflict(_) => "CONCURRENT_MODIFICATION",
            StoreError::Duplicate(_) => "DUPLICATE",
            StoreError::NotFound(_) => "NOT_FOUND",
            StoreError::Invariant(_) => "LEDGER_INVARIANT",
            StoreError::Corrupt(_) => "CORRUPT_ROW",
            StoreError::Database(_) => "DATABASE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            StoreError::Conflict(_) | StoreError::Duplicate(_) => 409,
            StoreError::NotFound(_) => 404,
            StoreError::Invariant(_) | StoreError::Corrupt(_) | StoreError::Database(_) => 500,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Duplicate(db.message().to_string())
            }
            sqlx::Error::Database(db) if db.is_check_violation() => {
                StoreError::Invariant(db.message().to_string())
            }
            _ => StoreError::Database(e.to_string()),
        }
    }
}

/// Insert a new row, or update one whose guard still matches
#[derive(Debug, Clone)]
pub enum RowWrite<T, G> {
    Insert(T),
    Update { expected: G, row: T },
}

/// What a payment update compares against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentGuard {
    pub status: PaymentStatus,
    pub effect_applied: bool,
}

impl Payment {
    pub fn guard(&self) -> PaymentGuard {
        PaymentGuard {
            status: self.status,
            effect_applied: self.effect_applied,
        }
    }
}

/// Version check and optional freeze flag for one wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletTouch {
    pub expected_version: i64,
    pub set_frozen: Option<bool>,
}

/// One atomic batch of writes
#[derive(Debug, Default)]
pub struct UnitOfWork {
    pub(crate) wallets: HashMap<WalletId, WalletTouch>,
    pub(crate) entries: Vec<Transaction>,
    pub(crate) escrows: Vec<RowWrite<Escrow, EscrowStatus>>,
    pub(crate) payments: Vec<RowWrite<Payment, PaymentGuard>>,
    pub(crate) payment_logs: Vec<PaymentLog>,
    pub(crate) withdrawals: Vec<RowWrite<WithdrawalRequest, WithdrawalStatus>>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    fn touch(&mut self, wallet: &Wallet) -> &mut WalletTouch {
        self.wallets.entry(wallet.id).or_insert(WalletTouch {
            expected_version: wallet.version,
            set_frozen: None,
        })
    }

    /// Post a ledger entry against `wallet`, pinned to the version read.
    pub fn post(&mut self, wallet: &Wallet, entry: Transaction) -> &mut Self {
        debug_assert_eq!(wallet.id, entry.wallet_id);
        self.touch(wallet);
        self.entries.push(entry);
        self
    }

    pub fn set_frozen(&mut self, wallet: &Wallet, frozen: bool) -> &mut Self {
        self.touch(wallet).set_frozen = Some(frozen);
        self
    }

    pub fn insert_escrow(&mut self, escrow: Escrow) -> &mut Self {
        self.escrows.push(RowWrite::Insert(escrow));
        self
    }

    pub fn update_escrow(&mut self, expected: EscrowStatus, escrow: Escrow) -> &mut Self {
        self.escrows.push(RowWrite::Update {
            expected,
            row: escrow,
        });
        self
    }

    pub fn insert_payment(&mut self, payment: Payment) -> &mut Self {
        self.payments.push(RowWrite::Insert(payment));
        self
    }

    pub fn update_payment(&mut self, expected: PaymentGuard, payment: Payment) -> &mut Self {
        self.payments.push(RowWrite::Update {
            expected,
            row: payment,
        });
        self
    }

    pub fn log(&mut self, log: PaymentLog) -> &mut Self {
        self.payment_logs.push(log);
        self
    }

    pub fn insert_withdrawal(&mut self, request: WithdrawalRequest) -> &mut Self {
        self.withdrawals.push(RowWrite::Insert(request));
        self
    }

    pub fn update_withdrawal(
        &mut self,
        expected: WithdrawalStatus,
        request: WithdrawalRequest,
    ) -> &mut Self {
        self.withdrawals.push(RowWrite::Update {
            expected,
            row: request,
        });
        self
    }

    /// Net balance change per touched wallet implied by the posted entries
    pub fn balance_deltas(&self) -> Result<HashMap<WalletId, Decimal>, StoreError> {
        let mut deltas: HashMap<WalletId, Decimal> =
            self.wallets.keys().map(|id| (*id, Decimal::ZERO)).collect();
        for entry in &self.entries {
            match deltas.get_mut(&entry.wallet_id) {
                Some(delta) => {
                    *delta = delta.checked_add(entry.balance_delta()).ok_or_else(|| {
                        StoreError::Invariant(format!(
                            "balance change of wallet {} overflows",
                            entry.wallet_id
                        ))
                    })?;
                }
                None => {
                    return Err(StoreError::Invariant(format!(
                        "entry {} posted to unpinned wallet {}",
                        entry.id, entry.wallet_id
                    )));
                }
            }
        }
        Ok(deltas)
    }

    pub fn entries(&self) -> &[Transaction] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
            && self.entries.is_empty()
            && self.escrows.is_empty()
            && self.payments.is_empty()
            && self.payment_logs.is_empty()
            && self.withdrawals.is_empty()
    }
}

/// Durable store for every financial entity
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    async fn wallet(&self, id: WalletId) -> Result<Option<Wallet>, StoreError>;

    async fn wallet_by_user(&self, user_id: UserId) -> Result<Option<Wallet>, StoreError>;

    /// Insert a zero-balance wallet unless one exists; returns the stored row.
    async fn create_wallet(&self, user_id: UserId, currency: &str) -> Result<Wallet, StoreError>;

    /// Ledger entries of one wallet, oldest first
    async fn transactions(&self, wallet_id: WalletId) -> Result<Vec<Transaction>, StoreError>;

    async fn escrow(&self, id: EscrowId) -> Result<Option<Escrow>, StoreError>;

    async fn payment(&self, id: PaymentId) -> Result<Option<Payment>, StoreError>;

    async fn payment_by_order(
        &self,
        provider: ProviderKind,
        order_id: &str,
    ) -> Result<Option<Payment>, StoreError>;

    /// Audit trail of one payment, oldest first
    async fn payment_logs(&self, id: PaymentId) -> Result<Vec<PaymentLog>, StoreError>;

    async fn withdrawal(&self, id: WithdrawalId) -> Result<Option<WithdrawalRequest>, StoreError>;

    /// Newest first
    async fn withdrawals_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<WithdrawalRequest>, StoreError>;

    async fn commission_rates(&self) -> Result<Option<CommissionRates>, StoreError>;

    async fn save_commission_rates(&self, rates: &CommissionRates) -> Result<(), StoreError>;

    /// Apply a unit of work atomically
    async fn commit(&self, uow: UnitOfWork) -> Result<(), StoreError>;

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
