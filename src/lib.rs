//! TutorPay - financial core of a tutoring marketplace
//!
//! Wallets, escrow between learner and tutor, platform commission, and the
//! reconciliation of two payment gateways, all over one double-entry ledger.
//!
//! # Modules
//!
//! - [`core_types`] - Ids shared by every component
//! - [`ledger`] - Entities, the store contract and its two backends
//! - [`wallet`] - Deposits, withdrawals, transfers, freeze and audit
//! - [`escrow`] - Hold, release and refund of class payments
//! - [`commission`] - Rate table and the commission split
//! - [`payment`] - MoMo and PayOS adapters and callback reconciliation
//! - [`withdrawal`] - Payout requests and their lifecycle
//! - [`gateway`] - HTTP surface
//! - [`directory`] - Class and user lookups owned by other services
//! - [`notify`] - Settlement notifications
//! - [`retry`] - Conflict retry policy
//! - [`config`] / [`logging`] / [`db`] - Process plumbing

// Core types - must be first!
pub mod core_types;

// Storage
pub mod db;
pub mod ledger;

// Financial components
pub mod commission;
pub mod escrow;
pub mod payment;
pub mod wallet;
pub mod withdrawal;

// Collaborators
pub mod directory;
pub mod notify;
pub mod retry;

// Process plumbing
pub mod config;
pub mod gateway;
pub mod logging;

// Convenient re-exports at crate root
pub use commission::{CommissionResolver, CommissionSplit, calculate_commission};
pub use core_types::{ClassId, EscrowId, PaymentId, TransactionId, UserId, WalletId, WithdrawalId};
pub use escrow::{Escrow, EscrowManager, EscrowStatus};
pub use ledger::{LedgerStore, MemoryStore, PgStore, StoreError, Transaction, Wallet};
pub use payment::{Payment, PaymentService, PaymentStatus, ProviderKind};
pub use wallet::WalletManager;
pub use withdrawal::{WithdrawalProcessor, WithdrawalRequest, WithdrawalStatus};
