//! Wallet ledger: append-only entries, cached balances, and the store
//! every financial component commits through.

pub mod memory;
pub mod postgres;
pub mod store;
pub mod types;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{LedgerStore, PaymentGuard, RowWrite, StoreError, UnitOfWork, WalletTouch};
pub use types::{MAX_AMOUNT, Transaction, TransactionKind, TransactionStatus, Wallet, ledger_sum};
