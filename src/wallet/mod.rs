//! User wallets: deposit, withdraw, transfer, freeze and audit.

pub mod error;
pub mod manager;

pub use error::WalletError;
pub use manager::{ConsistencyReport, WalletManager, WalletReceipt};
