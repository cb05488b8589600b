//! Withdrawal processing

pub mod error;
pub mod processor;
pub mod types;

pub use error::WithdrawalError;
pub use processor::WithdrawalProcessor;
pub use types::{RecipientInfo, WithdrawalMethod, WithdrawalRequest, WithdrawalStatus};
