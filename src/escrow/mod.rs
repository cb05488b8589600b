//! Escrow hold / release / refund

pub mod error;
pub mod manager;
pub mod state;
pub mod types;

pub use error::EscrowError;
pub use manager::EscrowManager;
pub use state::EscrowStatus;
pub use types::Escrow;
