//! HTTP handlers, one module per resource

pub mod commission;
pub mod escrow;
pub mod health;
pub mod helpers;
pub mod payment;
pub mod wallet;
pub mod withdrawal;

pub use health::health_check;
pub use helpers::{Caller, USER_ID_HEADER};
