//! Core types used throughout the system
//!
//! Identifiers owned by other services (users, classes) are plain integer
//! aliases. Identifiers minted by the financial core are ULID newtypes so they
//! are sortable, collision-free without coordination, and stored as TEXT.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// User ID - assigned by the identity service, never minted here.
pub type UserId = i64;

/// Class ID - assigned by the scheduling service.
pub type ClassId = i64;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(ulid::Ulid);

        impl $name {
            /// Generate a new unique id
            pub fn new() -> Self {
                Self(ulid::Ulid::new())
            }

            /// Get the inner ULID value
            pub fn inner(&self) -> ulid::Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(ulid::Ulid::from_string(s)?))
            }
        }
    };
}

ulid_id!(
    /// Wallet identifier
    WalletId
);
ulid_id!(
    /// Ledger entry identifier
    TransactionId
);
ulid_id!(
    /// Escrow identifier
    EscrowId
);
ulid_id!(
    /// Payment intent identifier (internal, not the gateway order id)
    PaymentId
);
ulid_id!(PaymentLogId);
ulid_id!(
    /// Withdrawal request identifier
    WithdrawalId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_string_roundtrip() {
        let id = EscrowId::new();
        let parsed: EscrowId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_invalid_id_rejected() {
        assert!("not-a-ulid".parse::<PaymentId>().is_err());
    }

    #[test]
    fn test_serde_is_transparent_string() {
        let id = WalletId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
