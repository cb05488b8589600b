//! Escrow State Definitions
//!
//! ```text
//! AWAITING_PAYMENT → HELD → RELEASED
//!                      ↓
//!                   REFUNDED
//! ```
//!
//! Wallet-funded escrows are created directly in HELD. RELEASED and REFUNDED
//! are terminal and mutually exclusive; nothing ever returns to HELD.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Escrow states, stored as SMALLINT in `escrows_tb.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum EscrowStatus {
    /// Created for a gateway payment that has not been confirmed yet
    AwaitingPayment = 0,

    /// Funds sit in the settlement wallet
    Held = 10,

    /// Terminal: tutor paid net of commission
    Released = 20,

    /// Terminal: gross returned to the payer
    Refunded = -10,
}

impl EscrowStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, EscrowStatus::Released | EscrowStatus::Refunded)
    }

    /// Whether `self → next` is a legal edge of the state machine
    pub fn can_transition_to(&self, next: EscrowStatus) -> bool {
        matches!(
            (self, next),
            (EscrowStatus::AwaitingPayment, EscrowStatus::Held)
                | (EscrowStatus::Held, EscrowStatus::Released)
                | (EscrowStatus::Held, EscrowStatus::Refunded)
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(EscrowStatus::AwaitingPayment),
            10 => Some(EscrowStatus::Held),
            20 => Some(EscrowStatus::Released),
            -10 => Some(EscrowStatus::Refunded),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::AwaitingPayment => "AWAITING_PAYMENT",
            EscrowStatus::Held => "HELD",
            EscrowStatus::Released => "RELEASED",
            EscrowStatus::Refunded => "REFUNDED",
        }
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [EscrowStatus; 4] = [
        EscrowStatus::AwaitingPayment,
        EscrowStatus::Held,
        EscrowStatus::Released,
        EscrowStatus::Refunded,
    ];

    #[test]
    fn test_terminal_states() {
        assert!(EscrowStatus::Released.is_terminal());
        assert!(EscrowStatus::Refunded.is_terminal());
        assert!(!EscrowStatus::Held.is_terminal());
        assert!(!EscrowStatus::AwaitingPayment.is_terminal());
    }

    #[test]
    fn test_nothing_returns_to_held_after_leaving() {
        for from in [EscrowStatus::Released, EscrowStatus::Refunded] {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be illegal");
            }
        }
    }

    #[test]
    fn test_released_and_refunded_only_from_held() {
        for from in ALL {
            let expected = from == EscrowStatus::Held;
            assert_eq!(from.can_transition_to(EscrowStatus::Released), expected);
            assert_eq!(from.can_transition_to(EscrowStatus::Refunded), expected);
        }
    }

    #[test]
    fn test_state_id_roundtrip() {
        for state in ALL {
            assert_eq!(EscrowStatus::from_id(state.id()), Some(state));
        }
        assert!(EscrowStatus::from_id(99).is_none());
    }
}
