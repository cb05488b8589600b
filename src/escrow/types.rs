//! Escrow record

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::state::EscrowStatus;
use crate::core_types::{ClassId, EscrowId, UserId};

/// Funds held for one class enrollment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escrow {
    pub id: EscrowId,
    pub class_id: ClassId,
    pub payer_user_id: UserId,
    /// Resolved from the class at hold time
    pub tutor_user_id: UserId,
    pub gross_amount: Decimal,
    /// Snapshot taken at hold time; never re-read from the live table
    pub commission_rate: Decimal,
    pub status: EscrowStatus,
    /// Filled on release
    pub commission_amount: Option<Decimal>,
    /// Filled on release
    pub net_amount: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub held_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Escrow {
    pub fn new(
        class_id: ClassId,
        payer_user_id: UserId,
        tutor_user_id: UserId,
        gross_amount: Decimal,
        commission_rate: Decimal,
        status: EscrowStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: EscrowId::new(),
            class_id,
            payer_user_id,
            tutor_user_id,
            gross_amount,
            commission_rate,
            status,
            commission_amount: None,
            net_amount: None,
            created_at: now,
            held_at: (status == EscrowStatus::Held).then_some(now),
            released_at: None,
            refunded_at: None,
        }
    }

    /// Copy of this escrow moved to `next`, stamping the matching timestamp.
    ///
    /// Callers check legality first; this only records the transition.
    pub fn transitioned(&self, next: EscrowStatus) -> Self {
        let now = Utc::now();
        let mut escrow = self.clone();
        escrow.status = next;
        match next {
            EscrowStatus::Held => escrow.held_at = Some(now),
            EscrowStatus::Released => escrow.released_at = Some(now),
            EscrowStatus::Refunded => escrow.refunded_at = Some(now),
            EscrowStatus::AwaitingPayment => {}
        }
        escrow
    }
}
