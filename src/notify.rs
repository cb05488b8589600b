//! Settlement notifications
//!
//! Delivery is best-effort and always happens after the ledger commit. A
//! failed notification is logged and never rolls anything back.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::core_types::{ClassId, EscrowId, PaymentId, UserId, WithdrawalId};

/// Money event a user is told about
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SettlementEvent {
    EscrowHeld {
        escrow_id: EscrowId,
        class_id: ClassId,
        amount: Decimal,
    },
    EscrowReleased {
        escrow_id: EscrowId,
        class_id: ClassId,
        net_amount: Decimal,
    },
    EscrowRefunded {
        escrow_id: EscrowId,
        class_id: ClassId,
        amount: Decimal,
    },
    PaymentSucceeded {
        payment_id: PaymentId,
        amount: Decimal,
    },
    PaymentFailed {
        payment_id: PaymentId,
    },
    PaymentRefunded {
        payment_id: PaymentId,
        amount: Decimal,
    },
    WithdrawalCompleted {
        withdrawal_id: WithdrawalId,
        amount: Decimal,
    },
    WithdrawalReturned {
        withdrawal_id: WithdrawalId,
        amount: Decimal,
    },
}

impl SettlementEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SettlementEvent::EscrowHeld { .. } => "escrow_held",
            SettlementEvent::EscrowReleased { .. } => "escrow_released",
            SettlementEvent::EscrowRefunded { .. } => "escrow_refunded",
            SettlementEvent::PaymentSucceeded { .. } => "payment_succeeded",
            SettlementEvent::PaymentFailed { .. } => "payment_failed",
            SettlementEvent::PaymentRefunded { .. } => "payment_refunded",
            SettlementEvent::WithdrawalCompleted { .. } => "withdrawal_completed",
            SettlementEvent::WithdrawalReturned { .. } => "withdrawal_returned",
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Outbound notification channel (push, email, in-app)
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, user_id: UserId, event: &SettlementEvent) -> Result<(), NotifyError>;
}

/// Fire-and-log: failures are reported, never propagated
pub async fn dispatch(
    notifier: &dyn NotificationDispatcher,
    user_id: UserId,
    event: SettlementEvent,
) {
    if let Err(e) = notifier.notify(user_id, &event).await {
        tracing::warn!(
            user_id,
            event = event.name(),
            error = %e,
            "Notification dropped"
        );
    }
}

/// Writes events to the log; used when no delivery service is wired
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationDispatcher for TracingNotifier {
    async fn notify(&self, user_id: UserId, event: &SettlementEvent) -> Result<(), NotifyError> {
        tracing::info!(user_id, event = event.name(), detail = ?event, "Settlement notification");
        Ok(())
    }
}

/// Records every delivery; can be told to fail
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(UserId, SettlementEvent)>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(UserId, SettlementEvent)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn events_for(&self, user_id: UserId) -> Vec<&'static str> {
        self.sent()
            .iter()
            .filter(|(u, _)| *u == user_id)
            .map(|(_, e)| e.name())
            .collect()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn notify(&self, user_id: UserId, event: &SettlementEvent) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Delivery("recording notifier set to fail".into()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((user_id, event.clone()));
        Ok(())
    }
}
