//! Provider contract
//!
//! A provider knows its wire format and signatures and nothing else. State
//! transitions, idempotency and ledger effects all live in
//! [`PaymentService`](super::PaymentService), once for both gateways.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;

use super::error::PaymentError;
use super::transport::TransportError;
use super::types::{Payment, ProviderKind};
use crate::ledger::MAX_AMOUNT;

/// What the service asks a provider to open
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOrder {
    pub order_id: String,
    pub request_id: String,
    pub amount: Decimal,
    pub description: String,
    /// Echoed back by the gateway in its callback
    pub extra_data: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CreateReply {
    Created {
        checkout_url: Option<String>,
        qr_code: Option<String>,
        raw: Value,
    },
    Rejected {
        code: String,
        message: String,
        raw: Value,
    },
}

/// A verified callback, reduced to what reconciliation needs
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackNotice {
    pub order_id: String,
    pub amount: Decimal,
    pub success: bool,
    pub result_code: String,
    pub message: String,
    pub transaction_ref: Option<String>,
}

/// Gateway's view of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    Paid,
    Pending,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub status: RemoteStatus,
    pub result_code: String,
    pub transaction_ref: Option<String>,
    pub amount: Option<Decimal>,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefundReply {
    Refunded {
        refund_ref: Option<String>,
        raw: Value,
    },
    Rejected {
        code: String,
        message: String,
        raw: Value,
    },
}

/// How the service answered a callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackAck {
    pub accepted: bool,
    pub message: String,
    pub order_id: Option<String>,
}

impl CallbackAck {
    pub fn accepted(order_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            accepted: true,
            message: message.into(),
            order_id,
        }
    }

    pub fn rejected(order_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            message: message.into(),
            order_id,
        }
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Upper bound for one round trip
    fn timeout(&self) -> Duration;

    /// Fresh `(order_id, request_id)` in the provider's format
    fn new_order_ids(&self) -> (String, String);

    async fn create(&self, order: &CreateOrder) -> Result<CreateReply, PaymentError>;

    /// Check the signature and extract the notice. No I/O.
    fn verify_callback(&self, payload: &Value) -> Result<CallbackNotice, PaymentError>;

    async fn query(&self, payment: &Payment) -> Result<StatusReport, PaymentError>;

    async fn refund(&self, payment: &Payment, amount: Decimal) -> Result<RefundReply, PaymentError>;

    /// HTTP status and body the gateway expects for a callback answer
    fn render_ack(&self, ack: &CallbackAck) -> (u16, Value);
}

/// Gateways take VND as integer amounts
pub(crate) fn whole_amount(amount: Decimal) -> Result<i64, PaymentError> {
    if amount <= Decimal::ZERO || amount > MAX_AMOUNT || !amount.fract().is_zero() {
        return Err(PaymentError::InvalidAmount(amount));
    }
    amount.to_i64().ok_or(PaymentError::InvalidAmount(amount))
}

/// Read an integer-ish JSON field (number or numeric string)
pub(crate) fn json_decimal(value: Option<&Value>) -> Option<Decimal> {
    match value? {
        Value::Number(n) => n.as_i64().map(Decimal::from).or_else(|| n.to_string().parse().ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub(crate) fn unavailable(provider: ProviderKind, e: TransportError) -> PaymentError {
    PaymentError::ProviderUnavailable {
        provider,
        reason: e.to_string(),
    }
}
