//! Payment intent and audit log types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::{EscrowId, PaymentId, PaymentLogId, UserId};

/// External payment provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum ProviderKind {
    /// Wallet-style gateway (pay URL / deeplink, IPN callback)
    MoMo = 1,
    /// QR-style gateway (numeric order code, checkout link, webhook)
    PayOs = 2,
}

impl ProviderKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(ProviderKind::MoMo),
            2 => Some(ProviderKind::PayOs),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::MoMo => "momo",
            ProviderKind::PayOs => "payos",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "momo" => Ok(ProviderKind::MoMo),
            "payos" => Ok(ProviderKind::PayOs),
            _ => Err(format!("Unknown payment provider: {}", s)),
        }
    }
}

/// Payment status
///
/// ```text
/// PENDING → PAID → REFUNDED
///    ↓  ↑
///   FAILED
/// ```
///
/// FAILED → PAID is allowed: a verified success callback can arrive after a
/// status poll already gave up on the payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum PaymentStatus {
    Pending = 0,
    Paid = 10,
    Failed = -10,
    Refunded = 20,
}

impl PaymentStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(PaymentStatus::Pending),
            10 => Some(PaymentStatus::Paid),
            -10 => Some(PaymentStatus::Failed),
            20 => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }

    /// Paid or Refunded: the provider has captured money for this payment
    #[inline]
    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::Refunded)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a payment pays for. Exactly one business effect per payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentContext {
    /// Funds an AwaitingPayment escrow. Rewritten to `WalletDeposit` of the
    /// payer when the escrow was already funded by the time this one is paid.
    Escrow(EscrowId),
    /// Tops up the user's wallet
    WalletDeposit(UserId),
}

impl PaymentContext {
    /// SMALLINT discriminator stored in `payments_tb.context_type`
    pub fn type_id(&self) -> i16 {
        match self {
            PaymentContext::Escrow(_) => 1,
            PaymentContext::WalletDeposit(_) => 2,
        }
    }

    /// Context id stored as TEXT in `payments_tb.context_id`
    pub fn context_id(&self) -> String {
        match self {
            PaymentContext::Escrow(id) => id.to_string(),
            PaymentContext::WalletDeposit(user_id) => user_id.to_string(),
        }
    }

    pub fn from_parts(type_id: i16, context_id: &str) -> Option<Self> {
        match type_id {
            1 => context_id.parse().ok().map(PaymentContext::Escrow),
            2 => context_id.parse().ok().map(PaymentContext::WalletDeposit),
            _ => None,
        }
    }
}

/// External-gateway payment intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub provider: ProviderKind,
    /// Gateway-visible correlation id, unique per provider
    pub order_id: String,
    pub request_id: String,
    /// User who initiated the payment
    pub user_id: UserId,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub context: PaymentContext,
    pub result_code: Option<String>,
    /// Gateway transaction reference (MoMo transId / PayOS reference)
    pub transaction_ref: Option<String>,
    pub checkout_url: Option<String>,
    pub qr_code: Option<String>,
    /// Set once the business effect has been committed to the ledger
    pub effect_applied: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(
        provider: ProviderKind,
        order_id: String,
        request_id: String,
        user_id: UserId,
        amount: Decimal,
        context: PaymentContext,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::new(),
            provider,
            order_id,
            request_id,
            user_id,
            amount,
            status: PaymentStatus::Pending,
            context,
            result_code: None,
            transaction_ref: None,
            checkout_url: None,
            qr_code: None,
            effect_applied: false,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a Paid payment still owes its business effect
    #[inline]
    pub fn needs_effect(&self) -> bool {
        self.status == PaymentStatus::Paid && !self.effect_applied
    }
}

/// Which leg of a provider exchange a log entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum LogDirection {
    Request = 1,
    Response = 2,
    Callback = 3,
    Error = 4,
}

impl LogDirection {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(LogDirection::Request),
            2 => Some(LogDirection::Response),
            3 => Some(LogDirection::Callback),
            4 => Some(LogDirection::Error),
            _ => None,
        }
    }
}

/// Append-only audit entry for forensic replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentLog {
    pub id: PaymentLogId,
    pub payment_id: PaymentId,
    pub direction: LogDirection,
    /// Operation label, e.g. "create", "ipn", "query", "refund"
    pub action: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl PaymentLog {
    pub fn new(
        payment_id: PaymentId,
        direction: LogDirection,
        action: &str,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: PaymentLogId::new(),
            payment_id,
            direction,
            action: action.to_string(),
            payload,
            created_at: Utc::now(),
        }
    }
}
