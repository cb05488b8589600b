//! PayOS: QR-style gateway
//!
//! Orders are keyed by a numeric `orderCode`. Create requests sign five
//! normalized fields; webhooks sign every field of `data`, sorted by key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use serde_json::{Value, json};

use super::error::PaymentError;
use super::provider::{
    CallbackAck, CallbackNotice, CreateOrder, CreateReply, PaymentProvider, RefundReply,
    RemoteStatus, StatusReport, json_decimal, unavailable, whole_amount,
};
use super::signature::{self, field_string, normalize_description, normalize_text, sorted_canonical};
use super::transport::{Headers, HttpTransport};
use super::types::{Payment, ProviderKind};
use crate::config::PayOsConfig;

/// Gateway success code
pub const CODE_SUCCESS: &str = "00";

/// Longest description the gateway accepts
pub const DESCRIPTION_MAX_CHARS: usize = 25;

pub struct PayOsProvider {
    config: PayOsConfig,
    transport: Arc<dyn HttpTransport>,
}

impl PayOsProvider {
    pub fn new(config: PayOsConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self { config, transport }
    }

    fn sign(&self, raw: &str) -> Result<String, PaymentError> {
        signature::sign(&self.config.checksum_key, raw).map_err(PaymentError::Config)
    }

    fn headers(&self, signature: Option<String>) -> Headers {
        let mut headers = vec![
            ("Content-Type", "application/json".to_string()),
            ("x-client-id", self.config.client_id.clone()),
            ("x-api-key", self.config.api_key.clone()),
        ];
        if let Some(signature) = signature {
            headers.push(("x-signature", signature));
        }
        headers
    }

    fn order_url(template: &str, order_code: &str) -> String {
        template.replace("{orderCode}", order_code)
    }

    fn order_code(order_id: &str) -> Result<i64, PaymentError> {
        order_id
            .parse()
            .map_err(|_| {
                PaymentError::MalformedPayload(format!("orderCode is not numeric: {}", order_id))
            })
    }

    fn code(body: &Value) -> String {
        field_string(body.get("code"))
    }

    fn desc(body: &Value) -> String {
        field_string(body.get("desc"))
    }

    /// Sign a webhook payload as the gateway would; used to build test fixtures
    pub fn sign_webhook(&self, payload: &mut Value) -> Result<(), PaymentError> {
        let data = payload
            .get("data")
            .and_then(Value::as_object)
            .ok_or_else(|| PaymentError::MalformedPayload("missing data".into()))?;
        let signature = self.sign(&sorted_canonical(data))?;
        if let Some(object) = payload.as_object_mut() {
            object.insert("signature".to_string(), Value::String(signature));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentProvider for PayOsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::PayOs
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// `orderCode` must fit a JS safe integer: millis * 1000 + jitter
    fn new_order_ids(&self) -> (String, String) {
        let jitter: i64 = rand::thread_rng().gen_range(0..1000);
        let code = Utc::now().timestamp_millis() * 1000 + jitter;
        (code.to_string(), ulid::Ulid::new().to_string())
    }

    async fn create(&self, order: &CreateOrder) -> Result<CreateReply, PaymentError> {
        let amount = whole_amount(order.amount)?;
        let order_code = Self::order_code(&order.order_id)?;
        let description = normalize_description(&order.description, DESCRIPTION_MAX_CHARS);
        let cancel_url = normalize_text(&self.config.cancel_url);
        let return_url = normalize_text(&self.config.return_url);

        let raw = format!(
            "amount={}&cancelUrl={}&description={}&orderCode={}&returnUrl={}",
            amount, cancel_url, description, order_code, return_url
        );
        let signature = self.sign(&raw)?;
        let body = json!({
            "orderCode": order_code,
            "amount": amount,
            "description": description,
            "cancelUrl": cancel_url,
            "returnUrl": return_url,
            "signature": signature,
        });

        let reply = self
            .transport
            .post_json(&self.config.create_url, &self.headers(Some(signature)), &body)
            .await
            .map_err(|e| unavailable(ProviderKind::PayOs, e))?;

        let code = Self::code(&reply);
        if code != CODE_SUCCESS {
            return Ok(CreateReply::Rejected {
                code,
                message: Self::desc(&reply),
                raw: reply,
            });
        }
        let data = reply.get("data");
        let text = |field: &str| {
            data.and_then(|d| d.get(field))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Ok(CreateReply::Created {
            checkout_url: text("checkoutUrl"),
            qr_code: text("qrCode"),
            raw: reply,
        })
    }

    fn verify_callback(&self, payload: &Value) -> Result<CallbackNotice, PaymentError> {
        let data = payload
            .get("data")
            .and_then(Value::as_object)
            .ok_or_else(|| PaymentError::MalformedPayload("missing data".into()))?;
        let provided = payload
            .get("signature")
            .and_then(Value::as_str)
            .ok_or(PaymentError::InvalidSignature)?;
        if !signature::verify(&self.config.checksum_key, &sorted_canonical(data), provided) {
            return Err(PaymentError::InvalidSignature);
        }

        let order_code = field_string(data.get("orderCode"));
        if order_code.is_empty() {
            return Err(PaymentError::MalformedPayload("missing orderCode".into()));
        }
        let amount = json_decimal(data.get("amount"))
            .ok_or_else(|| PaymentError::MalformedPayload("missing amount".into()))?;

        let code = Self::code(payload);
        // data.code, when present, must agree
        let data_code = field_string(data.get("code"));
        let success = code == CODE_SUCCESS && (data_code.is_empty() || data_code == CODE_SUCCESS);

        Ok(CallbackNotice {
            order_id: order_code,
            amount,
            success,
            result_code: if data_code.is_empty() { code } else { data_code },
            message: Self::desc(payload),
            transaction_ref: Some(field_string(data.get("reference"))).filter(|r| !r.is_empty()),
        })
    }

    async fn query(&self, payment: &Payment) -> Result<StatusReport, PaymentError> {
        let url = Self::order_url(&self.config.query_url, &payment.order_id);
        let reply = self
            .transport
            .get_json(&url, &self.headers(None))
            .await
            .map_err(|e| unavailable(ProviderKind::PayOs, e))?;

        let code = Self::code(&reply);
        if code != CODE_SUCCESS {
            return Err(PaymentError::ProviderRejected {
                provider: ProviderKind::PayOs,
                code,
                message: Self::desc(&reply),
            });
        }
        let data = reply
            .get("data")
            .ok_or_else(|| PaymentError::MalformedPayload("missing data".into()))?;
        let remote = field_string(data.get("status"));
        let status = match remote.as_str() {
            "PAID" => RemoteStatus::Paid,
            "PENDING" | "PROCESSING" => RemoteStatus::Pending,
            _ => RemoteStatus::Failed,
        };
        let transaction_ref = data
            .get("transactions")
            .and_then(Value::as_array)
            .and_then(|txs| txs.first())
            .map(|tx| field_string(tx.get("reference")))
            .filter(|r| !r.is_empty());

        Ok(StatusReport {
            status,
            result_code: remote,
            transaction_ref,
            amount: json_decimal(data.get("amount")),
            raw: reply,
        })
    }

    async fn refund(
        &self,
        payment: &Payment,
        amount: Decimal,
    ) -> Result<RefundReply, PaymentError> {
        let amount = whole_amount(amount)?;
        let order_code = Self::order_code(&payment.order_id)?;
        let description = normalize_description(
            &format!("Hoan tien {}", payment.order_id),
            DESCRIPTION_MAX_CHARS,
        );
        let reference = payment.transaction_ref.clone().unwrap_or_default();

        let mut body = json!({
            "orderCode": order_code,
            "amount": amount,
            "description": description,
            "reference": reference,
        });
        let signature = match body.as_object() {
            Some(fields) => self.sign(&sorted_canonical(fields))?,
            None => return Err(PaymentError::MalformedPayload("refund body".into())),
        };
        body["signature"] = Value::String(signature.clone());

        let url = Self::order_url(&self.config.refund_url, &payment.order_id);
        let reply = self
            .transport
            .post_json(&url, &self.headers(Some(signature)), &body)
            .await
            .map_err(|e| unavailable(ProviderKind::PayOs, e))?;

        let code = Self::code(&reply);
        if code != CODE_SUCCESS {
            return Ok(RefundReply::Rejected {
                code,
                message: Self::desc(&reply),
                raw: reply,
            });
        }
        let refund_ref = reply
            .get("data")
            .map(|d| field_string(d.get("refundId").or_else(|| d.get("reference"))))
            .filter(|r| !r.is_empty());
        Ok(RefundReply::Refunded { refund_ref, raw: reply })
    }

    fn render_ack(&self, ack: &CallbackAck) -> (u16, Value) {
        (200, json!({ "success": ack.accepted }))
    }
}
