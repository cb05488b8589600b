//! MoMo: wallet-style gateway
//!
//! The user is redirected to a pay URL or app deeplink; the result arrives
//! as an IPN POST. Every request and the IPN carry an HMAC-SHA256 signature
//! over a fixed, alphabetical field list.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Value, json};

use super::error::PaymentError;
use super::provider::{
    CallbackAck, CallbackNotice, CreateOrder, CreateReply, PaymentProvider, RefundReply,
    RemoteStatus, StatusReport, json_decimal, unavailable, whole_amount,
};
use super::signature::{self, canonical, field_string};
use super::transport::{Headers, HttpTransport};
use super::types::{Payment, ProviderKind};
use crate::config::MoMoConfig;

/// `resultCode` for success
pub const RESULT_SUCCESS: i64 = 0;

/// Codes the query API returns while the user has not finished paying
const PENDING_CODES: [i64; 3] = [1000, 7000, 7002];

/// Fields of the IPN signature, in signing order
const IPN_FIELDS: [&str; 13] = [
    "accessKey",
    "amount",
    "extraData",
    "message",
    "orderId",
    "orderInfo",
    "orderType",
    "partnerCode",
    "payType",
    "requestId",
    "responseTime",
    "resultCode",
    "transId",
];

pub struct MoMoProvider {
    config: MoMoConfig,
    transport: Arc<dyn HttpTransport>,
}

impl MoMoProvider {
    pub fn new(config: MoMoConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self { config, transport }
    }

    fn sign(&self, raw: &str) -> Result<String, PaymentError> {
        signature::sign(&self.config.secret_key, raw).map_err(PaymentError::Config)
    }

    fn headers() -> Headers {
        vec![("Content-Type", "application/json".to_string())]
    }

    fn result_code(body: &Value) -> Option<i64> {
        match body.get("resultCode")? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn message(body: &Value) -> String {
        field_string(body.get("message"))
    }

    /// Raw string the IPN signature covers; `accessKey` comes from config
    fn ipn_raw(&self, payload: &Value) -> String {
        let pairs: Vec<(&str, String)> = IPN_FIELDS
            .iter()
            .map(|&field| {
                let value = if field == "accessKey" {
                    self.config.access_key.clone()
                } else {
                    field_string(payload.get(field))
                };
                (field, value)
            })
            .collect();
        canonical(&pairs)
    }

    /// Sign an IPN payload as the gateway would; used to build test fixtures
    pub fn sign_ipn(&self, payload: &mut Value) -> Result<(), PaymentError> {
        let signature = self.sign(&self.ipn_raw(payload))?;
        if let Some(object) = payload.as_object_mut() {
            object.insert("signature".to_string(), Value::String(signature));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentProvider for MoMoProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::MoMo
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    fn new_order_ids(&self) -> (String, String) {
        let request_id = ulid::Ulid::new().to_string();
        (format!("{}-{}", self.config.partner_code, request_id), request_id)
    }

    async fn create(&self, order: &CreateOrder) -> Result<CreateReply, PaymentError> {
        let amount = whole_amount(order.amount)?;
        let raw = canonical::<&str, &str>(&[
            ("accessKey", self.config.access_key.as_str()),
            ("amount", amount.to_string().as_str()),
            ("extraData", order.extra_data.as_str()),
            ("ipnUrl", self.config.ipn_url.as_str()),
            ("orderId", order.order_id.as_str()),
            ("orderInfo", order.description.as_str()),
            ("partnerCode", self.config.partner_code.as_str()),
            ("redirectUrl", self.config.redirect_url.as_str()),
            ("requestId", order.request_id.as_str()),
            ("requestType", self.config.request_type.as_str()),
        ]);
        let body = json!({
            "partnerCode": self.config.partner_code,
            "requestId": order.request_id,
            "amount": amount,
            "orderId": order.order_id,
            "orderInfo": order.description,
            "redirectUrl": self.config.redirect_url,
            "ipnUrl": self.config.ipn_url,
            "requestType": self.config.request_type,
            "extraData": order.extra_data,
            "lang": "vi",
            "signature": self.sign(&raw)?,
        });

        let reply = self
            .transport
            .post_json(&self.config.create_url, &Self::headers(), &body)
            .await
            .map_err(|e| unavailable(ProviderKind::MoMo, e))?;

        match Self::result_code(&reply) {
            Some(RESULT_SUCCESS) => Ok(CreateReply::Created {
                checkout_url: reply
                    .get("payUrl")
                    .or_else(|| reply.get("deeplink"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                qr_code: reply.get("qrCodeUrl").and_then(Value::as_str).map(str::to_string),
                raw: reply,
            }),
            code => Ok(CreateReply::Rejected {
                code: code.map(|c| c.to_string()).unwrap_or_default(),
                message: Self::message(&reply),
                raw: reply,
            }),
        }
    }

    fn verify_callback(&self, payload: &Value) -> Result<CallbackNotice, PaymentError> {
        let provided = payload
            .get("signature")
            .and_then(Value::as_str)
            .ok_or(PaymentError::InvalidSignature)?;
        if !signature::verify(&self.config.secret_key, &self.ipn_raw(payload), provided) {
            return Err(PaymentError::InvalidSignature);
        }

        let order_id = payload
            .get("orderId")
            .and_then(Value::as_str)
            .ok_or_else(|| PaymentError::MalformedPayload("missing orderId".into()))?;
        let amount = json_decimal(payload.get("amount"))
            .ok_or_else(|| PaymentError::MalformedPayload("missing amount".into()))?;
        let code = Self::result_code(payload)
            .ok_or_else(|| PaymentError::MalformedPayload("missing resultCode".into()))?;

        Ok(CallbackNotice {
            order_id: order_id.to_string(),
            amount,
            success: code == RESULT_SUCCESS,
            result_code: code.to_string(),
            message: Self::message(payload),
            transaction_ref: Some(field_string(payload.get("transId"))).filter(|t| !t.is_empty()),
        })
    }

    async fn query(&self, payment: &Payment) -> Result<StatusReport, PaymentError> {
        let request_id = ulid::Ulid::new().to_string();
        let raw = canonical::<&str, &str>(&[
            ("accessKey", self.config.access_key.as_str()),
            ("orderId", payment.order_id.as_str()),
            ("partnerCode", self.config.partner_code.as_str()),
            ("requestId", request_id.as_str()),
        ]);
        let body = json!({
            "partnerCode": self.config.partner_code,
            "requestId": request_id,
            "orderId": payment.order_id,
            "lang": "vi",
            "signature": self.sign(&raw)?,
        });

        let reply = self
            .transport
            .post_json(&self.config.query_url, &Self::headers(), &body)
            .await
            .map_err(|e| unavailable(ProviderKind::MoMo, e))?;

        let code = Self::result_code(&reply)
            .ok_or_else(|| PaymentError::MalformedPayload("missing resultCode".into()))?;
        let status = match code {
            RESULT_SUCCESS => RemoteStatus::Paid,
            c if PENDING_CODES.contains(&c) => RemoteStatus::Pending,
            _ => RemoteStatus::Failed,
        };
        Ok(StatusReport {
            status,
            result_code: code.to_string(),
            transaction_ref: Some(field_string(reply.get("transId")))
                .filter(|t| !t.is_empty() && t != "0"),
            amount: json_decimal(reply.get("amount")),
            raw: reply,
        })
    }

    async fn refund(
        &self,
        payment: &Payment,
        amount: Decimal,
    ) -> Result<RefundReply, PaymentError> {
        let amount = whole_amount(amount)?;
        let trans_id = payment.transaction_ref.clone().unwrap_or_default();
        let (order_id, request_id) = self.new_order_ids();
        let description = format!("Refund {}", payment.order_id);
        let raw = canonical::<&str, &str>(&[
            ("accessKey", self.config.access_key.as_str()),
            ("amount", amount.to_string().as_str()),
            ("description", description.as_str()),
            ("orderId", order_id.as_str()),
            ("partnerCode", self.config.partner_code.as_str()),
            ("requestId", request_id.as_str()),
            ("transId", trans_id.as_str()),
        ]);
        let trans_id_value = trans_id
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(trans_id.clone()));
        let body = json!({
            "partnerCode": self.config.partner_code,
            "orderId": order_id,
            "requestId": request_id,
            "amount": amount,
            "transId": trans_id_value,
            "lang": "vi",
            "description": description,
            "signature": self.sign(&raw)?,
        });

        let reply = self
            .transport
            .post_json(&self.config.refund_url, &Self::headers(), &body)
            .await
            .map_err(|e| unavailable(ProviderKind::MoMo, e))?;

        match Self::result_code(&reply) {
            Some(RESULT_SUCCESS) => Ok(RefundReply::Refunded {
                refund_ref: Some(field_string(reply.get("transId"))).filter(|t| !t.is_empty()),
                raw: reply,
            }),
            code => Ok(RefundReply::Rejected {
                code: code.map(|c| c.to_string()).unwrap_or_default(),
                message: Self::message(&reply),
                raw: reply,
            }),
        }
    }

    /// 204 with no body when accepted; 400 with a JSON reason otherwise
    fn render_ack(&self, ack: &CallbackAck) -> (u16, Value) {
        if ack.accepted {
            (204, Value::Null)
        } else {
            (
                400,
                json!({
                    "partnerCode": self.config.partner_code,
                    "orderId": ack.order_id,
                    "resultCode": 1,
                    "message": ack.message,
                }),
            )
        }
    }
}
