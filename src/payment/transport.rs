//! JSON-over-HTTP transport to the gateways
//!
//! Providers never touch `reqwest` directly so tests can script replies.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Network(String),

    #[error("Failed to parse response: {0}")]
    Decode(String),
}

pub type Headers = Vec<(&'static str, String)>;

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        headers: &Headers,
        body: &Value,
    ) -> Result<Value, TransportError>;

    async fn get_json(&self, url: &str, headers: &Headers) -> Result<Value, TransportError>;
}

/// Production transport
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// `timeout` is a socket-level backstop; callers bound each call tighter
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn decode(response: reqwest::Response) -> Result<Value, TransportError> {
        // Gateways report business failures with 4xx and a JSON body; keep it
        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(
        &self,
        url: &str,
        headers: &Headers,
        body: &Value,
    ) -> Result<Value, TransportError> {
        let mut request = self.client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Self::decode(response).await
    }

    async fn get_json(&self, url: &str, headers: &Headers) -> Result<Value, TransportError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Self::decode(response).await
    }
}

/// Recorded outbound call
#[derive(Debug, Clone, PartialEq)]
pub struct SentRequest {
    pub method: &'static str,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Value>,
}

/// Scripted transport: replies are served in order, every request is kept.
#[derive(Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<Result<Value, TransportError>>>,
    sent: Mutex<Vec<SentRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: Value) -> &Self {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(reply));
        self
    }

    pub fn push_error(&self, error: TransportError) -> &Self {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(error));
        self
    }

    /// Hold every reply back by `delay`, to exercise caller timeouts
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    async fn reply(&self, request: SentRequest) -> Result<Value, TransportError> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        let delay = *self.delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("no scripted reply".into())))
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn post_json(
        &self,
        url: &str,
        headers: &Headers,
        body: &Value,
    ) -> Result<Value, TransportError> {
        self.reply(SentRequest {
            method: "POST",
            url: url.to_string(),
            headers: headers.clone(),
            body: Some(body.clone()),
        })
        .await
    }

    async fn get_json(&self, url: &str, headers: &Headers) -> Result<Value, TransportError> {
        self.reply(SentRequest {
            method: "GET",
            url: url.to_string(),
            headers: headers.clone(),
            body: None,
        })
        .await
    }
}
