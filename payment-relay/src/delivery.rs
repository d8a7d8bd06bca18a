use crate::config::{ConsumerConfig, DeliveryMode, RelayConfig};
use crate::error::{ConfigError, DeliveryError, RelayError};
use crate::signature::hmac_sha256_hex;
use crate::store::{Enqueued, PendingStore};
use crate::types::{ForwardEnvelope, PendingPaymentRecord};
use async_trait::async_trait;
use base64::Engine as _;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Consumer acknowledged a push.
    Delivered,
    /// Written to the pending queue.
    Queued { replaced: bool },
    /// Queue already holds an acknowledgement for this payment.
    AlreadyProcessed,
}

/// Hands a verified payment to the downstream consumer.
#[async_trait]
pub trait DeliveryStrategy: Send + Sync {
    async fn deliver(&self, record: &PendingPaymentRecord) -> Result<DeliveryOutcome, RelayError>;
    fn mode(&self) -> DeliveryMode;
}

pub fn create_strategy(
    config: &RelayConfig,
    client: reqwest::Client,
    store: Arc<PendingStore>,
) -> Result<Box<dyn DeliveryStrategy>, ConfigError> {
    let consumer = || {
        config
            .consumer
            .clone()
            .ok_or(ConfigError::Required("consumer url and secret", "delivering by push"))
    };
    let strategy: Box<dyn DeliveryStrategy> = match config.delivery_mode {
        DeliveryMode::Queue => Box::new(QueueDelivery::new(store)),
        DeliveryMode::Push => Box::new(PushDelivery::new(client, consumer()?, PushMethod::Post)),
        DeliveryMode::PushGet => Box::new(PushDelivery::new(client, consumer()?, PushMethod::Get)),
    };
    Ok(strategy)
}

// ─── Queue ───────────────────────────────────────────────────────────────────

pub struct QueueDelivery {
    store: Arc<PendingStore>,
}

impl QueueDelivery {
    pub fn new(store: Arc<PendingStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DeliveryStrategy for QueueDelivery {
    async fn deliver(&self, record: &PendingPaymentRecord) -> Result<DeliveryOutcome, RelayError> {
        match self.store.enqueue(record).await? {
            Enqueued::Stored { replaced } => {
                info!(tx_ref = %record.tx_ref, replaced, "stored pending payment");
                Ok(DeliveryOutcome::Queued { replaced })
            }
            Enqueued::AlreadyProcessed => {
                info!(tx_ref = %record.tx_ref, "payment already processed, not re-queued");
                Ok(DeliveryOutcome::AlreadyProcessed)
            }
        }
    }

    fn mode(&self) -> DeliveryMode {
        DeliveryMode::Queue
    }
}

// ─── Push ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMethod {
    /// JSON body, signature in `X-Webhook-Signature`.
    Post,
    /// `?payload=<base64 json>&signature=<hex>` for hosts that block POST bodies.
    Get,
}

/// One outbound call per webhook. No local retry: a failure surfaces as
/// HTTP 500 so the processor redelivers the webhook.
pub struct PushDelivery {
    client: reqwest::Client,
    consumer: ConsumerConfig,
    method: PushMethod,
}

impl PushDelivery {
    pub fn new(client: reqwest::Client, consumer: ConsumerConfig, method: PushMethod) -> Self {
        Self {
            client,
            consumer,
            method,
        }
    }

    /// Envelope body plus its signature under the consumer secret.
    pub fn sign(&self, envelope: &ForwardEnvelope) -> Result<(String, String), DeliveryError> {
        let body = envelope
            .canonical_json()
            .map_err(|e| DeliveryError::Encode(e.to_string()))?;
        let signature = hmac_sha256_hex(&self.consumer.secret, body.as_bytes());
        Ok((body, signature))
    }

    async fn send(&self, body: String, signature: String) -> Result<reqwest::Response, DeliveryError> {
        let request = match self.method {
            PushMethod::Post => self
                .client
                .post(&self.consumer.url)
                .header(CONTENT_TYPE, "application/json")
                .header(SIGNATURE_HEADER, signature)
                .body(body),
            PushMethod::Get => {
                let payload = base64::engine::general_purpose::STANDARD.encode(body.as_bytes());
                self.client
                    .get(&self.consumer.url)
                    .query(&[("payload", payload), ("signature", signature)])
            }
        };
        request
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))
    }
}

#[async_trait]
impl DeliveryStrategy for PushDelivery {
    async fn deliver(&self, record: &PendingPaymentRecord) -> Result<DeliveryOutcome, RelayError> {
        let envelope = ForwardEnvelope {
            tx_ref: record.tx_ref.clone(),
            verification_data: record.verification_data.clone(),
            timestamp: Utc::now().timestamp(),
        };
        let (body, signature) = self.sign(&envelope)?;

        let resp = self.send(body, signature).await?;
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let text = resp
            .text()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        check_consumer_response(status, &content_type, &text)?;
        info!(tx_ref = %record.tx_ref, method = ?self.method, "payment delivered");
        Ok(DeliveryOutcome::Delivered)
    }

    fn mode(&self) -> DeliveryMode {
        match self.method {
            PushMethod::Post => DeliveryMode::Push,
            PushMethod::Get => DeliveryMode::PushGet,
        }
    }
}

/// Free hosts in front of the consumer sometimes answer with a JS/cookie
/// challenge page instead of running the handler.
pub fn looks_like_html(content_type: &str, body: &str) -> bool {
    if content_type.to_ascii_lowercase().contains("text/html") {
        return true;
    }
    let head: String = body.trim_start().chars().take(512).collect::<String>().to_ascii_lowercase();
    head.starts_with("<!doctype") || head.contains("<html") || head.contains("<script")
}

/// Success is HTTP 200 with a JSON body carrying `"success": true`.
pub fn check_consumer_response(
    status: StatusCode,
    content_type: &str,
    body: &str,
) -> Result<(), DeliveryError> {
    if looks_like_html(content_type, body) {
        warn!(status = status.as_u16(), "consumer returned HTML instead of JSON");
        return Err(DeliveryError::Challenge);
    }
    if status != StatusCode::OK {
        return Err(DeliveryError::BadStatus(status.as_u16()));
    }
    let parsed: Value = serde_json::from_str(body)
        .map_err(|_| DeliveryError::Rejected("response is not JSON".into()))?;
    match parsed.get("success") {
        Some(Value::Bool(true)) => Ok(()),
        _ => {
            let reason = parsed
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("missing success flag");
            Err(DeliveryError::Rejected(reason.to_string()))
        }
    }
}
