//! Relay configuration, built once at startup and shared read-only.

use crate::error::ConfigError;
use crate::signature::TokenBucket;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PROCESSOR_BASE_URL: &str = "https://api.paychangu.com";
pub const DEFAULT_SIGNATURE_HEADER: &str = "Signature";

const MIN_REQUEST_TIMEOUT_SECS: u64 = 15;
const MAX_REQUEST_TIMEOUT_SECS: u64 = 30;

/// How a verified payment reaches the downstream consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    /// Persist to the pending queue; the consumer polls.
    #[default]
    Queue,
    /// POST a signed JSON envelope to the consumer.
    Push,
    /// GET with the envelope and signature as query parameters.
    PushGet,
}

impl DeliveryMode {
    pub fn is_push(&self) -> bool {
        matches!(self, DeliveryMode::Push | DeliveryMode::PushGet)
    }
}

/// Relay↔consumer push target.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub url: String,
    pub secret: String,
}

/// Processor verification API access.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub base_url: String,
    pub secret_key: String,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    /// Holds `pending/` and `processed/`.
    pub data_dir: PathBuf,
    /// Processor↔relay secret for webhook signatures.
    pub webhook_secret: String,
    pub signature_header: String,
    /// Re-confirm each payment with the processor before accepting it.
    pub verify: bool,
    pub processor: Option<ProcessorConfig>,
    pub delivery_mode: DeliveryMode,
    pub consumer: Option<ConsumerConfig>,
    /// Relay↔poller secret. Poll/ack endpoints are disabled without it.
    pub poll_secret: Option<String>,
    pub token_bucket: TokenBucket,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl RelayConfig {
    /// Minimal queue-mode configuration; mostly useful for tests and embedding.
    pub fn new(data_dir: impl Into<PathBuf>, webhook_secret: impl Into<String>) -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            data_dir: data_dir.into(),
            webhook_secret: webhook_secret.into(),
            signature_header: DEFAULT_SIGNATURE_HEADER.to_string(),
            verify: false,
            processor: None,
            delivery_mode: DeliveryMode::Queue,
            consumer: None,
            poll_secret: None,
            token_bucket: TokenBucket::Hour,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(MAX_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.data_dir.join("pending")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.data_dir.join("processed")
    }

    /// Keep the total outbound timeout inside the 15..=30s window.
    pub fn clamp_request_timeout(secs: u64) -> Duration {
        Duration::from_secs(secs.clamp(MIN_REQUEST_TIMEOUT_SECS, MAX_REQUEST_TIMEOUT_SECS))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.webhook_secret.trim().is_empty() {
            return Err(ConfigError::Empty("webhook secret"));
        }
        if self.signature_header.trim().is_empty() {
            return Err(ConfigError::Empty("signature header"));
        }
        if self.verify {
            match &self.processor {
                None => return Err(ConfigError::Required("processor secret key", "verify is enabled")),
                Some(p) if p.secret_key.trim().is_empty() => {
                    return Err(ConfigError::Empty("processor secret key"))
                }
                Some(p) if p.base_url.trim().is_empty() => {
                    return Err(ConfigError::Empty("processor base url"))
                }
                Some(_) => {}
            }
        }
        if self.delivery_mode.is_push() {
            match &self.consumer {
                None => return Err(ConfigError::Required("consumer url and secret", "delivering by push")),
                Some(c) if c.url.trim().is_empty() => return Err(ConfigError::Empty("consumer url")),
                Some(c) if c.secret.trim().is_empty() => {
                    return Err(ConfigError::Empty("consumer secret"))
                }
                Some(_) => {}
            }
        }
        if matches!(&self.poll_secret, Some(s) if s.trim().is_empty()) {
            return Err(ConfigError::Empty("poll secret"));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Zero("connect timeout"));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Zero("request timeout"));
        }
        Ok(())
    }

    /// Shared outbound client with bounded connect and total timeouts.
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))
    }
}
