use crate::config::ProcessorConfig;
use crate::error::VerifyError;
use crate::types::{VerificationResult, SUCCESS_STATUS};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{StatusCode, Url};
use serde_json::Value;
use tracing::debug;

/// Independent confirmation of a transaction's state.
#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    async fn verify(&self, tx_ref: &str) -> Result<VerificationResult, VerifyError>;
}

/// Verifies against the processor's `GET /verify-payment/{tx_ref}` endpoint.
pub struct ProcessorVerifier {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

impl ProcessorVerifier {
    pub fn new(client: reqwest::Client, config: &ProcessorConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
        }
    }

    /// `{base}/verify-payment/{tx_ref}` with `tx_ref` percent-encoded as one
    /// path segment.
    pub fn verify_url(&self, tx_ref: &str) -> Result<Url, VerifyError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| VerifyError::Transport(format!("invalid processor url: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| VerifyError::Transport("processor url cannot carry a path".into()))?
            .pop_if_empty()
            .extend(["verify-payment", tx_ref]);
        Ok(url)
    }
}

#[async_trait]
impl PaymentVerifier for ProcessorVerifier {
    async fn verify(&self, tx_ref: &str) -> Result<VerificationResult, VerifyError> {
        let url = self.verify_url(tx_ref)?;
        let resp = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .send()
            .await
            .map_err(|e| VerifyError::Transport(e.to_string()))?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(VerifyError::BadStatus(status.as_u16()));
        }

        // A body cut short by a timeout or reset is a transport failure.
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| VerifyError::Transport(e.to_string()))?;
        let body: Value = serde_json::from_slice(&bytes)
            .map_err(|e| VerifyError::NotSuccessful(format!("unreadable response: {e}")))?;
        debug!(tx_ref, "verification response received");

        check_verification(tx_ref, &body)
    }
}

/// Trust a verification response only when both the outer and nested status
/// are `success` and the nested `tx_ref` is the one that was asked for.
pub fn check_verification(tx_ref: &str, body: &Value) -> Result<VerificationResult, VerifyError> {
    let outer = body.get("status").and_then(Value::as_str).unwrap_or_default();
    if outer != SUCCESS_STATUS {
        return Err(VerifyError::NotSuccessful(format!("status {outer:?}")));
    }

    let data = match body.get("data") {
        Some(d) if d.is_object() => d,
        _ => return Err(VerifyError::NotSuccessful("missing data".into())),
    };

    let inner = data.get("status").and_then(Value::as_str).unwrap_or_default();
    if inner != SUCCESS_STATUS {
        return Err(VerifyError::NotSuccessful(format!("data.status {inner:?}")));
    }

    let returned = match data.get("tx_ref") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    if returned != tx_ref {
        return Err(VerifyError::RefMismatch {
            expected: tx_ref.to_string(),
            actual: returned,
        });
    }

    Ok(VerificationResult {
        status: inner.to_string(),
        tx_ref: returned,
        data: data.clone(),
    })
}
