use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel used when a notification carries no `status` field.
pub const UNKNOWN_STATUS: &str = "unknown";

/// The only status value that moves a payment through the pipeline.
pub const SUCCESS_STATUS: &str = "success";

/// Raw inbound request: body bytes plus the signature header value, if any.
#[derive(Debug, Clone)]
pub struct WebhookEnvelope {
    pub body: Vec<u8>,
    pub signature: Option<String>,
}

/// A decoded processor notification.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentNotification {
    pub tx_ref: String,
    pub status: String,
    /// The full decoded body, including processor-specific fields.
    pub raw: Value,
}

impl PaymentNotification {
    pub fn is_successful(&self) -> bool {
        self.status == SUCCESS_STATUS
    }
}

/// Transaction state as confirmed by the processor's own API.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationResult {
    pub status: String,
    pub tx_ref: String,
    /// The processor's `data` object (amount, currency, customer, ...).
    pub data: Value,
}

/// One verified payment awaiting pickup, persisted as `<tx_ref>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPaymentRecord {
    pub tx_ref: String,
    pub verification_data: Value,
    /// Unix seconds.
    pub verified_at: i64,
    pub processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<i64>,
}

impl PendingPaymentRecord {
    pub fn new(tx_ref: impl Into<String>, verification_data: Value, verified_at: i64) -> Self {
        Self {
            tx_ref: tx_ref.into(),
            verification_data,
            verified_at,
            processed: false,
            processed_at: None,
        }
    }

    pub fn view(&self) -> PendingPaymentView {
        PendingPaymentView {
            tx_ref: self.tx_ref.clone(),
            data: self.verification_data.clone(),
            verified_at: self.verified_at,
        }
    }
}

/// Shape of a single entry in the `get_pending` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPaymentView {
    pub tx_ref: String,
    pub data: Value,
    pub verified_at: i64,
}

/// Body of the `get_pending` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPayments {
    pub payments: Vec<PendingPaymentView>,
    pub count: usize,
}

/// Payload pushed to the downstream consumer.
///
/// Field order is fixed, and `serde_json` maps keep keys sorted, so the
/// serialized form is canonical and safe to sign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardEnvelope {
    pub tx_ref: String,
    pub verification_data: Value,
    pub timestamp: i64,
}

impl ForwardEnvelope {
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
