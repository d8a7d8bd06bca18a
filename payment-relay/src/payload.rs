use crate::error::ParseError;
use crate::types::{PaymentNotification, UNKNOWN_STATUS};
use serde_json::Value;
use tracing::info;

/// Decode and structurally validate a webhook body.
///
/// Every notification that parses is written to the `audit` log target
/// before any decision is taken on it.
pub fn parse_notification(body: &[u8]) -> Result<PaymentNotification, ParseError> {
    let raw: Value =
        serde_json::from_slice(body).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    if !raw.is_object() {
        return Err(ParseError::InvalidJson("expected a JSON object".into()));
    }

    let tx_ref = match raw.get("tx_ref") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(ParseError::MissingField("tx_ref")),
    };

    let status = raw
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or(UNKNOWN_STATUS)
        .to_string();

    info!(target: "audit", tx_ref = %tx_ref, status = %status, "webhook received");

    Ok(PaymentNotification {
        tx_ref,
        status,
        raw,
    })
}
