//! The webhook pipeline: authenticate, parse, optionally verify, deliver.
//!
//! Each call is evaluated on its own. It either completes every stage or
//! stops at the first failure, and the resulting status tells the processor
//! whether redelivering the webhook could help.

use crate::config::{DeliveryMode, RelayConfig};
use crate::delivery::{create_strategy, DeliveryOutcome, DeliveryStrategy};
use crate::error::{ParseError, RelayError, Result};
use crate::payload::parse_notification;
use crate::signature::{BodyAuthenticator, TokenAuthenticator};
use crate::store::{is_valid_tx_ref, PendingStore};
use crate::types::{PendingPaymentRecord, PendingPayments, WebhookEnvelope};
use crate::verifier::{PaymentVerifier, ProcessorVerifier};
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Successful end states of a webhook. All of them answer HTTP 200.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAccepted {
    /// Notification status was not `success`; acknowledged and dropped.
    NotSuccessful { tx_ref: String, status: String },
    Delivered { tx_ref: String, outcome: DeliveryOutcome },
}

impl WebhookAccepted {
    pub fn message(&self) -> &'static str {
        match self {
            WebhookAccepted::NotSuccessful { .. } => "Not successful",
            WebhookAccepted::Delivered {
                outcome: DeliveryOutcome::AlreadyProcessed,
                ..
            } => "Already processed",
            WebhookAccepted::Delivered { .. } => "Webhook processed",
        }
    }
}

pub struct Relay {
    config: Arc<RelayConfig>,
    authenticator: BodyAuthenticator,
    poll_auth: Option<TokenAuthenticator>,
    /// Time source for poll token buckets.
    clock: fn() -> DateTime<Utc>,
    verifier: Option<Arc<dyn PaymentVerifier>>,
    delivery: Box<dyn DeliveryStrategy>,
    store: Arc<PendingStore>,
}

impl Relay {
    /// Wire every stage from a validated configuration.
    pub async fn new(config: RelayConfig) -> anyhow::Result<Self> {
        config.validate().context("invalid relay configuration")?;

        let client = config.http_client()?;
        let store = Arc::new(
            PendingStore::open(config.pending_dir(), config.processed_dir())
                .await
                .with_context(|| format!("failed to open queue in {}", config.data_dir.display()))?,
        );

        let verifier: Option<Arc<dyn PaymentVerifier>> = match (&config.processor, config.verify) {
            (Some(processor), true) => Some(Arc::new(ProcessorVerifier::new(client.clone(), processor))),
            _ => None,
        };
        let delivery = create_strategy(&config, client, store.clone())?;

        info!(
            "relay initialized (verify={}, delivery={:?}, polling={})",
            verifier.is_some(),
            delivery.mode(),
            config.poll_secret.is_some()
        );

        Ok(Self {
            authenticator: BodyAuthenticator::new(config.webhook_secret.clone()),
            poll_auth: config
                .poll_secret
                .as_ref()
                .map(|s| TokenAuthenticator::new(s.clone(), config.token_bucket)),
            clock: Utc::now,
            verifier,
            delivery,
            store,
            config: Arc::new(config),
        })
    }

    /// Replace the verification stage; `None` disables it.
    pub fn with_verifier(mut self, verifier: Option<Arc<dyn PaymentVerifier>>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Replace the time source used to check poll tokens.
    pub fn with_poll_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<PendingStore> {
        &self.store
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.delivery.mode()
    }

    pub async fn handle_webhook(&self, envelope: WebhookEnvelope) -> Result<WebhookAccepted> {
        if let Err(e) = self
            .authenticator
            .authenticate(&envelope.body, envelope.signature.as_deref())
        {
            warn!("webhook rejected: {e}");
            return Err(e.into());
        }

        let notification = parse_notification(&envelope.body).inspect_err(|e| {
            warn!("suspicious webhook payload: {e}");
        })?;

        if !notification.is_successful() {
            info!(tx_ref = %notification.tx_ref, status = %notification.status, "ignoring non-success payment");
            return Ok(WebhookAccepted::NotSuccessful {
                tx_ref: notification.tx_ref,
                status: notification.status,
            });
        }

        // Queued payments are stored under their tx_ref.
        if self.delivery_mode() == DeliveryMode::Queue && !is_valid_tx_ref(&notification.tx_ref) {
            warn!(tx_ref = %notification.tx_ref, "tx_ref is not a valid queue key");
            return Err(ParseError::InvalidTxRef(notification.tx_ref).into());
        }

        let verification_data = match &self.verifier {
            Some(verifier) => {
                let verified = verifier.verify(&notification.tx_ref).await?;
                info!(tx_ref = %verified.tx_ref, "payment verified");
                verified.data
            }
            None => notification.raw.clone(),
        };

        let record = PendingPaymentRecord::new(
            notification.tx_ref.clone(),
            verification_data,
            Utc::now().timestamp(),
        );
        let outcome = self.delivery.deliver(&record).await?;

        Ok(WebhookAccepted::Delivered {
            tx_ref: notification.tx_ref,
            outcome,
        })
    }

    fn authorize_poll(&self, token: Option<&str>) -> Result<()> {
        let auth = self
            .poll_auth
            .as_ref()
            .ok_or(RelayError::NotFound("Unknown action"))?;
        auth.authenticate_at(token, (self.clock)()).map_err(|e| {
            warn!("poll request rejected: {e}");
            e.into()
        })
    }

    /// Unacknowledged payments for the poller.
    pub async fn pending(&self, token: Option<&str>) -> Result<PendingPayments> {
        self.authorize_poll(token)?;
        let payments: Vec<_> = self
            .store
            .list(true)
            .await?
            .iter()
            .map(PendingPaymentRecord::view)
            .collect();
        info!("sent {} pending payment(s)", payments.len());
        Ok(PendingPayments {
            count: payments.len(),
            payments,
        })
    }

    /// Acknowledge one payment on behalf of the poller.
    pub async fn mark_processed(&self, token: Option<&str>, tx_ref: Option<&str>) -> Result<()> {
        self.authorize_poll(token)?;
        let tx_ref = match tx_ref.map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => return Err(RelayError::BadRequest("Missing tx_ref")),
        };
        self.store.ack(tx_ref).await?;
        info!(tx_ref, "marked processed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthError, VerifyError};
    use crate::signature::hmac_sha256_hex;
    use crate::types::VerificationResult;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const SECRET: &str = "whsec";

    struct StubVerifier {
        result: std::result::Result<VerificationResult, VerifyError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PaymentVerifier for StubVerifier {
        async fn verify(&self, _tx_ref: &str) -> std::result::Result<VerificationResult, VerifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn stub(result: std::result::Result<VerificationResult, VerifyError>) -> Arc<StubVerifier> {
        Arc::new(StubVerifier {
            result,
            calls: AtomicUsize::new(0),
        })
    }

    async fn relay(dir: &TempDir) -> Relay {
        Relay::new(RelayConfig::new(dir.path(), SECRET)).await.unwrap()
    }

    fn signed(body: &str) -> WebhookEnvelope {
        WebhookEnvelope {
            body: body.as_bytes().to_vec(),
            signature: Some(hmac_sha256_hex(SECRET, body.as_bytes())),
        }
    }

    #[tokio::test]
    async fn non_success_status_stops_before_verification() {
        let dir = TempDir::new().unwrap();
        let verifier = stub(Err(VerifyError::Transport("unreachable".into())));
        let relay = relay(&dir).await.with_verifier(Some(verifier.clone()));

        let accepted = relay
            .handle_webhook(signed(r#"{"tx_ref":"TX1","status":"failed"}"#))
            .await
            .unwrap();

        assert_eq!(accepted.message(), "Not successful");
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
        assert!(relay.store().list(false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_signature_never_reaches_the_verifier() {
        let dir = TempDir::new().unwrap();
        let verifier = stub(Err(VerifyError::Transport("unreachable".into())));
        let relay = relay(&dir).await.with_verifier(Some(verifier.clone()));

        let mut envelope = signed(r#"{"tx_ref":"TX1","status":"success"}"#);
        envelope.signature = Some(hmac_sha256_hex("wrong", &envelope.body));

        let err = relay.handle_webhook(envelope).await.unwrap_err();
        assert!(matches!(err, RelayError::Auth(AuthError::InvalidSignature)));
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ref_mismatch_is_soft_and_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let relay = relay(&dir).await.with_verifier(Some(stub(Err(VerifyError::RefMismatch {
            expected: "TX1".into(),
            actual: "TX9".into(),
        }))));

        let err = relay
            .handle_webhook(signed(r#"{"tx_ref":"TX1","status":"success"}"#))
            .await
            .unwrap_err();
        assert_eq!(err.status_and_reason().0, axum::http::StatusCode::OK);
        assert!(relay.store().list(false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn verified_data_is_what_gets_queued() {
        let dir = TempDir::new().unwrap();
        let data = json!({"tx_ref": "TX1", "status": "success", "amount": 100});
        let relay = relay(&dir).await.with_verifier(Some(stub(Ok(VerificationResult {
            status: "success".into(),
            tx_ref: "TX1".into(),
            data: data.clone(),
        }))));

        relay
            .handle_webhook(signed(r#"{"tx_ref":"TX1","status":"success","amount":1}"#))
            .await
            .unwrap();

        let stored = relay.store().get("TX1").await.unwrap().unwrap();
        assert_eq!(stored.verification_data, data);
        assert!(!stored.processed);
    }

    #[tokio::test]
    async fn without_verifier_the_notification_is_queued() {
        let dir = TempDir::new().unwrap();
        let relay = relay(&dir).await;

        let accepted = relay
            .handle_webhook(signed(r#"{"tx_ref":"TX1","status":"success","amount":5}"#))
            .await
            .unwrap();
        assert_eq!(
            accepted,
            WebhookAccepted::Delivered {
                tx_ref: "TX1".into(),
                outcome: DeliveryOutcome::Queued { replaced: false }
            }
        );
        let stored = relay.store().get("TX1").await.unwrap().unwrap();
        assert_eq!(stored.verification_data["amount"], json!(5));
    }

    #[tokio::test]
    async fn polling_is_disabled_without_a_poll_secret() {
        let dir = TempDir::new().unwrap();
        let relay = relay(&dir).await;
        assert!(matches!(
            relay.pending(Some("anything")).await,
            Err(RelayError::NotFound(_))
        ));
    }

    fn half_past_ten() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 10, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn queue_mode_refuses_unsafe_tx_ref_before_verifying() {
        let dir = TempDir::new().unwrap();
        let verifier = stub(Err(VerifyError::Transport("unreachable".into())));
        let relay = relay(&dir).await.with_verifier(Some(verifier.clone()));
        assert_eq!(relay.delivery_mode(), DeliveryMode::Queue);

        let err = relay
            .handle_webhook(signed(r#"{"tx_ref":"../escape","status":"success"}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Parse(ParseError::InvalidTxRef(_))));
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn poll_token_follows_the_relay_clock() {
        let dir = TempDir::new().unwrap();
        let mut config = RelayConfig::new(dir.path(), SECRET);
        config.poll_secret = Some("shared".into());
        let relay = Relay::new(config).await.unwrap().with_poll_clock(half_past_ten);
        let auth = TokenAuthenticator::new("shared", relay.config().token_bucket);

        let current = auth.token_at(half_past_ten());
        assert_eq!(relay.pending(Some(&current)).await.unwrap().count, 0);

        let last_hour = auth.token_at(Utc.with_ymd_and_hms(2024, 3, 9, 9, 59, 59).unwrap());
        assert!(matches!(
            relay.pending(Some(&last_hour)).await,
            Err(RelayError::Auth(AuthError::InvalidToken))
        ));
    }

    #[tokio::test]
    async fn mark_processed_requires_tx_ref() {
        let dir = TempDir::new().unwrap();
        let mut config = RelayConfig::new(dir.path(), SECRET);
        config.poll_secret = Some("shared".into());
        let relay = Relay::new(config).await.unwrap().with_poll_clock(half_past_ten);
        let token =
            TokenAuthenticator::new("shared", relay.config().token_bucket).token_at(half_past_ten());

        assert!(matches!(
            relay.mark_processed(Some(&token), Some("  ")).await,
            Err(RelayError::BadRequest(_))
        ));
        assert!(matches!(
            relay.mark_processed(Some("bad"), Some("TX1")).await,
            Err(RelayError::Auth(AuthError::InvalidToken))
        ));
    }
}
