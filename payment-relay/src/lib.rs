//! Payment webhook relay.
//!
//! Receives payment-status webhooks from the processor, authenticates them,
//! optionally re-verifies the transaction with the processor's API, and hands
//! the result to a downstream consumer, either by push or through a pending
//! queue the consumer polls and acknowledges.

pub mod config;
pub mod delivery;
pub mod error;
pub mod http_server;
pub mod payload;
pub mod pipeline;
pub mod signature;
pub mod store;
pub mod types;
pub mod verifier;

pub use config::{DeliveryMode, RelayConfig};
pub use error::{AuthError, DeliveryError, ParseError, QueueError, RelayError, VerifyError};
pub use pipeline::{Relay, WebhookAccepted};
pub use store::PendingStore;
