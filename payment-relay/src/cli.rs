//! Command-line interface definition.

use clap::{Parser, Subcommand};
use payment_relay::config::{ConsumerConfig, ProcessorConfig, DEFAULT_PROCESSOR_BASE_URL};
use payment_relay::signature::TokenBucket;
use payment_relay::{DeliveryMode, RelayConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Relays payment-processor webhooks to a consumer that cannot receive them.
#[derive(Parser, Debug)]
#[command(name = "payment-relay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8080", env = "RELAY_LISTEN")]
    pub listen: SocketAddr,

    /// Directory holding the pending and processed queues.
    #[arg(long, default_value = "./data", env = "RELAY_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Secret shared with the processor for webhook signatures.
    #[arg(long, env = "WEBHOOK_SECRET", hide_env_values = true)]
    pub webhook_secret: Option<String>,

    /// Request header carrying the webhook signature (case-insensitive).
    #[arg(long, default_value = "Signature", env = "RELAY_SIGNATURE_HEADER")]
    pub signature_header: String,

    /// Re-confirm each payment with the processor's verification API.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "RELAY_VERIFY")]
    pub verify: bool,

    /// Processor API key used for verification calls.
    #[arg(long, env = "PROCESSOR_SECRET_KEY", hide_env_values = true)]
    pub processor_secret_key: Option<String>,

    /// Processor API base URL.
    #[arg(long, default_value = DEFAULT_PROCESSOR_BASE_URL, env = "PROCESSOR_BASE_URL")]
    pub processor_base_url: String,

    /// How verified payments reach the consumer.
    #[arg(long, value_enum, default_value = "queue", env = "RELAY_DELIVERY_MODE")]
    pub delivery_mode: DeliveryMode,

    /// Consumer endpoint for push delivery.
    #[arg(long, env = "CONSUMER_URL")]
    pub consumer_url: Option<String>,

    /// Secret shared with the consumer for signing pushed envelopes.
    #[arg(long, env = "CONSUMER_SECRET", hide_env_values = true)]
    pub consumer_secret: Option<String>,

    /// Secret shared with the poller; enables get_pending and mark_done.
    #[arg(long, env = "SHARED_SECRET", hide_env_values = true)]
    pub poll_secret: Option<String>,

    /// Validity window of poll tokens.
    #[arg(long, value_enum, default_value = "hour", env = "RELAY_TOKEN_BUCKET")]
    pub token_bucket: TokenBucket,

    /// Connect timeout for outbound calls, in seconds.
    #[arg(long, default_value_t = 10, env = "RELAY_CONNECT_TIMEOUT_SECS")]
    pub connect_timeout_secs: u64,

    /// Total timeout for outbound calls, in seconds (15 to 30).
    #[arg(long, default_value_t = 30, env = "RELAY_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: u64,

    /// Log level.
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, env = "RELAY_LOG_JSON")]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay (default).
    Serve,
    /// Print the poll token valid right now.
    Token {
        /// Override the configured token bucket.
        #[arg(long, value_enum)]
        bucket: Option<TokenBucket>,
    },
}

impl Cli {
    /// Convert CLI arguments into a RelayConfig. Validation happens when the
    /// relay is built.
    pub fn into_config(self) -> RelayConfig {
        let processor = self.processor_secret_key.map(|secret_key| ProcessorConfig {
            base_url: self.processor_base_url,
            secret_key,
        });
        let consumer = match (self.consumer_url, self.consumer_secret) {
            (Some(url), Some(secret)) => Some(ConsumerConfig { url, secret }),
            _ => None,
        };

        RelayConfig {
            listen: self.listen,
            data_dir: self.data_dir,
            webhook_secret: self.webhook_secret.unwrap_or_default(),
            signature_header: self.signature_header,
            verify: self.verify,
            processor,
            delivery_mode: self.delivery_mode,
            consumer,
            poll_secret: self.poll_secret,
            token_bucket: self.token_bucket,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: RelayConfig::clamp_request_timeout(self.request_timeout_secs),
        }
    }
}
