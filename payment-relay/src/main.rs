//! payment-relay entry point.

mod cli;

use anyhow::{bail, Context};
use clap::Parser;
use cli::{Cli, Command};
use payment_relay::http_server;
use payment_relay::signature::TokenAuthenticator;
use payment_relay::Relay;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(cli.log_json.then(|| fmt::layer().json()))
        .with((!cli.log_json).then(fmt::layer))
        .with(filter)
        .init();

    if let Some(Command::Token { bucket }) = &cli.command {
        let Some(secret) = cli.poll_secret.as_deref() else {
            bail!("a poll secret (--poll-secret / SHARED_SECRET) is required");
        };
        let auth = TokenAuthenticator::new(secret, bucket.unwrap_or(cli.token_bucket));
        println!("{}", auth.current_token());
        return Ok(());
    }

    info!("payment-relay v{}", env!("CARGO_PKG_VERSION"));

    let relay = Arc::new(Relay::new(cli.into_config()).await?);
    let listener = TcpListener::bind(relay.config().listen)
        .await
        .with_context(|| format!("failed to bind {}", relay.config().listen))?;

    http_server::serve(listener, relay, shutdown_signal()).await?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
