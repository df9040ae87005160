//! omni-server - HTTP server for Omnicast
//!
//! Serves the OAuth connect routes, the scheduler webhook and the post and
//! account API.

use anyhow::Context;
use clap::Parser;
use libomnicast::http::{router, AppState};
use libomnicast::logging::{LogFormat, LoggingConfig};
use libomnicast::{Config, OmnicastService};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "omni-server")]
#[command(version)]
#[command(about = "HTTP server for OAuth account linking, publishing and scheduler webhooks")]
#[command(long_about = "\
omni-server - HTTP server for Omnicast

DESCRIPTION:
    omni-server links social accounts over OAuth, publishes posts to the
    linked accounts and receives the signed callbacks of the external
    scheduling queue.

    Requests are expected to come through a gateway that authenticates the
    user and forwards the owner id in the header named by
    server.owner_header (default: x-owner-id).

USAGE:
    # Serve with the default configuration
    omni-server

    # Serve on another address with JSON logs
    omni-server --bind 0.0.0.0:8080 --log-format json

SECRETS:
    OMNICAST_VAULT_KEY            - base64 AES-256 key for stored tokens
    OMNICAST_QUEUE_TOKEN          - bearer token of the scheduling queue
    OMNICAST_SIGNING_KEY_CURRENT  - current webhook signing key
    OMNICAST_SIGNING_KEY_NEXT     - next webhook signing key

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (in-flight requests finish)
")]
struct Cli {
    /// Configuration file (default: $OMNICAST_CONFIG or ~/.config/omnicast/config.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides server.bind)
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Log output format
    #[arg(long, value_name = "FORMAT", env = "OMNICAST_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    LoggingConfig::new(cli.log_format, "info".to_string(), cli.verbose).init();

    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;
    config.apply_env_overrides();

    let bind = cli.bind.unwrap_or_else(|| config.server.bind.clone());
    let service = OmnicastService::from_config(config)
        .await
        .context("Failed to start service")?;
    let app = router(AppState::new(service));

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("omni-server listening on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("omni-server stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use futures::stream::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    match Signals::new([SIGINT, SIGTERM]) {
        Ok(mut signals) => {
            if let Some(sig) = signals.next().await {
                info!(signal = sig, "Received shutdown signal, shutting down...");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Signal setup failed, falling back to Ctrl+C only");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    info!("Received Ctrl+C, shutting down...");
}
