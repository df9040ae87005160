//! omni-sweep - Background daemon for scheduled posts
//!
//! Publishes scheduled posts whose time has come. Runs next to the external
//! queue as a safety net, or on its own when no queue is configured.

use clap::Parser;
use libomnicast::logging::{LogFormat, LoggingConfig};
use libomnicast::{Config, OmnicastError, OmnicastService, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "omni-sweep")]
#[command(version)]
#[command(about = "Background daemon that publishes due scheduled posts")]
#[command(long_about = "\
omni-sweep - Background daemon that publishes due scheduled posts

DESCRIPTION:
    omni-sweep polls the scheduled job table and publishes every pending
    job whose time has passed. Each job is claimed before it runs, so
    several sweepers (or a sweeper and the scheduler webhook) never publish
    the same post twice.

    A job that fails is put back as pending until it has used up
    scheduler.max_attempts; a job whose post was deleted fails at once.

USAGE:
    # Run in foreground (logs to stderr)
    omni-sweep

    # Run with custom poll interval
    omni-sweep --poll-interval 30

    # Process due jobs once and exit
    omni-sweep --once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current sweep)

CONFIGURATION:
    Configuration file: ~/.config/omnicast/config.toml (or $OMNICAST_CONFIG)

    [scheduler]
    sweep_interval_secs = 60  # seconds between sweeps
    max_attempts = 3          # attempts per job before it fails

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime or configuration error
    2 - Authentication error
    3 - Invalid input
")]
struct Cli {
    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    #[arg(help = "How often to check for due jobs (default: scheduler.sweep_interval_secs)")]
    poll_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,

    /// Log output format
    #[arg(long, value_name = "FORMAT", env = "OMNICAST_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Run once and exit
    #[arg(long)]
    #[arg(help = "Process due jobs once and exit")]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::new(cli.log_format, "info".to_string(), cli.verbose).init();

    if let Err(e) = run(cli).await {
        error!(error = %e, "omni-sweep failed");
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    config.apply_env_overrides();
    let poll_interval = cli
        .poll_interval
        .unwrap_or(config.scheduler.sweep_interval_secs)
        .max(1);

    let service = OmnicastService::from_config(config).await?;
    info!("omni-sweep daemon starting");

    if cli.once {
        sweep_once(&service).await?;
        info!("omni-sweep: processed due jobs once, exiting");
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;
    info!("Poll interval: {}s", poll_interval);

    run_daemon_loop(&service, poll_interval, shutdown).await;

    info!("omni-sweep daemon stopped");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| OmnicastError::Task(format!("Signal setup failed: {}", e)))?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!(signal = sig, "Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.store(true, Ordering::Relaxed);
        }
    });
    Ok(())
}

async fn run_daemon_loop(service: &OmnicastService, poll_interval: u64, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping daemon loop");
            break;
        }

        if let Err(e) = sweep_once(service).await {
            error!(error = %e, "Sweep failed");
        }

        // Sleep until next poll (check shutdown every second)
        for _ in 0..poll_interval {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }
}

async fn sweep_once(service: &OmnicastService) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let report = service.scheduler().sweep(now).await?;
    if report.claimed == 0 {
        tracing::debug!("No due jobs");
    }
    Ok(())
}
