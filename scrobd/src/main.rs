//! Scrobble daemon (scrobd) - Main entry point
//!
//! Loads configuration, builds the daemon shell and runs until a shutdown
//! signal arrives. Vendor source and client adapters are wired in by
//! integration code through the library's registration API; without any
//! the daemon idles and reports so.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scrobd::config::{resolve_config_path, DaemonConfig};
use scrobd::Daemon;

/// Command-line arguments for scrobd
#[derive(Parser, Debug)]
#[command(name = "scrobd")]
#[command(about = "Multi-source scrobble delivery daemon")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "SCROBD_CONFIG")]
    config: Option<PathBuf>,

    /// Tracing filter, e.g. "scrobd=debug" (overrides RUST_LOG)
    #[arg(long, env = "SCROBD_LOG")]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = match &args.log {
        Some(filter) => tracing_subscriber::EnvFilter::try_new(filter)
            .context("invalid log filter")?,
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "scrobd=info,scrobd_common=info".into()),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = resolve_config_path(args.config.clone());
    let config = if config_path.exists() {
        info!("Loading configuration from {}", config_path.display());
        DaemonConfig::load(&config_path).context("Failed to load configuration")?
    } else {
        info!(
            "No configuration file at {}, using defaults",
            config_path.display()
        );
        DaemonConfig::default()
    };

    let mut daemon = Daemon::new(&config).context("Failed to build daemon")?;
    daemon.start().await;

    if daemon.sources().is_empty() && daemon.clients().is_empty() {
        warn!(
            "no source or client adapters registered; the daemon will idle \
             (adapters are wired through the scrobd library API)"
        );
    }

    shutdown_signal().await;

    daemon.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
