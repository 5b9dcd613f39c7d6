//! `tcp-relay` — binary entry point.
//!
//! Startup sequence:
//! 1. Parse the command line and load [`Config`] from the environment.
//! 2. Initialise structured JSON logging.
//! 3. Bind the listener and accept until Ctrl-C.
//! 4. Close every live bridge and report the counters.

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tcp_relay::{telemetry, Cli, Config, ConnectionRegistry, Listener, RelayStats};

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cli = Cli::parse();
    let cfg = Config::load(&cli).map_err(|e| {
        eprintln!("ERROR: tcp-relay configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init(cfg.effective_log_level())?;
    info!(version = env!("CARGO_PKG_VERSION"), debug = cfg.debug, "tcp-relay starting");

    // -----------------------------------------------------------------------
    // 3. Listener
    // -----------------------------------------------------------------------
    let registry = ConnectionRegistry::new();
    let stats = RelayStats::new();
    let listener = Listener::bind(&cfg, registry.clone(), stats.clone())
        .await
        .context("failed to start listener")?;

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(shutdown.clone()));

    listener.run(shutdown.clone()).await;
    // Under the halt policy the loop can end early; existing bridges keep
    // relaying until the signal arrives.
    shutdown.cancelled().await;

    // -----------------------------------------------------------------------
    // 4. Shutdown
    // -----------------------------------------------------------------------
    let closed = registry.close_all().await;
    let snapshot = stats.snapshot(registry.len());
    let stats_json = serde_json::to_string(&snapshot)?;
    info!(closed, stats = %stats_json, "tcp-relay stopped");
    Ok(())
}

async fn cancel_on_ctrl_c(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("shutdown signal received");
            shutdown.cancel();
        }
        Err(e) => warn!(error = %e, "cannot listen for shutdown signal"),
    }
}
