//! Telemetry initialisation for the tcp-relay binary.
//!
//! Structured JSON logs to stdout; there is no exporter. The caller passes
//! [`Config::effective_log_level`](crate::config::Config::effective_log_level),
//! so the `DEBUG` flag promotes the level to `debug` regardless of `LOG_LEVEL`.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Initialise the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `log_level` when it is set.
///
/// # Errors
///
/// Returns an error if the subscriber has already been set.
pub fn init(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise tcp-relay tracing subscriber: {e}"))
}
