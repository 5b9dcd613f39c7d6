//! Configuration loading and validation for the tcp-relay binary.
//!
//! Values come from environment variables first; the legacy positional
//! command line (`<local host> <local port> <forward host> <forward port>
//! <debug>`) overrides them when given.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use anyhow::{Context, Result};
use clap::Parser;
use common::RelayError;
use serde::Deserialize;

/// What the accept loop does after a failed accept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceptErrorPolicy {
    /// Log the error and keep accepting.
    #[default]
    Continue,
    /// Log the error and stop taking new connections.
    Halt,
}

/// Positional command line, all arguments optional.
#[derive(Debug, Default, Parser)]
#[command(name = "tcp-relay", version, about = "Transparent TCP relay")]
pub struct Cli {
    /// Local IPv4 address to listen on.
    pub local_host: Option<String>,
    /// Local port to listen on.
    pub local_port: Option<u16>,
    /// Upstream IPv4 address to forward to.
    pub forward_host: Option<String>,
    /// Upstream port to forward to.
    pub forward_port: Option<u16>,
    /// Verbose logging: 0 (false) or 1 (true).
    #[arg(value_parser = parse_flag)]
    pub debug: Option<bool>,
}

fn parse_flag(s: &str) -> Result<bool, String> {
    match s {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(format!("expected 0/1 or true/false, got {other:?}")),
    }
}

/// Validated relay configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// IPv4 address to accept client connections on.
    #[serde(default = "default_listen_host")]
    pub listen_host: String,

    /// Port to accept client connections on. **Required.** `0` picks an
    /// ephemeral port.
    pub listen_port: u16,

    /// IPv4 address of the upstream server. **Required.**
    pub upstream_host: String,

    /// Port of the upstream server. **Required.**
    pub upstream_port: u16,

    /// Forces `debug` level logging when set.
    #[serde(default)]
    pub debug: bool,

    /// Tracing log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Behaviour of the accept loop after a failed accept.
    #[serde(default)]
    pub accept_error_policy: AcceptErrorPolicy,
}

fn default_listen_host() -> String {
    "0.0.0.0".into()
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load configuration from the environment, apply command-line overrides
    /// and validate the result.
    pub fn load(cli: &Cli) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .set_override_option("listen_host", cli.local_host.clone())?
            .set_override_option("listen_port", cli.local_port.map(|p| p.to_string()))?
            .set_override_option("upstream_host", cli.forward_host.clone())?
            .set_override_option("upstream_port", cli.forward_port.map(|p| p.to_string()))?
            .set_override_option("debug", cli.debug.map(|d| d.to_string()))?
            .build()
            .context("failed to build tcp-relay configuration")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise tcp-relay configuration")?;

        c.validate()?;
        Ok(c)
    }

    fn validate(&self) -> Result<()> {
        parse_ipv4(&self.listen_host).context("LISTEN_HOST")?;
        parse_ipv4(&self.upstream_host).context("UPSTREAM_HOST")?;
        if self.upstream_port == 0 {
            anyhow::bail!("UPSTREAM_PORT must be non-zero");
        }
        if self.log_level.trim().is_empty() {
            anyhow::bail!("LOG_LEVEL must not be empty");
        }
        Ok(())
    }

    /// Socket address the listener binds.
    pub fn listen_addr(&self) -> Result<SocketAddr, RelayError> {
        let ip = parse_ipv4(&self.listen_host)?;
        Ok(SocketAddrV4::new(ip, self.listen_port).into())
    }

    /// Socket address every Bridge connects its outbound leg to.
    pub fn upstream_addr(&self) -> Result<SocketAddr, RelayError> {
        let ip = parse_ipv4(&self.upstream_host)?;
        Ok(SocketAddrV4::new(ip, self.upstream_port).into())
    }

    /// Level handed to the log subscriber; `debug` overrides `log_level`.
    pub fn effective_log_level(&self) -> &str {
        if self.debug {
            "debug"
        } else {
            &self.log_level
        }
    }
}

fn parse_ipv4(host: &str) -> Result<Ipv4Addr, RelayError> {
    host.trim()
        .parse()
        .map_err(|_| RelayError::InvalidAddress(host.to_owned()))
}
