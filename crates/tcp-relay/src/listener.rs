//! Accept loop: listen on the local address and bridge each client to the
//! upstream server.
//!
//! For each accepted connection the listener:
//! 1. Wraps the socket in a new [`Bridge`] and registers it.
//! 2. Spawns the bridge's upstream connect.
//! 3. Goes straight back to accepting; in-flight bridges never throttle intake.
//!
//! A failed accept either stops intake or, after [`ACCEPT_RETRY_DELAY`], tries
//! again, depending on [`AcceptErrorPolicy`].

use std::{io, net::SocketAddr, ops::ControlFlow, sync::Arc, time::Duration};

use common::RelayError;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    bridge::Bridge,
    config::{AcceptErrorPolicy, Config},
    registry::ConnectionRegistry,
    stats::RelayStats,
};

/// Pause before accepting again after a failed accept. Errors such as EMFILE
/// repeat until a descriptor frees up.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
    upstream: SocketAddr,
    policy: AcceptErrorPolicy,
    registry: ConnectionRegistry,
    stats: RelayStats,
}

impl Listener {
    /// Bind the configured listen address.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidAddress`] for a malformed host and
    /// [`RelayError::Bind`] if the address cannot be bound. Both are fatal.
    pub async fn bind(
        cfg: &Config,
        registry: ConnectionRegistry,
        stats: RelayStats,
    ) -> Result<Self, RelayError> {
        let addr = cfg.listen_addr()?;
        let upstream = cfg.upstream_addr()?;
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })?;
        let local_addr = inner
            .local_addr()
            .map_err(|source| RelayError::Bind { addr, source })?;

        info!(addr = %local_addr, %upstream, "tcp-relay listening");

        Ok(Self {
            inner,
            local_addr,
            upstream,
            policy: cfg.accept_error_policy,
            registry,
            stats,
        })
    }

    /// Address actually bound (resolves port `0`).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept until `shutdown` fires, or until the first accept error under
    /// [`AcceptErrorPolicy::Halt`].
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("accept loop stopped by shutdown");
                    return;
                }
                res = self.inner.accept() => res,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    let total = self.stats.record_accept();
                    let bridge = Bridge::new(stream, &self.registry, self.stats.clone());
                    self.registry.insert(Arc::clone(&bridge));
                    debug!(bridge = %bridge.id(), %peer_addr, accepted = total, "accepted connection");
                    tokio::spawn(bridge.connect(self.upstream));
                }
                Err(e) => {
                    if self.on_accept_error(e).is_break() || retry_pause(&shutdown).await.is_break() {
                        return;
                    }
                }
            }
        }
    }

    /// Log a failed accept and decide, per policy, whether intake goes on.
    fn on_accept_error(&self, e: io::Error) -> ControlFlow<()> {
        let err = RelayError::Accept(e);
        error!(error = %err, "accept error");
        match self.policy {
            AcceptErrorPolicy::Continue => ControlFlow::Continue(()),
            AcceptErrorPolicy::Halt => {
                warn!("accept loop halted; no new connections will be taken");
                ControlFlow::Break(())
            }
        }
    }
}

/// Wait [`ACCEPT_RETRY_DELAY`] unless shutdown fires first.
async fn retry_pause(shutdown: &CancellationToken) -> ControlFlow<()> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => ControlFlow::Break(()),
        _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => ControlFlow::Continue(()),
    }
}
