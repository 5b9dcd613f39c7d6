//! A [`Bridge`] pairs the accepted client socket with its upstream connection
//! and tears both down together.

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use common::RelayError;
use tokio::{net::TcpStream, sync::Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    leg::{Leg, Side},
    registry::{ConnectionRegistry, WeakRegistry},
    stats::RelayStats,
};

static NEXT_BRIDGE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique bridge identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BridgeId(u64);

impl BridgeId {
    pub(crate) fn next() -> Self {
        Self(NEXT_BRIDGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BridgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bridge-{}", self.0)
    }
}

/// Owns the inbound and outbound [`Leg`] of one proxied connection.
pub struct Bridge {
    id: BridgeId,
    inbound: Arc<Leg>,
    outbound: Arc<Leg>,
    closing: CancellationToken,
    /// `true` once the close sequence has run.
    close_guard: Mutex<bool>,
    registry: WeakRegistry,
    stats: RelayStats,
}

impl Bridge {
    /// Wrap an accepted client socket.
    ///
    /// The outbound leg starts in [`LegState::Idle`](crate::leg::LegState::Idle)
    /// with no socket and gets one only when [`Bridge::connect`] succeeds. A
    /// failed connect moves it straight to `Closed` without ever holding one.
    pub fn new(inbound: TcpStream, registry: &ConnectionRegistry, stats: RelayStats) -> Arc<Self> {
        let id = BridgeId::next();
        let closing = CancellationToken::new();
        Arc::new_cyclic(|owner| Bridge {
            id,
            inbound: Arc::new(Leg::new(
                id,
                Side::Inbound,
                Some(inbound),
                owner.clone(),
                closing.clone(),
            )),
            outbound: Arc::new(Leg::new(
                id,
                Side::Outbound,
                None,
                owner.clone(),
                closing.clone(),
            )),
            closing,
            close_guard: Mutex::new(false),
            registry: registry.downgrade(),
            stats,
        })
    }

    pub fn id(&self) -> BridgeId {
        self.id
    }

    pub fn inbound(&self) -> &Arc<Leg> {
        &self.inbound
    }

    pub fn outbound(&self) -> &Arc<Leg> {
        &self.outbound
    }

    /// Returns `true` once [`Bridge::close`] has started.
    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Connect the outbound leg to `upstream` and start relaying in both
    /// directions. A failed connect closes the bridge before any byte moves.
    pub async fn connect(self: Arc<Self>, upstream: SocketAddr) {
        let res = tokio::select! {
            biased;
            _ = self.closing.cancelled() => return,
            res = TcpStream::connect(upstream) => res,
        };

        let stream = match res {
            Ok(stream) => stream,
            Err(source) => {
                self.stats.record_upstream_failed();
                let err = RelayError::UpstreamConnect {
                    addr: upstream,
                    source,
                };
                warn!(bridge = %self.id, error = %err, "upstream connect failed");
                self.close().await;
                return;
            }
        };

        if !self.outbound.attach(stream).await {
            debug!(bridge = %self.id, "bridge closed while connecting");
            return;
        }
        let connected = self.stats.record_upstream_connected();
        debug!(bridge = %self.id, %upstream, connected, "upstream connected");

        self.inbound.set_peer(&self.outbound);
        self.outbound.set_peer(&self.inbound);

        tokio::spawn(Arc::clone(&self.inbound).relay(self.stats.clone()));
        tokio::spawn(Arc::clone(&self.outbound).relay(self.stats.clone()));
    }

    /// Close both legs and leave the registry.
    ///
    /// Safe to call any number of times from any task. Every call returns only
    /// once both sockets are closed; only the first returns `true`.
    pub async fn close(&self) -> bool {
        let mut closed = self.close_guard.lock().await;
        if *closed {
            return false;
        }
        *closed = true;

        self.closing.cancel();
        self.inbound.close().await;
        self.outbound.close().await;
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
        debug!(bridge = %self.id, "bridge closed");
        true
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("id", &self.id)
            .field("inbound", &self.inbound)
            .field("outbound", &self.outbound)
            .finish()
    }
}
