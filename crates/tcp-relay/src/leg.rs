//! One half of a [`Bridge`]: a socket, its read buffer and the relay loop
//! that forwards what it reads to the peer leg.
//!
//! Each leg runs `Idle → Reading → Writing → Reading → … → Closed`. A relay
//! cycle reads at most [`BUFFER_LEN`] bytes, writes exactly those bytes to the
//! peer, and only then reads again, so a direction never has more than one
//! read and one write outstanding.
//!
//! Both legs of a bridge share one [`CancellationToken`]. Cancelling it makes
//! any in-flight read or write give up its socket half, which is how
//! [`Leg::close`] can drop the socket while a relay task is parked on it.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, OnceLock, Weak,
    },
};

use common::RelayError;
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    bridge::{Bridge, BridgeId},
    stats::RelayStats,
};

/// Size of each leg's read buffer.
pub const BUFFER_LEN: usize = 8192;

/// Which socket of the bridge a leg wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Accepted from the client.
    Inbound,
    /// Connected to the upstream server.
    Outbound,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Inbound => "inbound",
            Side::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relay state of a single leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LegState {
    Idle = 0,
    Reading = 1,
    Writing = 2,
    Closed = 3,
}

impl LegState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LegState::Idle,
            1 => LegState::Reading,
            2 => LegState::Writing,
            _ => LegState::Closed,
        }
    }
}

/// Why a relay cycle stopped.
#[derive(Debug, Error)]
pub(crate) enum PumpError {
    /// The bridge is closing; someone else owns the teardown.
    #[error("bridge closing")]
    Cancelled,

    #[error(transparent)]
    Relay(#[from] RelayError),
}

struct ReadSide {
    socket: Option<OwnedReadHalf>,
    buffer: Box<[u8; BUFFER_LEN]>,
}

/// One endpoint of a bridge.
///
/// The leg holds only weak references to its peer and its owning bridge; the
/// bridge owns both legs strongly. A relay task keeps its own leg alive with
/// an `Arc` for as long as it runs, and upgrades the peer for the duration of
/// each write.
///
/// The outbound leg is created without a socket and stays `Idle` and empty
/// until the upstream connect attaches one. Apart from that window a leg holds
/// a socket exactly until it reaches `Closed`; `Idle` alone does not mean a
/// socket is open.
pub struct Leg {
    bridge: BridgeId,
    side: Side,
    state: AtomicU8,
    read_side: Mutex<ReadSide>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    peer: OnceLock<Weak<Leg>>,
    owner: Weak<Bridge>,
    closing: CancellationToken,
}

impl Leg {
    pub(crate) fn new(
        bridge: BridgeId,
        side: Side,
        stream: Option<TcpStream>,
        owner: Weak<Bridge>,
        closing: CancellationToken,
    ) -> Self {
        let (reader, writer) = match stream.map(TcpStream::into_split) {
            Some((r, w)) => (Some(r), Some(w)),
            None => (None, None),
        };
        Self {
            bridge,
            side,
            state: AtomicU8::new(LegState::Idle as u8),
            read_side: Mutex::new(ReadSide {
                socket: reader,
                buffer: Box::new([0u8; BUFFER_LEN]),
            }),
            writer: Mutex::new(writer),
            peer: OnceLock::new(),
            owner,
            closing,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn state(&self) -> LegState {
        LegState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[cfg(test)]
    async fn has_socket(&self) -> bool {
        self.read_side.lock().await.socket.is_some() || self.writer.lock().await.is_some()
    }

    /// Move to `next` unless the leg is already closed.
    fn transition(&self, next: LegState) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (cur != LegState::Closed as u8).then_some(next as u8)
            });
    }

    /// Record the other leg of the bridge. Only the first call has any effect.
    pub(crate) fn set_peer(&self, peer: &Arc<Leg>) {
        let _ = self.peer.set(Arc::downgrade(peer));
    }

    fn peer(&self) -> Option<Arc<Leg>> {
        self.peer.get().and_then(Weak::upgrade)
    }

    /// Install a freshly connected socket.
    ///
    /// Returns `false`, dropping `stream`, if the leg was closed first.
    pub(crate) async fn attach(&self, stream: TcpStream) -> bool {
        let mut read_side = self.read_side.lock().await;
        let mut writer = self.writer.lock().await;
        if self.state() == LegState::Closed {
            return false;
        }
        let (r, w) = stream.into_split();
        read_side.socket = Some(r);
        *writer = Some(w);
        true
    }

    /// Run one `Reading → Writing` cycle: read from this leg, write the same
    /// bytes to `peer`. Returns the number of bytes forwarded.
    pub(crate) async fn relay_once(&self, peer: &Leg) -> Result<usize, PumpError> {
        let mut guard = self.read_side.lock().await;
        let ReadSide { socket, buffer } = &mut *guard;
        let Some(socket) = socket.as_mut() else {
            return Err(PumpError::Cancelled);
        };

        self.transition(LegState::Reading);
        let n = tokio::select! {
            biased;
            _ = self.closing.cancelled() => return Err(PumpError::Cancelled),
            res = socket.read(&mut buffer[..]) => res.map_err(RelayError::Read)?,
        };
        if n == 0 {
            return Err(RelayError::PeerClosed.into());
        }

        self.transition(LegState::Writing);
        peer.write_all(&buffer[..n]).await?;
        self.transition(LegState::Reading);
        Ok(n)
    }

    async fn write_all(&self, data: &[u8]) -> Result<(), PumpError> {
        let mut writer = self.writer.lock().await;
        let Some(socket) = writer.as_mut() else {
            return Err(PumpError::Cancelled);
        };
        tokio::select! {
            biased;
            _ = self.closing.cancelled() => Err(PumpError::Cancelled),
            res = socket.write_all(data) => res.map_err(|e| RelayError::Write(e).into()),
        }
    }

    /// Relay loop for one direction. Runs until the bridge closes or a read
    /// or write fails, in which case it closes the bridge.
    pub(crate) async fn relay(self: Arc<Self>, stats: RelayStats) {
        let err = loop {
            let Some(peer) = self.peer() else {
                break None;
            };
            match self.relay_once(&peer).await {
                Ok(n) => {
                    stats.record_relayed(self.side, n);
                    trace!(bridge = %self.bridge, leg = %self.side, bytes = n, "relayed");
                }
                Err(PumpError::Cancelled) => return,
                Err(PumpError::Relay(e)) => break Some(e),
            }
        };

        match &err {
            Some(RelayError::PeerClosed) => {
                debug!(bridge = %self.bridge, leg = %self.side, "peer closed")
            }
            Some(e) => warn!(bridge = %self.bridge, leg = %self.side, error = %e, "relay error"),
            None => debug!(bridge = %self.bridge, leg = %self.side, "peer leg gone"),
        }

        match self.owner.upgrade() {
            Some(bridge) => {
                bridge.close().await;
            }
            None => {
                self.close().await;
            }
        }
    }

    /// Close the socket. Idempotent.
    ///
    /// Cancels the bridge's token first so a relay task parked on this socket
    /// lets go of it. Returns `true` if a socket was actually dropped.
    pub(crate) async fn close(&self) -> bool {
        self.closing.cancel();
        let mut read_side = self.read_side.lock().await;
        let mut writer = self.writer.lock().await;
        self.state.store(LegState::Closed as u8, Ordering::Release);
        let had_reader = read_side.socket.take().is_some();
        let had_writer = writer.take().is_some();
        had_reader || had_writer
    }
}

impl fmt::Debug for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Leg")
            .field("bridge", &self.bridge)
            .field("side", &self.side)
            .field("state", &self.state())
            .finish()
    }
}
