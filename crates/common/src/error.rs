//! Common error types shared across crates.

use std::{io, net::SocketAddr};

use thiserror::Error;

/// Errors raised while accepting, bridging or relaying a connection.
///
/// Only [`RelayError::Bind`] and [`RelayError::InvalidAddress`] are fatal to
/// the process; every other variant is handled at the Bridge/Leg boundary by
/// closing the affected Bridge.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// A host string is not a valid IPv4 address.
    #[error("invalid IPv4 address {0:?}")]
    InvalidAddress(String),

    /// A single accept attempt failed.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// The outbound connect to the upstream server failed.
    #[error("upstream connect to {addr} failed: {source}")]
    UpstreamConnect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Reading from a Leg's socket failed.
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    /// Writing to the peer Leg's socket failed.
    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    /// The remote end closed its side of the connection (zero-byte read).
    #[error("peer closed the connection")]
    PeerClosed,
}

impl RelayError {
    /// Returns `true` if this error must terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::Bind { .. } | RelayError::InvalidAddress(_))
    }
}
