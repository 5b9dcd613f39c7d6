//! Process-wide relay counters.
//!
//! Advisory only: nothing in the relay reads these to make a decision.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use common::StatsSnapshot;

use crate::leg::Side;

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    upstream_connected: AtomicU64,
    upstream_failed: AtomicU64,
    bytes_upstream: AtomicU64,
    bytes_downstream: AtomicU64,
}

/// Cheaply cloneable handle to the shared counters.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    inner: Arc<Counters>,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accept(&self) -> u64 {
        self.inner.accepted.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_upstream_connected(&self) -> u64 {
        self.inner.upstream_connected.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_upstream_failed(&self) {
        self.inner.upstream_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count `n` bytes read from the `from` leg and written to its peer.
    pub fn record_relayed(&self, from: Side, n: usize) {
        let counter = match from {
            Side::Inbound => &self.inner.bytes_upstream,
            Side::Outbound => &self.inner.bytes_downstream,
        };
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn accepted(&self) -> u64 {
        self.inner.accepted.load(Ordering::Relaxed)
    }

    pub fn upstream_connected(&self) -> u64 {
        self.inner.upstream_connected.load(Ordering::Relaxed)
    }

    pub fn upstream_failed(&self) -> u64 {
        self.inner.upstream_failed.load(Ordering::Relaxed)
    }

    /// Capture every counter, tagging it with the current registry size.
    pub fn snapshot(&self, active: usize) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted(),
            upstream_connected: self.upstream_connected(),
            upstream_failed: self.upstream_failed(),
            bytes_upstream: self.inner.bytes_upstream.load(Ordering::Relaxed),
            bytes_downstream: self.inner.bytes_downstream.load(Ordering::Relaxed),
            active,
        }
    }
}
