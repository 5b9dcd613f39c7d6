//! Point-in-time view of the relay counters.
//!
//! Serialised as JSON when reported, so field names are part of the log
//! contract.

use serde::{Deserialize, Serialize};

/// Counter values captured at one instant.
///
/// All counters except `active` are monotonic over the life of the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Inbound connections accepted by the listener.
    pub accepted: u64,
    /// Upstream connects that succeeded.
    pub upstream_connected: u64,
    /// Upstream connects that failed.
    pub upstream_failed: u64,
    /// Bytes relayed client → upstream.
    pub bytes_upstream: u64,
    /// Bytes relayed upstream → client.
    pub bytes_downstream: u64,
    /// Bridges currently registered.
    pub active: usize,
}
