//! Transparent TCP relay.
//!
//! Every client accepted by the [`Listener`] gets a [`Bridge`]: the accepted
//! socket plus one fresh connection to the upstream server. Bytes move
//! unmodified in both directions until either side closes or fails, at which
//! point the bridge closes both sockets and leaves the [`ConnectionRegistry`].

pub mod bridge;
pub mod config;
pub mod leg;
pub mod listener;
pub mod registry;
pub mod stats;
pub mod telemetry;

pub use crate::bridge::{Bridge, BridgeId};
pub use crate::config::{AcceptErrorPolicy, Cli, Config};
pub use crate::leg::{Leg, LegState, Side, BUFFER_LEN};
pub use crate::listener::Listener;
pub use crate::registry::ConnectionRegistry;
pub use crate::stats::RelayStats;
