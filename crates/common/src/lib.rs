//! Error taxonomy and stats types shared across `tcp-relay` crates.

pub mod error;
pub mod stats;

pub use error::RelayError;
pub use stats::StatsSnapshot;
