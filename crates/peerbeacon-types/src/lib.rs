//! Shared types for peerbeacon.
//!
//! This crate holds the pieces both discovery roles agree on: the
//! [`Options`] a run is configured with, the defaults that fill them in,
//! the validated [`Settings`] sockets are opened from, and the
//! [`DiscoveredPeer`] values a discovery run produces.

pub mod error;
pub mod options;
pub mod peer;
mod serde_util;

pub use error::ConfigError;
pub use options::{
    IpVersion, Options, Settings, DEFAULT_BROADCAST_DELAY, DEFAULT_GROUP_V4, DEFAULT_GROUP_V6,
    DEFAULT_LIMIT, DEFAULT_PAYLOAD, DEFAULT_PORT, DEFAULT_TIME_LIMIT, MAX_PAYLOAD_LEN,
};
pub use peer::DiscoveredPeer;
