//! LAN peer discovery over IP multicast.
//!
//! Two independent roles talk only through the network:
//!
//! - [`Broadcaster`] joins the multicast group on every suitable interface
//!   and sends a short payload to it at a fixed cadence until stopped.
//! - [`Discoverer`] joins the same group, collects the distinct hosts whose
//!   datagrams start with the agreed payload, and returns once enough peers
//!   have answered or the time limit runs out.
//!
//! IPv4 and IPv6 socket differences live behind [`PacketConn`].

pub mod broadcast;
pub mod discover;
pub mod error;
pub mod interfaces;
pub mod local;
pub mod peers;
pub mod socket;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use broadcast::{Broadcaster, MULTICAST_TTL};
pub use discover::Discoverer;
pub use error::DiscoveryError;
pub use interfaces::{filter_interfaces, host_interfaces, multicast_interfaces, NetworkInterface};
pub use local::{is_local, local_addresses, without_local};
pub use peerbeacon_types::{DiscoveredPeer, IpVersion, Options, Settings};
pub use peers::PeerSet;
pub use socket::{bind, PacketConn};
