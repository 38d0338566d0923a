//! Discovered peer type.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use serde::{Deserialize, Serialize};

/// A host that announced itself during a discovery window.
///
/// Identified by address only; the source port of the announcement is
/// dropped. Link-local IPv6 senders keep their zone (`fe80::1%eth0`), so
/// hosts on different links stay distinct and the address can be dialed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiscoveredPeer {
    pub address: String,
}

impl DiscoveredPeer {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    /// Peer for the sender of a datagram. A link-local IPv6 sender keeps
    /// its numeric scope id as zone.
    pub fn from_source(source: SocketAddr) -> Self {
        Self::from_source_with_zone(source, None)
    }

    /// Peer for the sender of a datagram, naming the zone of a link-local
    /// IPv6 sender `zone` instead of its numeric scope id.
    pub fn from_source_with_zone(source: SocketAddr, zone: Option<&str>) -> Self {
        match source {
            SocketAddr::V6(v6) if v6.scope_id() != 0 && is_link_local(v6.ip()) => match zone {
                Some(zone) => Self::new(format!("{}%{zone}", v6.ip())),
                None => Self::new(format!("{}%{}", v6.ip(), v6.scope_id())),
            },
            _ => Self::new(source.ip().to_string()),
        }
    }

    /// The address as an [`IpAddr`] without its zone, if it parses as one.
    pub fn ip(&self) -> Option<IpAddr> {
        let (ip, _) = self.address.split_once('%').unwrap_or((self.address.as_str(), ""));
        ip.parse().ok()
    }

    /// Zone of a link-local IPv6 address, if any.
    pub fn zone(&self) -> Option<&str> {
        self.address.split_once('%').map(|(_, zone)| zone)
    }
}

fn is_link_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

impl fmt::Display for DiscoveredPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}
