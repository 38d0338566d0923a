//! Addresses that belong to this host.

use std::collections::HashSet;

use peerbeacon_types::DiscoveredPeer;
use tracing::debug;

const LOOPBACK_NAMES: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

/// Every address this host answers to, both bare and interface-qualified
/// (`ip%ifname`), plus the loopback names.
///
/// Falls back to the loopback names alone if enumeration fails.
pub fn local_addresses() -> HashSet<String> {
    let mut addrs: HashSet<String> = LOOPBACK_NAMES.iter().map(ToString::to_string).collect();

    match if_addrs::get_if_addrs() {
        Ok(interfaces) => {
            for iface in interfaces {
                let ip = iface.ip().to_string();
                addrs.insert(format!("{ip}%{}", iface.name));
                addrs.insert(ip);
            }
        }
        Err(e) => debug!(error = %e, "interface enumeration failed, using loopback only"),
    }

    addrs
}

/// Whether `peer` is one of the `local` addresses. A zoned peer also
/// matches on its bare address, since a numeric zone never equals an
/// interface name.
pub fn is_local(peer: &DiscoveredPeer, local: &HashSet<String>) -> bool {
    local.contains(&peer.address)
        || (peer.zone().is_some()
            && peer.ip().is_some_and(|ip| local.contains(&ip.to_string())))
}

/// Drop peers whose address is in `local`.
pub fn without_local(peers: Vec<DiscoveredPeer>, local: &HashSet<String>) -> Vec<DiscoveredPeer> {
    peers
        .into_iter()
        .filter(|peer| !is_local(peer, local))
        .collect()
}
