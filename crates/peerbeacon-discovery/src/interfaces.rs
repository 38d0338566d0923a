//! Host interface enumeration and multicast interface selection.

use std::net::{IpAddr, Ipv4Addr};

use if_addrs::IfAddr;
use peerbeacon_types::IpVersion;
use tracing::debug;

use crate::error::DiscoveryError;

/// Snapshot of one host network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub name: String,
    /// OS interface index, 0 when unknown.
    pub index: u32,
    /// Operationally up.
    pub up: bool,
    /// Supports broadcast (and therefore multicast).
    ///
    /// Derived from the presence of an IPv4 broadcast address. A
    /// non-loopback interface with no IPv4 address at all is counted as
    /// capable, which includes IPv6-only point-to-point tunnels such as
    /// wireguard links.
    pub broadcast: bool,
    pub loopback: bool,
    pub addrs: Vec<IpAddr>,
}

impl NetworkInterface {
    /// First address of the given family bound to this interface.
    pub fn addr_for(&self, version: IpVersion) -> Option<IpAddr> {
        self.addrs.iter().copied().find(|ip| version.matches(ip))
    }

    /// First IPv4 address, unwrapping IPv4-mapped IPv6 addresses.
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        self.addrs.iter().find_map(|ip| match ip {
            IpAddr::V4(v4) => Some(*v4),
            IpAddr::V6(v6) => v6.to_ipv4_mapped(),
        })
    }
}

/// One address entry as reported by the OS.
#[derive(Debug, Clone)]
struct AddrEntry {
    name: String,
    index: u32,
    up: bool,
    loopback: bool,
    has_broadcast: bool,
    ip: IpAddr,
}

impl From<&if_addrs::Interface> for AddrEntry {
    fn from(entry: &if_addrs::Interface) -> Self {
        Self {
            name: entry.name.clone(),
            index: entry.index.unwrap_or(0),
            up: entry.is_oper_up(),
            loopback: entry.is_loopback(),
            has_broadcast: matches!(&entry.addr, IfAddr::V4(v4) if v4.broadcast.is_some()),
            ip: entry.ip(),
        }
    }
}

/// Enumerate host interfaces, merging per-address entries by name.
pub fn host_interfaces() -> Result<Vec<NetworkInterface>, DiscoveryError> {
    let entries = if_addrs::get_if_addrs().map_err(DiscoveryError::NetworkQuery)?;
    Ok(merge_entries(entries.iter().map(AddrEntry::from)))
}

fn merge_entries(entries: impl IntoIterator<Item = AddrEntry>) -> Vec<NetworkInterface> {
    let mut interfaces: Vec<NetworkInterface> = Vec::new();
    for entry in entries {
        let pos = if let Some(pos) = interfaces.iter().position(|i| i.name == entry.name) {
            pos
        } else {
            interfaces.push(NetworkInterface {
                name: entry.name.clone(),
                index: entry.index,
                up: true,
                broadcast: false,
                loopback: false,
                addrs: Vec::new(),
            });
            interfaces.len() - 1
        };

        let iface = &mut interfaces[pos];
        iface.up &= entry.up;
        iface.loopback |= entry.loopback;
        iface.broadcast |= entry.has_broadcast;
        iface.addrs.push(entry.ip);
    }

    for iface in &mut interfaces {
        let has_v4 = iface.addrs.iter().any(|ip| IpVersion::V4.matches(ip));
        // IPv6 has no broadcast; links without IPv4 are taken as multicast capable.
        iface.broadcast = !iface.loopback && (iface.broadcast || !has_v4);
    }

    interfaces
}

/// Keep the interfaces that are up, support broadcast, and carry at least
/// one address of `version`.
pub fn filter_interfaces(
    interfaces: &[NetworkInterface],
    version: IpVersion,
) -> Vec<NetworkInterface> {
    interfaces
        .iter()
        .filter(|iface| iface.up && iface.broadcast)
        .filter(|iface| iface.addr_for(version).is_some())
        .cloned()
        .collect()
}

/// Interfaces usable for multicast in `version`. May be empty.
pub fn multicast_interfaces(version: IpVersion) -> Result<Vec<NetworkInterface>, DiscoveryError> {
    let all = host_interfaces()?;
    let selected = filter_interfaces(&all, version);
    debug!(
        total = all.len(),
        selected = selected.len(),
        %version,
        "selected multicast interfaces"
    );
    Ok(selected)
}

/// Like [`multicast_interfaces`], but an empty selection is an error.
pub(crate) fn require_multicast_interfaces(
    version: IpVersion,
) -> Result<Vec<NetworkInterface>, DiscoveryError> {
    let selected = multicast_interfaces(version)?;
    if selected.is_empty() {
        return Err(DiscoveryError::NoInterface { version });
    }
    Ok(selected)
}
