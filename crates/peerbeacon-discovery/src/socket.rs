//! Address-family socket adapter.
//!
//! IPv4 and IPv6 multicast are configured through different socket options
//! (interface address vs. interface index, TTL vs. hop limit). [`PacketConn`]
//! hides that behind one shape so the broadcaster and discoverer never look
//! at the family themselves.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use peerbeacon_types::{IpVersion, Settings};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::UdpSocket;
use tracing::info;

use crate::error::DiscoveryError;
use crate::interfaces::NetworkInterface;

/// A multicast-capable datagram socket.
#[async_trait]
pub trait PacketConn: Send + Sync + 'static {
    /// Join `group` on `iface`.
    fn join_group(&self, iface: &NetworkInterface, group: IpAddr) -> io::Result<()>;

    /// Route outgoing multicast through `iface`.
    fn set_multicast_interface(&self, iface: &NetworkInterface) -> io::Result<()>;

    /// Set the outgoing TTL (IPv4) or hop limit (IPv6).
    fn set_multicast_ttl(&self, ttl: u32) -> io::Result<()>;

    /// Receive one datagram.
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Send one datagram.
    async fn send_to(&self, buf: &[u8], dst: SocketAddr) -> io::Result<usize>;
}

/// IPv4 multicast socket.
pub struct Ipv4PacketConn {
    socket: UdpSocket,
}

/// IPv6 multicast socket.
pub struct Ipv6PacketConn {
    socket: UdpSocket,
}

fn interface_ipv4(iface: &NetworkInterface) -> io::Result<Ipv4Addr> {
    iface.ipv4().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no IPv4 address on {}", iface.name),
        )
    })
}

fn wrong_family(group: IpAddr) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("group {group} does not match the socket family"),
    )
}

#[async_trait]
impl PacketConn for Ipv4PacketConn {
    fn join_group(&self, iface: &NetworkInterface, group: IpAddr) -> io::Result<()> {
        let IpAddr::V4(group) = group else {
            return Err(wrong_family(group));
        };
        self.socket.join_multicast_v4(group, interface_ipv4(iface)?)
    }

    fn set_multicast_interface(&self, iface: &NetworkInterface) -> io::Result<()> {
        SockRef::from(&self.socket).set_multicast_if_v4(&interface_ipv4(iface)?)
    }

    fn set_multicast_ttl(&self, ttl: u32) -> io::Result<()> {
        self.socket.set_multicast_ttl_v4(ttl)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }

    async fn send_to(&self, buf: &[u8], dst: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, dst).await
    }
}

#[async_trait]
impl PacketConn for Ipv6PacketConn {
    fn join_group(&self, iface: &NetworkInterface, group: IpAddr) -> io::Result<()> {
        let IpAddr::V6(group) = group else {
            return Err(wrong_family(group));
        };
        self.socket.join_multicast_v6(&group, iface.index)
    }

    fn set_multicast_interface(&self, iface: &NetworkInterface) -> io::Result<()> {
        SockRef::from(&self.socket).set_multicast_if_v6(iface.index)
    }

    fn set_multicast_ttl(&self, ttl: u32) -> io::Result<()> {
        SockRef::from(&self.socket).set_multicast_hops_v6(ttl)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }

    async fn send_to(&self, buf: &[u8], dst: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, dst).await
    }
}

/// Open the multicast socket for `settings`, choosing the family once.
///
/// Must be called from within a Tokio runtime.
pub fn bind(settings: &Settings) -> Result<Arc<dyn PacketConn>, DiscoveryError> {
    let addr = bind_addr(settings);
    let socket = open_socket(addr).map_err(|source| DiscoveryError::Bind { addr, source })?;
    info!(%addr, version = %settings.ip_version, "multicast socket bound");

    Ok(match settings.ip_version {
        IpVersion::V4 => Arc::new(Ipv4PacketConn { socket }),
        IpVersion::V6 => Arc::new(Ipv6PacketConn { socket }),
    })
}

/// Unix lets an IPv4 socket bind the group address itself, which filters
/// out unrelated traffic on the port. Elsewhere, and for IPv6, bind the
/// wildcard address.
fn bind_addr(settings: &Settings) -> SocketAddr {
    match settings.group {
        IpAddr::V4(group) if cfg!(unix) => SocketAddr::new(IpAddr::V4(group), settings.port),
        IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), settings.port),
        IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), settings.port),
    }
}

fn open_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;

    // Several roles may share the port on one host.
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    UdpSocket::from_std(socket.into())
}
