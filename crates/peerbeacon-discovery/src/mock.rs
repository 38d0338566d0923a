//! In-memory socket adapter for testing.

use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::interfaces::NetworkInterface;
use crate::socket::PacketConn;

type Inbound = io::Result<(Vec<u8>, SocketAddr)>;

/// A datagram the code under test sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    /// Outgoing interface selected at send time.
    pub interface: Option<String>,
    pub payload: Vec<u8>,
    pub dst: SocketAddr,
    pub ttl: Option<u32>,
}

#[derive(Default)]
struct MockState {
    joined: Vec<(String, IpAddr)>,
    sent: Vec<SentDatagram>,
    interface: Option<String>,
    ttl: Option<u32>,
    failing: HashSet<String>,
    stalled: HashSet<String>,
}

/// Mock socket. Inbound datagrams are injected through a [`MockHandle`];
/// everything sent is recorded.
pub struct MockPacketConn {
    inbound: tokio::sync::Mutex<mpsc::Receiver<Inbound>>,
    state: Arc<Mutex<MockState>>,
}

/// Test-side handle onto a [`MockPacketConn`].
#[derive(Clone)]
pub struct MockHandle {
    feed: mpsc::Sender<Inbound>,
    state: Arc<Mutex<MockState>>,
}

impl MockPacketConn {
    /// Create a mock socket and the handle that drives it.
    pub fn new() -> (Self, MockHandle) {
        let (feed, inbound) = mpsc::channel(1024);
        let state = Arc::new(Mutex::new(MockState::default()));
        let conn = Self {
            inbound: tokio::sync::Mutex::new(inbound),
            state: state.clone(),
        };
        (conn, MockHandle { feed, state })
    }
}

impl MockHandle {
    /// Deliver a datagram from `from` to the socket.
    pub async fn inject(&self, payload: &[u8], from: SocketAddr) {
        let _ = self.feed.send(Ok((payload.to_vec(), from))).await;
    }

    /// Make the next read fail with `kind`.
    pub async fn inject_error(&self, kind: io::ErrorKind) {
        let _ = self.feed.send(Err(io::Error::from(kind))).await;
    }

    /// Make joins and interface selection on `name` fail.
    pub fn fail_interface(&self, name: &str) {
        self.state.lock().unwrap().failing.insert(name.to_string());
    }

    /// Make sends through `name` hang forever.
    pub fn stall_interface(&self, name: &str) {
        self.state.lock().unwrap().stalled.insert(name.to_string());
    }

    /// Successful joins as `(interface, group)`.
    pub fn joined(&self) -> Vec<(String, IpAddr)> {
        self.state.lock().unwrap().joined.clone()
    }

    /// Datagrams sent so far.
    pub fn sent(&self) -> Vec<SentDatagram> {
        self.state.lock().unwrap().sent.clone()
    }
}

fn refused(iface: &NetworkInterface) -> io::Error {
    io::Error::new(
        io::ErrorKind::AddrNotAvailable,
        format!("mock failure on {}", iface.name),
    )
}

#[async_trait]
impl PacketConn for MockPacketConn {
    fn join_group(&self, iface: &NetworkInterface, group: IpAddr) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(&iface.name) {
            return Err(refused(iface));
        }
        state.joined.push((iface.name.clone(), group));
        Ok(())
    }

    fn set_multicast_interface(&self, iface: &NetworkInterface) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(&iface.name) {
            return Err(refused(iface));
        }
        state.interface = Some(iface.name.clone());
        Ok(())
    }

    fn set_multicast_ttl(&self, ttl: u32) -> io::Result<()> {
        self.state.lock().unwrap().ttl = Some(ttl);
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let next = self.inbound.lock().await.recv().await;
        match next {
            Some(Ok((data, from))) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok((n, from))
            }
            Some(Err(e)) => Err(e),
            // Every handle is gone: behave like a quiet network.
            None => std::future::pending().await,
        }
    }

    async fn send_to(&self, buf: &[u8], dst: SocketAddr) -> io::Result<usize> {
        let stalled = {
            let mut state = self.state.lock().unwrap();
            let stalled = state
                .interface
                .as_ref()
                .is_some_and(|name| state.stalled.contains(name));
            if !stalled {
                let datagram = SentDatagram {
                    interface: state.interface.clone(),
                    payload: buf.to_vec(),
                    dst,
                    ttl: state.ttl,
                };
                state.sent.push(datagram);
            }
            stalled
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(buf.len())
    }
}
