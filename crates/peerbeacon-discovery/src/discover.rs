//! Discoverer role: collect distinct announcing hosts within a time/count
//! window.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use peerbeacon_types::{DiscoveredPeer, Options, Settings};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::DiscoveryError;
use crate::interfaces::{require_multicast_interfaces, NetworkInterface};
use crate::peers::PeerSet;
use crate::socket::{self, PacketConn};

/// Large enough for any UDP datagram.
const RECV_BUFFER_LEN: usize = 65_536;

/// Listens for announcements and reports each announcing host once.
///
/// One instance performs one run: [`discover`](Self::discover) consumes it.
pub struct Discoverer {
    options: Options,
    peers: Arc<PeerSet>,
    done: CancellationToken,
}

impl Discoverer {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            peers: Arc::new(PeerSet::new()),
            done: CancellationToken::new(),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Token that ends the discovery window early when cancelled. The run
    /// then returns the peers collected so far.
    pub fn completion(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Listen until the peer limit is reached or the time limit elapses.
    pub async fn discover(self) -> Result<Vec<DiscoveredPeer>, DiscoveryError> {
        let settings = self.options.settings()?;
        let interfaces = require_multicast_interfaces(settings.ip_version)?;
        let conn = socket::bind(&settings)?;
        self.run(settings, conn, &interfaces).await
    }

    /// Like [`discover`](Self::discover), on an already open socket and a
    /// fixed interface set.
    pub async fn discover_on(
        self,
        conn: Arc<dyn PacketConn>,
        interfaces: &[NetworkInterface],
    ) -> Result<Vec<DiscoveredPeer>, DiscoveryError> {
        let settings = self.options.settings()?;
        if interfaces.is_empty() {
            return Err(DiscoveryError::NoInterface {
                version: settings.ip_version,
            });
        }
        self.run(settings, conn, interfaces).await
    }

    async fn run(
        self,
        settings: Settings,
        conn: Arc<dyn PacketConn>,
        interfaces: &[NetworkInterface],
    ) -> Result<Vec<DiscoveredPeer>, DiscoveryError> {
        for iface in interfaces {
            match conn.join_group(iface, settings.group) {
                Ok(()) => {
                    debug!(interface = %iface.name, group = %settings.group, "joined multicast group");
                }
                Err(e) => {
                    warn!(interface = %iface.name, error = %e, "failed to join multicast group");
                }
            }
        }

        let settings = Arc::new(settings);
        info!(
            group = %settings.group_addr(),
            limit = settings.limit,
            time_limit = ?settings.time_limit,
            "discovering peers"
        );

        let timer = tokio::spawn({
            let done = self.done.clone();
            let time_limit = settings.time_limit;
            async move {
                tokio::select! {
                    () = tokio::time::sleep(time_limit) => {
                        debug!(?time_limit, "time limit reached");
                        done.cancel();
                    }
                    () = done.cancelled() => {}
                }
            }
        });

        let zones: HashMap<u32, String> = interfaces
            .iter()
            .map(|iface| (iface.index, iface.name.clone()))
            .collect();
        let receiver = tokio::spawn(receive_loop(
            conn,
            settings.clone(),
            zones,
            self.peers.clone(),
            self.done.clone(),
        ));

        self.done.cancelled().await;

        let received = receiver
            .await
            .map_err(|e| anyhow!("receive task failed: {e}"))?;
        let _ = timer.await;
        if let Err(e) = received {
            warn!(discarded = self.peers.len(), "discovery failed, dropping collected peers");
            return Err(e);
        }

        let peers = self.peers.peers();
        info!(found = peers.len(), "discovery finished");
        Ok(peers)
    }
}

/// Read datagrams until `done` fires, recording the sender of every
/// matching one. `zones` maps interface indexes to names for link-local
/// senders.
async fn receive_loop(
    conn: Arc<dyn PacketConn>,
    settings: Arc<Settings>,
    zones: HashMap<u32, String>,
    peers: Arc<PeerSet>,
    done: CancellationToken,
) -> Result<(), DiscoveryError> {
    let mut buf = vec![0u8; RECV_BUFFER_LEN];
    loop {
        let (n, source) = tokio::select! {
            biased;
            () = done.cancelled() => return Ok(()),
            received = conn.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) if is_transient(&e) => {
                    debug!(error = %e, "transient receive error");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "receive failed, ending discovery");
                    done.cancel();
                    return Err(DiscoveryError::Receive(e));
                }
            },
        };

        if !settings.matches_payload(&buf[..n]) {
            trace!(%source, len = n, "discarding non-matching datagram");
            continue;
        }

        let zone = match source {
            SocketAddr::V6(v6) => zones.get(&v6.scope_id()).map(String::as_str),
            SocketAddr::V4(_) => None,
        };
        let peer = DiscoveredPeer::from_source_with_zone(source, zone);
        let (new, count) = peers.insert(&peer.address);
        if new {
            debug!(%peer, count, "discovered peer");
        }
        if settings.limit > 0 && count >= settings.limit {
            debug!(limit = settings.limit, "peer limit reached");
            done.cancel();
            return Ok(());
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}
