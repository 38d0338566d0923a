//! Broadcaster role: periodically announce this host to the multicast group.

use std::time::Duration;

use peerbeacon_types::{Options, Settings};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::DiscoveryError;
use crate::interfaces::{require_multicast_interfaces, NetworkInterface};
use crate::socket::{self, PacketConn};

/// TTL / hop limit of every announcement.
pub const MULTICAST_TTL: u32 = 2;

/// Upper bound on a single send, so one stuck interface cannot hold up the
/// rest of a tick.
const SEND_TIMEOUT: Duration = Duration::from_millis(250);

/// Announces presence on every multicast interface until stopped.
///
/// An instance runs once. [`stop`](Self::stop) may be called any number of
/// times, from any clone, before or after the run starts; a broadcaster
/// stopped before it started returns from [`start`](Self::start) without
/// opening a socket.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    options: Options,
    stop: CancellationToken,
}

impl Broadcaster {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            stop: CancellationToken::new(),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Broadcast until stopped or until the configured duration elapses.
    pub async fn start(&self) -> Result<(), DiscoveryError> {
        if self.is_stopped() {
            debug!("broadcaster stopped before start");
            return Ok(());
        }
        let settings = self.options.settings()?;
        let interfaces = require_multicast_interfaces(settings.ip_version)?;
        let conn = socket::bind(&settings)?;
        self.run(&settings, conn.as_ref(), &interfaces).await
    }

    /// Like [`start`](Self::start), on an already open socket and a fixed
    /// interface set.
    pub async fn start_on(
        &self,
        conn: &dyn PacketConn,
        interfaces: &[NetworkInterface],
    ) -> Result<(), DiscoveryError> {
        if self.is_stopped() {
            debug!("broadcaster stopped before start");
            return Ok(());
        }
        let settings = self.options.settings()?;
        if interfaces.is_empty() {
            return Err(DiscoveryError::NoInterface {
                version: settings.ip_version,
            });
        }
        self.run(&settings, conn, interfaces).await
    }

    /// Run [`start`](Self::start) on the current runtime and return at once.
    pub fn start_async(&self) -> JoinHandle<Result<(), DiscoveryError>> {
        let this = self.clone();
        tokio::spawn(async move { this.start().await })
    }

    /// Raise the stop signal. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    async fn run(
        &self,
        settings: &Settings,
        conn: &dyn PacketConn,
        interfaces: &[NetworkInterface],
    ) -> Result<(), DiscoveryError> {
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

        if !settings.runs_indefinitely() {
            let stop = self.stop.clone();
            let duration = settings.duration;
            tokio::spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep(duration) => {
                        debug!(?duration, "broadcast duration elapsed");
                        stop.cancel();
                    }
                    () = stop.cancelled() => {}
                }
            });
        }

        let mut ticker = tokio::time::interval(settings.broadcast_delay);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; announcements start one delay in.
        ticker.tick().await;

        info!(
            group = %settings.group_addr(),
            interfaces = interfaces.len(),
            delay = ?settings.broadcast_delay,
            "broadcasting"
        );

        let mut sent: u64 = 0;
        loop {
            tokio::select! {
                biased;
                () = self.stop.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        biased;
                        () = self.stop.cancelled() => break,
                        n = broadcast_once(settings, conn, interfaces) => sent += n,
                    }
                }
            }
        }

        info!(sent, "broadcast stopped");
        Ok(())
    }
}

/// Send the payload once through every interface. Returns how many sends
/// succeeded; failures are logged and skipped.
async fn broadcast_once(
    settings: &Settings,
    conn: &dyn PacketConn,
    interfaces: &[NetworkInterface],
) -> u64 {
    let mut sent = 0;
    for iface in interfaces {
        if let Err(e) = conn.set_multicast_interface(iface) {
            debug!(interface = %iface.name, error = %e, "cannot select interface for multicast");
            continue;
        }
        if let Err(e) = conn.set_multicast_ttl(MULTICAST_TTL) {
            trace!(interface = %iface.name, error = %e, "failed to set multicast ttl");
        }

        let dst = settings.destination(iface.index);
        match tokio::time::timeout(SEND_TIMEOUT, conn.send_to(&settings.payload, dst)).await {
            Ok(Ok(_)) => {
                sent += 1;
                trace!(interface = %iface.name, %dst, "sent announcement");
            }
            Ok(Err(e)) => debug!(interface = %iface.name, error = %e, "announcement send failed"),
            Err(_) => debug!(interface = %iface.name, "announcement send timed out"),
        }
    }
    sent
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv6Addr, SocketAddr};
    use std::time::Instant;

    use peerbeacon_types::IpVersion;

    use super::*;
    use crate::mock::MockPacketConn;

    fn iface(name: &str, index: u32, addr: &str) -> NetworkInterface {
        NetworkInterface {
            name: name.into(),
            index,
            up: true,
            broadcast: true,
            loopback: false,
            addrs: vec![addr.parse().unwrap()],
        }
    }

    fn fast_options(duration_ms: u64) -> Options {
        Options {
            broadcast_delay: Some(Duration::from_millis(20)),
            duration: Some(Duration::from_millis(duration_ms)),
            ..Options::default()
        }
    }

    #[tokio::test]
    async fn duration_elapses_and_stops() {
        let (conn, handle) = MockPacketConn::new();
        let ifaces = vec![iface("eth0", 2, "192.168.1.10")];
        let broadcaster = Broadcaster::new(fast_options(150));

        let started = Instant::now();
        tokio::time::timeout(Duration::from_secs(5), broadcaster.start_on(&conn, &ifaces))
            .await
            .expect("broadcast should stop by itself")
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert!(broadcaster.is_stopped());

        let sent = handle.sent();
        assert!(!sent.is_empty());
        for datagram in &sent {
            assert_eq!(datagram.payload, b"hi");
            assert_eq!(datagram.dst, "239.255.255.250:9081".parse().unwrap());
            assert_eq!(datagram.ttl, Some(MULTICAST_TTL));
            assert_eq!(datagram.interface.as_deref(), Some("eth0"));
        }
        assert_eq!(
            handle.joined(),
            [("eth0".to_string(), "239.255.255.250".parse::<IpAddr>().unwrap())]
        );
    }

    #[tokio::test]
    async fn zero_duration_runs_until_stopped() {
        let (conn, handle) = MockPacketConn::new();
        let ifaces = vec![iface("eth0", 2, "192.168.1.10")];
        let broadcaster = Broadcaster::new(fast_options(0));

        let task = tokio::spawn({
            let broadcaster = broadcaster.clone();
            async move { broadcaster.start_on(&conn, &ifaces).await }
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!task.is_finished());
        assert!(!handle.sent().is_empty());

        broadcaster.stop();
        broadcaster.stop();
        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("broadcast should exit promptly after stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn stop_before_start_returns_immediately() {
        let (conn, handle) = MockPacketConn::new();
        let ifaces = vec![iface("eth0", 2, "192.168.1.10")];
        let broadcaster = Broadcaster::new(fast_options(0));
        broadcaster.stop();

        tokio::time::timeout(Duration::from_secs(1), broadcaster.start_on(&conn, &ifaces))
            .await
            .unwrap()
            .unwrap();
        assert!(handle.joined().is_empty());
        assert!(handle.sent().is_empty());
    }

    #[tokio::test]
    async fn failing_interface_is_skipped() {
        let (conn, handle) = MockPacketConn::new();
        handle.fail_interface("eth1");
        let ifaces = vec![
            iface("eth1", 3, "10.0.0.2"),
            iface("eth0", 2, "192.168.1.10"),
        ];
        let broadcaster = Broadcaster::new(fast_options(120));

        broadcaster.start_on(&conn, &ifaces).await.unwrap();

        let joined: Vec<_> = handle.joined().into_iter().map(|(name, _)| name).collect();
        assert_eq!(joined, ["eth0"]);
        let sent = handle.sent();
        assert!(!sent.is_empty());
        assert!(sent.iter().all(|d| d.interface.as_deref() == Some("eth0")));
    }

    #[tokio::test]
    async fn stalled_interface_does_not_block_others() {
        let (conn, handle) = MockPacketConn::new();
        handle.stall_interface("eth0");
        let ifaces = vec![
            iface("eth0", 2, "192.168.1.10"),
            iface("eth1", 3, "10.0.0.2"),
        ];
        let broadcaster = Broadcaster::new(fast_options(700));

        tokio::time::timeout(Duration::from_secs(5), broadcaster.start_on(&conn, &ifaces))
            .await
            .unwrap()
            .unwrap();

        let sent = handle.sent();
        assert!(sent.iter().any(|d| d.interface.as_deref() == Some("eth1")));
        assert!(sent.iter().all(|d| d.interface.as_deref() != Some("eth0")));
    }

    #[tokio::test]
    async fn ipv6_announcements_are_scoped() {
        let (conn, handle) = MockPacketConn::new();
        let ifaces = vec![iface("eth0", 7, "fe80::1")];
        let broadcaster = Broadcaster::new(Options {
            ip_version: Some(IpVersion::V6),
            ..fast_options(100)
        });

        broadcaster.start_on(&conn, &ifaces).await.unwrap();

        let sent = handle.sent();
        assert!(!sent.is_empty());
        match sent[0].dst {
            SocketAddr::V6(dst) => {
                assert_eq!(*dst.ip(), "ff02::c".parse::<Ipv6Addr>().unwrap());
                assert_eq!(dst.scope_id(), 7);
            }
            SocketAddr::V4(_) => panic!("expected an IPv6 destination"),
        }
    }

    #[tokio::test]
    async fn no_interfaces_is_an_error() {
        let (conn, _handle) = MockPacketConn::new();
        let broadcaster = Broadcaster::new(fast_options(100));
        let err = broadcaster.start_on(&conn, &[]).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::NoInterface { .. }));
    }

    #[tokio::test]
    async fn invalid_port_fails_before_sending() {
        let (conn, handle) = MockPacketConn::new();
        let ifaces = vec![iface("eth0", 2, "192.168.1.10")];
        let broadcaster = Broadcaster::new(Options {
            port: Some("not-a-port".into()),
            ..fast_options(100)
        });
        let err = broadcaster.start_on(&conn, &ifaces).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Config(_)));
        assert!(handle.joined().is_empty());
    }

    #[tokio::test]
    async fn start_async_after_stop_finishes_without_socket() {
        let broadcaster = Broadcaster::new(fast_options(0));
        broadcaster.stop();

        let handle = broadcaster.start_async();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("stopped broadcaster should finish at once")
            .unwrap()
            .unwrap();
        assert!(broadcaster.is_stopped());
    }

    #[tokio::test]
    async fn start_async_reports_config_errors() {
        let broadcaster = Broadcaster::new(Options {
            payload: Some(Vec::new()),
            ..fast_options(100)
        });
        let result = tokio::time::timeout(Duration::from_secs(1), broadcaster.start_async())
            .await
            .expect("invalid config should fail at once")
            .unwrap();
        assert!(matches!(result, Err(DiscoveryError::Config(_))));
    }
}
