//! Discovery options, their defaults, and validated settings.
//!
//! [`Options`] is what callers and config files provide: every field may be
//! left unset. [`Options::resolve`] fills the gaps with defaults and
//! [`Options::settings`] turns the result into concrete, validated
//! [`Settings`] that the broadcaster and discoverer open sockets from.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::serde_util;

/// Default UDP port both roles use.
pub const DEFAULT_PORT: &str = "9081";

/// Default announcement payload.
pub const DEFAULT_PAYLOAD: &[u8] = b"hi";

/// Default number of peers a discovery run waits for.
pub const DEFAULT_LIMIT: usize = 1;

/// Default discovery window.
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(10);

/// Default interval between two broadcasts.
pub const DEFAULT_BROADCAST_DELAY: Duration = Duration::from_secs(1);

/// Default IPv4 group (SSDP's administratively scoped address).
pub const DEFAULT_GROUP_V4: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// Default IPv6 group (link-local scope).
pub const DEFAULT_GROUP_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xc);

/// Largest payload that fits in a single IPv4 UDP datagram.
pub const MAX_PAYLOAD_LEN: usize = 65_507;

/// Internet Protocol version a run operates on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    #[default]
    #[serde(alias = "ipv4", alias = "4")]
    V4,
    #[serde(alias = "ipv6", alias = "6")]
    V6,
}

impl IpVersion {
    /// The multicast group used when none is configured.
    pub fn default_group(self) -> IpAddr {
        match self {
            IpVersion::V4 => IpAddr::V4(DEFAULT_GROUP_V4),
            IpVersion::V6 => IpAddr::V6(DEFAULT_GROUP_V6),
        }
    }

    /// Whether `ip` belongs to this family. IPv4-mapped IPv6 addresses
    /// count as IPv4.
    pub fn matches(self, ip: &IpAddr) -> bool {
        let is_v4 = match ip {
            IpAddr::V4(_) => true,
            IpAddr::V6(v6) => v6.to_ipv4_mapped().is_some(),
        };
        is_v4 == (self == IpVersion::V4)
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::V4 => write!(f, "IPv4"),
            IpVersion::V6 => write!(f, "IPv6"),
        }
    }
}

/// Discovery options as supplied by a caller or a config file.
///
/// `None` means "unset"; an explicit `Some(0)` limit means unlimited and an
/// explicit zero duration means "broadcast until stopped".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Number of distinct peers to discover before returning. 0 = no limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// Length of the discovery window.
    #[serde(
        rename = "time_limit_ms",
        with = "serde_util::duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub time_limit: Option<Duration>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_version: Option<IpVersion>,

    /// Total broadcast duration. Zero broadcasts until stopped.
    #[serde(
        rename = "duration_ms",
        with = "serde_util::duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<Duration>,

    /// Interval between broadcasts.
    #[serde(
        rename = "broadcast_delay_ms",
        with = "serde_util::duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub broadcast_delay: Option<Duration>,

    /// Bytes sent with every broadcast and matched on receipt. Must be short.
    #[serde(with = "serde_util::payload", skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,

    #[serde(with = "serde_util::port", skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,

    /// Any of 224.0.0.0/4 or ff00::/8.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multicast_address: Option<String>,
}

impl Options {
    /// Fill every unset field with its default.
    ///
    /// A zero time limit or broadcast delay and an empty port or group
    /// count as unset. Everything else that is set is left alone, so
    /// resolving twice is the same as resolving once. The default group
    /// follows the (possibly just defaulted) IP version.
    #[must_use]
    pub fn resolve(mut self) -> Self {
        let version = *self.ip_version.get_or_insert_with(IpVersion::default);
        self.limit.get_or_insert(DEFAULT_LIMIT);
        self.duration.get_or_insert(Duration::ZERO);
        self.payload.get_or_insert_with(|| DEFAULT_PAYLOAD.to_vec());

        if self.time_limit.map_or(true, |d| d.is_zero()) {
            self.time_limit = Some(DEFAULT_TIME_LIMIT);
        }
        if self.broadcast_delay.map_or(true, |d| d.is_zero()) {
            self.broadcast_delay = Some(DEFAULT_BROADCAST_DELAY);
        }
        if self.port.as_deref().map_or(true, |p| p.trim().is_empty()) {
            self.port = Some(DEFAULT_PORT.to_string());
        }
        if self
            .multicast_address
            .as_deref()
            .map_or(true, |a| a.trim().is_empty())
        {
            self.multicast_address = Some(version.default_group().to_string());
        }
        self
    }

    /// Resolve and validate into concrete [`Settings`].
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        let resolved = self.clone().resolve();
        let ip_version = resolved.ip_version.unwrap_or_default();

        let port_text = resolved.port.as_deref().unwrap_or(DEFAULT_PORT);
        let port = match port_text.trim().parse::<u16>() {
            Ok(port) if port != 0 => port,
            _ => return Err(ConfigError::InvalidPort(port_text.to_string())),
        };

        let group = match resolved.multicast_address.as_deref() {
            Some(text) => {
                let group: IpAddr = text
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidGroup(text.to_string()))?;
                if group.is_ipv4() != (ip_version == IpVersion::V4) {
                    return Err(ConfigError::GroupFamilyMismatch {
                        group: group.to_string(),
                        version: ip_version,
                    });
                }
                if !group.is_multicast() {
                    return Err(ConfigError::NotMulticast(group.to_string()));
                }
                group
            }
            None => ip_version.default_group(),
        };

        let payload = resolved
            .payload
            .unwrap_or_else(|| DEFAULT_PAYLOAD.to_vec());
        if payload.is_empty() {
            return Err(ConfigError::EmptyPayload);
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ConfigError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }

        Ok(Settings {
            limit: resolved.limit.unwrap_or(DEFAULT_LIMIT),
            time_limit: resolved.time_limit.unwrap_or(DEFAULT_TIME_LIMIT),
            ip_version,
            duration: resolved.duration.unwrap_or(Duration::ZERO),
            broadcast_delay: resolved.broadcast_delay.unwrap_or(DEFAULT_BROADCAST_DELAY),
            payload,
            port,
            group,
        })
    }

    /// Overlay the fields set in `other` on top of `self`.
    #[must_use]
    pub fn merge(mut self, other: Options) -> Self {
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        overlay!(
            limit,
            time_limit,
            ip_version,
            duration,
            broadcast_delay,
            payload,
            port,
            multicast_address
        );
        self
    }
}

/// Fully resolved and validated options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// 0 = collect until the time limit.
    pub limit: usize,
    pub time_limit: Duration,
    pub ip_version: IpVersion,
    /// Zero = broadcast until stopped.
    pub duration: Duration,
    pub broadcast_delay: Duration,
    pub payload: Vec<u8>,
    pub port: u16,
    pub group: IpAddr,
}

impl Settings {
    /// Group address and port.
    pub fn group_addr(&self) -> SocketAddr {
        SocketAddr::new(self.group, self.port)
    }

    /// Destination for a datagram leaving through the interface with
    /// `index`. IPv6 groups carry the index as scope id.
    pub fn destination(&self, index: u32) -> SocketAddr {
        match self.group {
            IpAddr::V4(_) => self.group_addr(),
            IpAddr::V6(group) => SocketAddr::V6(SocketAddrV6::new(group, self.port, 0, index)),
        }
    }

    /// Whether the broadcaster only stops on an explicit signal.
    pub fn runs_indefinitely(&self) -> bool {
        self.duration.is_zero()
    }

    /// Whether `datagram` starts with the configured payload.
    pub fn matches_payload(&self, datagram: &[u8]) -> bool {
        datagram.len() >= self.payload.len() && datagram[..self.payload.len()] == self.payload[..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_fills_defaults() {
        let opts = Options::default().resolve();
        assert_eq!(opts.limit, Some(1));
        assert_eq!(opts.time_limit, Some(Duration::from_secs(10)));
        assert_eq!(opts.ip_version, Some(IpVersion::V4));
        assert_eq!(opts.duration, Some(Duration::ZERO));
        assert_eq!(opts.broadcast_delay, Some(Duration::from_secs(1)));
        assert_eq!(opts.payload.as_deref(), Some(&b"hi"[..]));
        assert_eq!(opts.port.as_deref(), Some("9081"));
        assert_eq!(opts.multicast_address.as_deref(), Some("239.255.255.250"));
    }

    #[test]
    fn resolve_is_idempotent() {
        let once = Options {
            ip_version: Some(IpVersion::V6),
            limit: Some(0),
            ..Options::default()
        }
        .resolve();
        let twice = once.clone().resolve();
        assert_eq!(once, twice);
    }

    #[test]
    fn resolve_keeps_explicit_fields() {
        let opts = Options {
            limit: Some(0),
            time_limit: Some(Duration::from_millis(250)),
            payload: Some(b"peer".to_vec()),
            port: Some("7000".into()),
            multicast_address: Some("239.1.2.3".into()),
            ..Options::default()
        }
        .resolve();
        assert_eq!(opts.limit, Some(0));
        assert_eq!(opts.time_limit, Some(Duration::from_millis(250)));
        assert_eq!(opts.payload.as_deref(), Some(&b"peer"[..]));
        assert_eq!(opts.port.as_deref(), Some("7000"));
        assert_eq!(opts.multicast_address.as_deref(), Some("239.1.2.3"));
    }

    #[test]
    fn zero_and_empty_values_count_as_unset() {
        let opts = Options {
            time_limit: Some(Duration::ZERO),
            broadcast_delay: Some(Duration::ZERO),
            port: Some(String::new()),
            multicast_address: Some(" ".into()),
            ..Options::default()
        }
        .resolve();
        assert_eq!(opts.time_limit, Some(DEFAULT_TIME_LIMIT));
        assert_eq!(opts.broadcast_delay, Some(DEFAULT_BROADCAST_DELAY));
        assert_eq!(opts.port.as_deref(), Some("9081"));
        assert_eq!(opts.multicast_address.as_deref(), Some("239.255.255.250"));
    }

    #[test]
    fn default_group_follows_version() {
        let v4 = Options {
            ip_version: Some(IpVersion::V4),
            ..Options::default()
        }
        .resolve();
        let v6 = Options {
            ip_version: Some(IpVersion::V6),
            ..Options::default()
        }
        .resolve();
        assert_eq!(v4.multicast_address.as_deref(), Some("239.255.255.250"));
        assert_eq!(v6.multicast_address.as_deref(), Some("ff02::c"));
    }

    #[test]
    fn settings_match_resolved_settings() {
        let opts = Options {
            ip_version: Some(IpVersion::V6),
            ..Options::default()
        };
        assert_eq!(opts.settings(), opts.clone().resolve().settings());
    }

    #[test]
    fn settings_parse_port_and_group() {
        let settings = Options::default().settings().unwrap();
        assert_eq!(settings.port, 9081);
        assert_eq!(settings.group_addr(), "239.255.255.250:9081".parse().unwrap());
        assert!(settings.runs_indefinitely());
    }

    #[test]
    fn settings_reject_bad_port() {
        for port in ["http", "0", "70000"] {
            let opts = Options {
                port: Some(port.into()),
                ..Options::default()
            };
            assert_eq!(
                opts.settings(),
                Err(ConfigError::InvalidPort(port.into())),
                "port {port:?}"
            );
        }
    }

    #[test]
    fn settings_reject_bad_groups() {
        let bad = |addr: &str, version| Options {
            ip_version: Some(version),
            multicast_address: Some(addr.into()),
            ..Options::default()
        };
        assert!(matches!(
            bad("not-an-ip", IpVersion::V4).settings(),
            Err(ConfigError::InvalidGroup(_))
        ));
        assert!(matches!(
            bad("ff02::c", IpVersion::V4).settings(),
            Err(ConfigError::GroupFamilyMismatch { .. })
        ));
        assert!(matches!(
            bad("192.168.1.1", IpVersion::V4).settings(),
            Err(ConfigError::NotMulticast(_))
        ));
    }

    #[test]
    fn settings_reject_bad_payloads() {
        let empty = Options {
            payload: Some(Vec::new()),
            ..Options::default()
        };
        assert_eq!(empty.settings(), Err(ConfigError::EmptyPayload));

        let huge = Options {
            payload: Some(vec![0; MAX_PAYLOAD_LEN + 1]),
            ..Options::default()
        };
        assert!(matches!(
            huge.settings(),
            Err(ConfigError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn ipv6_destination_carries_scope() {
        let settings = Options {
            ip_version: Some(IpVersion::V6),
            ..Options::default()
        }
        .settings()
        .unwrap();
        match settings.destination(3) {
            SocketAddr::V6(dst) => {
                assert_eq!(dst.scope_id(), 3);
                assert_eq!(dst.port(), 9081);
            }
            SocketAddr::V4(_) => panic!("expected an IPv6 destination"),
        }
    }

    #[test]
    fn payload_matching_is_prefix_exact() {
        let settings = Options::default().settings().unwrap();
        assert!(settings.matches_payload(b"hi"));
        assert!(settings.matches_payload(b"hi there"));
        assert!(!settings.matches_payload(b"h"));
        assert!(!settings.matches_payload(b"ho"));
        assert!(!settings.matches_payload(b""));
    }

    #[test]
    fn version_matches_mapped_addresses() {
        let mapped: IpAddr = "::ffff:10.0.0.1".parse().unwrap();
        let v6: IpAddr = "fe80::1".parse().unwrap();
        let v4: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(IpVersion::V4.matches(&mapped));
        assert!(IpVersion::V4.matches(&v4));
        assert!(!IpVersion::V4.matches(&v6));
        assert!(IpVersion::V6.matches(&v6));
        assert!(!IpVersion::V6.matches(&mapped));
    }

    #[test]
    fn merge_prefers_set_fields() {
        let file = Options {
            port: Some("7000".into()),
            limit: Some(3),
            ..Options::default()
        };
        let flags = Options {
            limit: Some(5),
            ..Options::default()
        };
        let merged = file.merge(flags);
        assert_eq!(merged.port.as_deref(), Some("7000"));
        assert_eq!(merged.limit, Some(5));
    }

    #[test]
    fn parse_toml_options() {
        let toml_str = r#"
limit = 0
time_limit_ms = 2500
ip_version = "v6"
duration_ms = -1
broadcast_delay_ms = 500
payload = "peerbeacon"
port = 9100
multicast_address = "ff02::1234"
"#;
        let opts: Options = toml::from_str(toml_str).unwrap();
        assert_eq!(opts.limit, Some(0));
        assert_eq!(opts.time_limit, Some(Duration::from_millis(2500)));
        assert_eq!(opts.ip_version, Some(IpVersion::V6));
        assert_eq!(opts.duration, Some(Duration::ZERO));
        assert_eq!(opts.broadcast_delay, Some(Duration::from_millis(500)));
        assert_eq!(opts.payload.as_deref(), Some(&b"peerbeacon"[..]));
        assert_eq!(opts.port.as_deref(), Some("9100"));

        let settings = opts.settings().unwrap();
        assert_eq!(settings.port, 9100);
        assert_eq!(settings.group, "ff02::1234".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn resolved_options_serialize() {
        let toml_str = toml::to_string_pretty(&Options::default().resolve()).unwrap();
        assert!(toml_str.contains("port = \"9081\""));
        assert!(toml_str.contains("time_limit_ms = 10000"));
        assert!(toml_str.contains("ip_version = \"v4\""));
    }
}
