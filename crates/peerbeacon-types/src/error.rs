//! Configuration errors.

use thiserror::Error;

use crate::options::IpVersion;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid port {0:?}: expected a number between 1 and 65535")]
    InvalidPort(String),

    #[error("invalid multicast address {0:?}")]
    InvalidGroup(String),

    #[error("multicast address {group} is not an {version} address")]
    GroupFamilyMismatch { group: String, version: IpVersion },

    #[error("{0} is not a multicast address")]
    NotMulticast(String),

    #[error("payload must not be empty")]
    EmptyPayload,

    #[error("payload is {len} bytes, larger than the {max} bytes one datagram can carry")]
    PayloadTooLarge { len: usize, max: usize },
}
