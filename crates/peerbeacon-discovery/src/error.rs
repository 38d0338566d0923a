//! Discovery subsystem errors.

use std::io;
use std::net::SocketAddr;

use peerbeacon_types::{ConfigError, IpVersion};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to enumerate network interfaces: {0}")]
    NetworkQuery(#[source] io::Error),

    #[error("no multicast interface found for {version}")]
    NoInterface { version: IpVersion },

    #[error("failed to bind multicast socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
