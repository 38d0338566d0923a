//! Deduplicating accumulator for discovered hosts.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use peerbeacon_types::DiscoveredPeer;

/// Set of host addresses seen during one discovery run.
///
/// All access goes through one lock so an insert and the size it produces
/// are observed together.
#[derive(Debug, Default)]
pub struct PeerSet {
    hosts: Mutex<HashSet<String>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `host` if it is new. Returns whether it was new and the
    /// resulting number of hosts.
    pub fn insert(&self, host: &str) -> (bool, usize) {
        let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        let inserted = if hosts.contains(host) {
            false
        } else {
            hosts.insert(host.to_string())
        };
        (inserted, hosts.len())
    }

    pub fn len(&self) -> usize {
        self.hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The collected peers. Order is unspecified.
    pub fn peers(&self) -> Vec<DiscoveredPeer> {
        self.hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(DiscoveredPeer::new)
            .collect()
    }
}
