//! Peers that recently failed an outbound handshake.

use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use libp2p::PeerId;
use tracing::trace;

use crate::AddrInfo;

/// Address snapshot of a failed peer and when it last failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffEntry {
    pub addr_info: AddrInfo,
    pub last_failure: SystemTime,
}

/// Failed peers, exposed so a dialer can skip them for a while.
#[derive(Debug, Default)]
pub struct BackoffCache {
    entries: DashMap<PeerId, BackoffEntry>,
}

impl BackoffCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure for `addr_info.peer`, replacing any earlier entry.
    pub fn put(&self, addr_info: AddrInfo) {
        trace!(peer = %addr_info.peer, "backing off peer");
        self.entries.insert(
            addr_info.peer,
            BackoffEntry {
                addr_info,
                last_failure: SystemTime::now(),
            },
        );
    }

    pub fn get(&self, peer: &PeerId) -> Option<BackoffEntry> {
        self.entries.get(peer).map(|entry| entry.value().clone())
    }

    /// Whether `peer` failed less than `window` ago.
    ///
    /// A failure timestamp in the future (clock moved backwards) counts as recent.
    pub fn is_backed_off(&self, peer: &PeerId, window: Duration) -> bool {
        self.entries.get(peer).is_some_and(|entry| {
            entry
                .last_failure
                .elapsed()
                .map_or(true, |elapsed| elapsed < window)
        })
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.entries.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
