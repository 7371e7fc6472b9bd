//! The node's own Status record.

use parking_lot::RwLock;
use tracing::debug;

use crate::{ForkDigest, Status};

/// Local chain status shared by every concurrent handshake.
///
/// The record only moves forward: it is replaced by a peer's status when the peer is on the
/// same fork and reports a strictly higher head slot. Compare and replace happen under one
/// write guard.
#[derive(Debug, Default)]
pub struct LocalStatus(RwLock<Status>);

impl LocalStatus {
    pub fn new(status: Status) -> Self {
        Self(RwLock::new(status))
    }

    /// Snapshot of the current record.
    pub fn current(&self) -> Status {
        *self.0.read()
    }

    pub fn fork_digest(&self) -> ForkDigest {
        self.0.read().fork_digest
    }

    pub fn head_slot(&self) -> u64 {
        self.0.read().head_slot
    }

    /// Adopt `peer` if it follows the same fork and is further ahead.
    ///
    /// Returns `true` if the local record was replaced.
    pub fn maybe_update(&self, peer: &Status) -> bool {
        let mut local = self.0.write();
        if local.fork_digest != peer.fork_digest {
            return false;
        }
        if peer.head_slot <= local.head_slot {
            return false;
        }

        debug!(
            old_head_slot = local.head_slot,
            new_head_slot = peer.head_slot,
            "advancing local status"
        );
        *local = *peer;
        true
    }
}
