//! Peer identity plus the addresses it was reachable on.

use libp2p::{Multiaddr, PeerId};

/// Snapshot of a peer's known addresses, taken when a connection opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrInfo {
    pub peer: PeerId,
    pub addrs: Vec<Multiaddr>,
}

impl AddrInfo {
    pub fn new(peer: PeerId, addrs: Vec<Multiaddr>) -> Self {
        Self { peer, addrs }
    }

    /// Keep only the first known address. Returns `None` if there is none.
    pub fn first_only(peer: PeerId, addrs: impl IntoIterator<Item = Multiaddr>) -> Option<Self> {
        let addr = addrs.into_iter().next()?;
        Some(Self {
            peer,
            addrs: vec![addr],
        })
    }

    pub fn first(&self) -> Option<&Multiaddr> {
        self.addrs.first()
    }
}
