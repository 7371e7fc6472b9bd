//! Interfaces consumed from the transport and discovery layer.

use std::sync::Arc;

use libp2p::{Multiaddr, PeerId};

/// Which side opened a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Connection notifications delivered to the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Connected { peer: PeerId, direction: Direction },
    Disconnected { peer: PeerId },
}

/// Live connection state of the transport.
pub trait Network: Send + Sync + 'static {
    fn is_connected(&self, peer: &PeerId) -> bool;

    /// Close every connection to `peer`.
    fn disconnect(&self, peer: &PeerId);

    /// Number of peers with at least one open connection.
    fn connected_count(&self) -> usize;
}

/// What the node knows about a peer's addresses and identity.
pub trait AddressBook: Send + Sync + 'static {
    /// Known addresses for `peer`, best first.
    fn addresses(&self, peer: &PeerId) -> Vec<Multiaddr>;

    /// Agent version the peer advertised through identify.
    fn agent_version(&self, peer: &PeerId) -> Option<String>;
}

impl<T: Network + ?Sized> Network for Arc<T> {
    fn is_connected(&self, peer: &PeerId) -> bool {
        (**self).is_connected(peer)
    }

    fn disconnect(&self, peer: &PeerId) {
        (**self).disconnect(peer)
    }

    fn connected_count(&self) -> usize {
        (**self).connected_count()
    }
}

impl<T: AddressBook + ?Sized> AddressBook for Arc<T> {
    fn addresses(&self, peer: &PeerId) -> Vec<Multiaddr> {
        (**self).addresses(peer)
    }

    fn agent_version(&self, peer: &PeerId) -> Option<String> {
        (**self).agent_version(peer)
    }
}
