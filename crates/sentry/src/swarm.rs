//! libp2p adapter for [`Network`] and [`AddressBook`].
//!
//! [`SwarmHost`] is fed by the task that drives the [`Swarm`]: it observes swarm and identify
//! events, keeps connection counts and addresses in concurrent maps, and turns disconnect
//! requests into [`SwarmCommand`]s for the driver to apply.

use dashmap::DashMap;
use libp2p::{
    Multiaddr, PeerId, Swarm,
    identify,
    swarm::{NetworkBehaviour, SwarmEvent},
};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::network::{AddressBook, Direction, Network, NetworkEvent};

/// Requests from the host to the swarm driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwarmCommand {
    Disconnect(PeerId),
}

/// Connection and address state mirrored from a libp2p swarm.
#[derive(Debug)]
pub struct SwarmHost {
    connections: DashMap<PeerId, u32>,
    addresses: DashMap<PeerId, Vec<Multiaddr>>,
    agents: DashMap<PeerId, String>,
    commands: mpsc::UnboundedSender<SwarmCommand>,
}

impl SwarmHost {
    /// Create a host and the command stream the swarm driver must consume.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SwarmCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let host = Self {
            connections: DashMap::new(),
            addresses: DashMap::new(),
            agents: DashMap::new(),
            commands,
        };
        (host, rx)
    }

    /// Record a new connection. Returns a notification for the first connection to a peer.
    pub fn on_connection_established(
        &self,
        peer: PeerId,
        direction: Direction,
        remote_addr: &Multiaddr,
        num_established: u32,
    ) -> Option<NetworkEvent> {
        self.connections.insert(peer, num_established);
        self.add_address(peer, remote_addr.clone());

        (num_established == 1).then_some(NetworkEvent::Connected { peer, direction })
    }

    /// Record a closed connection. Returns a notification once no connection remains.
    pub fn on_connection_closed(&self, peer: PeerId, remaining: u32) -> Option<NetworkEvent> {
        if remaining > 0 {
            self.connections.insert(peer, remaining);
            return None;
        }
        self.connections.remove(&peer);
        Some(NetworkEvent::Disconnected { peer })
    }

    /// Mirror a swarm event. Only connection events are of interest.
    pub fn on_swarm_event<E>(&self, event: &SwarmEvent<E>) -> Option<NetworkEvent> {
        match event {
            SwarmEvent::ConnectionEstablished {
                peer_id,
                endpoint,
                num_established,
                ..
            } => {
                let direction = if endpoint.is_dialer() {
                    Direction::Outbound
                } else {
                    Direction::Inbound
                };
                self.on_connection_established(
                    *peer_id,
                    direction,
                    endpoint.get_remote_address(),
                    num_established.get(),
                )
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => self.on_connection_closed(*peer_id, *num_established),
            _ => None,
        }
    }

    /// Record the agent version and listen addresses a peer advertised.
    pub fn record_identify(&self, peer: PeerId, agent_version: String, listen_addrs: &[Multiaddr]) {
        trace!(%peer, %agent_version, addrs = listen_addrs.len(), "identify received");
        self.agents.insert(peer, agent_version);
        for addr in listen_addrs {
            self.add_address(peer, addr.clone());
        }
    }

    /// Mirror an identify event.
    pub fn on_identify_event(&self, event: &identify::Event) {
        if let identify::Event::Received { peer_id, info, .. } = event {
            self.record_identify(*peer_id, info.agent_version.clone(), &info.listen_addrs);
        }
    }

    fn add_address(&self, peer: PeerId, addr: Multiaddr) {
        let mut addrs = self.addresses.entry(peer).or_default();
        if !addrs.contains(&addr) {
            addrs.push(addr);
        }
    }
}

impl Network for SwarmHost {
    fn is_connected(&self, peer: &PeerId) -> bool {
        self.connections.contains_key(peer)
    }

    fn disconnect(&self, peer: &PeerId) {
        if self.commands.send(SwarmCommand::Disconnect(*peer)).is_err() {
            debug!(%peer, "swarm driver gone, dropping disconnect request");
        }
    }

    fn connected_count(&self) -> usize {
        self.connections.len()
    }
}

impl AddressBook for SwarmHost {
    fn addresses(&self, peer: &PeerId) -> Vec<Multiaddr> {
        self.addresses
            .get(peer)
            .map(|addrs| addrs.value().clone())
            .unwrap_or_default()
    }

    fn agent_version(&self, peer: &PeerId) -> Option<String> {
        self.agents.get(peer).map(|agent| agent.value().clone())
    }
}

/// Apply a host command to the swarm. Call from the task that drives the swarm.
pub fn apply_command<B: NetworkBehaviour>(swarm: &mut Swarm<B>, command: SwarmCommand) {
    match command {
        SwarmCommand::Disconnect(peer) => {
            if swarm.disconnect_peer_id(peer).is_err() {
                trace!(%peer, "disconnect requested for peer without connections");
            }
        }
    }
}
