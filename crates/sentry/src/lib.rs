//! Ethereum consensus-layer peer sentry.
//!
//! The sentry reacts to every connection the transport opens, runs a bounded handshake
//! exchange against the remote peer, and publishes what it learned (metadata, subnet
//! subscriptions, client identity) for downstream storage.
//!
//! - [`manager`]: connection lifecycle and handshake validation
//! - [`events`]: event shapes, publishers and the emitter
//! - [`network`]: transport-facing traits, implemented for libp2p by [`swarm::SwarmHost`]
//! - [`config`], [`args`], [`logging`]: configuration surface

pub mod args;
pub mod config;
pub mod events;
pub mod handshake_log;
pub mod logging;
pub mod manager;
pub mod network;
pub mod swarm;

pub use args::SentryArgs;
pub use config::{ConfigError, SentryConfig};
pub use events::{
    BroadcastPublisher, EventDecodeError, EventEmitter, EventPublisher, MetadataReceivedEvent,
    NoopPublisher, PeerDiscoveredEvent, PublishError, PublishedEvent, SentryEvent,
};
pub use handshake_log::{HandshakeLog, HandshakeLogError};
pub use logging::{LogArgs, init_logging};
pub use manager::{ConnectionManager, HandshakeError};
pub use network::{AddressBook, Direction, Network, NetworkEvent};
pub use swarm::{SwarmCommand, SwarmHost, apply_command};
