//! Discovery and metadata facts published to downstream consumers.
//!
//! Events are serialized as field-named JSON and handed to an [`EventPublisher`] under a
//! subject per event kind. Publishing never fails the caller: errors are logged and the event
//! is dropped.

use std::{
    fmt,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use libp2p::{Multiaddr, PeerId, multiaddr::Protocol};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, trace};
use vantage_net_reqresp::MetaData;

/// Subject for [`PeerDiscoveredEvent`]s.
pub const PEER_DISCOVERED_SUBJECT: &str = "events.peer_discovered";

/// Subject for [`MetadataReceivedEvent`]s.
pub const METADATA_RECEIVED_SUBJECT: &str = "events.metadata_received";

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A peer surfaced by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDiscoveredEvent {
    pub enr: String,
    pub id: String,
    pub ip: String,
    pub port: u16,
    pub crawler_id: String,
    pub crawler_location: String,
    /// Capture time, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Metadata obtained from a handshaked peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataReceivedEvent {
    pub id: String,
    pub multiaddr: String,
    /// Local head epoch at emission. Consumers store it as a 32-bit integer.
    pub epoch: u32,
    pub metadata: MetaData,
    pub client_version: String,
    pub crawler_id: String,
    pub crawler_location: String,
    /// Capture time, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Error returned by an [`EventPublisher`].
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("publisher closed")]
    Closed,
    #[error("publish failed: {0}")]
    Transport(String),
}

/// Send-only message bus.
#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync + 'static {
    async fn publish(&self, subject: &'static str, payload: Vec<u8>) -> Result<(), PublishError>;
}

/// Publisher used when no message bus is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

#[async_trait::async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, subject: &'static str, payload: Vec<u8>) -> Result<(), PublishError> {
        trace!(subject, bytes = payload.len(), "no message bus, dropping event");
        Ok(())
    }
}

/// A payload as seen by [`BroadcastPublisher`] subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedEvent {
    pub subject: &'static str,
    pub payload: Vec<u8>,
}

/// In-process fan-out. Slow subscribers drop events independently.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<PublishedEvent>,
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.tx.subscribe()
    }

}

#[async_trait::async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, subject: &'static str, payload: Vec<u8>) -> Result<(), PublishError> {
        // No subscribers is not an error for a fan-out.
        let _ = self.tx.send(PublishedEvent { subject, payload });
        Ok(())
    }
}

/// Builds events, stamps them with crawler identity and time, and publishes them.
#[derive(Clone)]
pub struct EventEmitter {
    publisher: Arc<dyn EventPublisher>,
    crawler_id: String,
    crawler_location: String,
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("crawler_id", &self.crawler_id)
            .field("crawler_location", &self.crawler_location)
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    pub fn new(
        publisher: Arc<dyn EventPublisher>,
        crawler_id: impl Into<String>,
        crawler_location: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            crawler_id: crawler_id.into(),
            crawler_location: crawler_location.into(),
        }
    }

    pub fn crawler_id(&self) -> &str {
        &self.crawler_id
    }

    pub fn crawler_location(&self) -> &str {
        &self.crawler_location
    }

    /// Publish a discovered peer. IP and port are taken from `addr`.
    pub async fn peer_discovered(&self, enr: &str, peer: PeerId, addr: &Multiaddr) {
        let (ip, port) = ip_and_port(addr);
        let event = PeerDiscoveredEvent {
            enr: enr.to_string(),
            id: peer.to_string(),
            ip,
            port,
            crawler_id: self.crawler_id.clone(),
            crawler_location: self.crawler_location.clone(),
            timestamp: unix_millis(),
        };
        self.emit(PEER_DISCOVERED_SUBJECT, &event).await;
    }

    /// Publish metadata received from `peer`. Epochs past `u32::MAX` saturate.
    pub async fn metadata_received(
        &self,
        peer: PeerId,
        addr: &Multiaddr,
        epoch: u64,
        metadata: MetaData,
        client_version: String,
    ) {
        let event = MetadataReceivedEvent {
            id: peer.to_string(),
            multiaddr: addr.to_string(),
            epoch: u32::try_from(epoch).unwrap_or(u32::MAX),
            metadata,
            client_version,
            crawler_id: self.crawler_id.clone(),
            crawler_location: self.crawler_location.clone(),
            timestamp: unix_millis(),
        };
        self.emit(METADATA_RECEIVED_SUBJECT, &event).await;
    }

    async fn emit<E: Serialize>(&self, subject: &'static str, event: &E) {
        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(err) => {
                error!(subject, %err, "failed to serialize event");
                return;
            }
        };

        if let Err(err) = self.publisher.publish(subject, payload).await {
            error!(subject, %err, "failed to publish event");
        }
    }
}

/// A decoded event, as a consumer sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentryEvent {
    PeerDiscovered(PeerDiscoveredEvent),
    MetadataReceived(MetadataReceivedEvent),
}

/// Error decoding a published payload.
#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    #[error("unknown subject `{0}`")]
    UnknownSubject(String),
    #[error("malformed {subject} record: {source}")]
    Malformed {
        subject: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl SentryEvent {
    /// Decode a payload published under `subject`.
    pub fn decode(subject: &str, payload: &[u8]) -> Result<Self, EventDecodeError> {
        match subject {
            PEER_DISCOVERED_SUBJECT => serde_json::from_slice(payload)
                .map(Self::PeerDiscovered)
                .map_err(|source| EventDecodeError::Malformed {
                    subject: PEER_DISCOVERED_SUBJECT,
                    source,
                }),
            METADATA_RECEIVED_SUBJECT => serde_json::from_slice(payload)
                .map(Self::MetadataReceived)
                .map_err(|source| EventDecodeError::Malformed {
                    subject: METADATA_RECEIVED_SUBJECT,
                    source,
                }),
            other => Err(EventDecodeError::UnknownSubject(other.to_string())),
        }
    }

    pub fn subject(&self) -> &'static str {
        match self {
            Self::PeerDiscovered(_) => PEER_DISCOVERED_SUBJECT,
            Self::MetadataReceived(_) => METADATA_RECEIVED_SUBJECT,
        }
    }
}

fn ip_and_port(addr: &Multiaddr) -> (String, u16) {
    let mut ip = String::new();
    let mut port = 0;
    for protocol in addr.iter() {
        match protocol {
            Protocol::Ip4(addr) => ip = addr.to_string(),
            Protocol::Ip6(addr) => ip = addr.to_string(),
            Protocol::Dns(host) | Protocol::Dns4(host) | Protocol::Dns6(host) => {
                ip = host.to_string()
            }
            Protocol::Tcp(p) | Protocol::Udp(p) if port == 0 => port = p,
            _ => {}
        }
    }
    (ip, port)
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use alloy_primitives::fixed_bytes;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    use super::*;

    struct FailingPublisher;

    #[async_trait::async_trait]
    impl EventPublisher for FailingPublisher {
        async fn publish(&self, _: &'static str, _: Vec<u8>) -> Result<(), PublishError> {
            Err(PublishError::Transport("bus unavailable".into()))
        }
    }

    #[derive(Default)]
    struct RecordingPublisher(Mutex<Vec<PublishedEvent>>);

    #[async_trait::async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(&self, subject: &'static str, payload: Vec<u8>) -> Result<(), PublishError> {
            self.0.lock().push(PublishedEvent { subject, payload });
            Ok(())
        }
    }

    fn metadata() -> MetaData {
        MetaData {
            seq_number: 7,
            attnets: fixed_bytes!("0xff00000000000000"),
            syncnets: None,
        }
    }

    #[tokio::test]
    async fn test_metadata_received_event_shape() {
        let publisher = Arc::new(RecordingPublisher::default());
        let emitter = EventEmitter::new(publisher.clone(), "sentry-1", "eu-west");
        let peer = PeerId::random();
        let addr: Multiaddr = "/ip4/1.2.3.4/tcp/9000".parse().unwrap();

        emitter
            .metadata_received(peer, &addr, 3, metadata(), "Teku/v24.1.0".into())
            .await;

        let published = publisher.0.lock().clone();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].subject, METADATA_RECEIVED_SUBJECT);

        let value: serde_json::Value = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(value["id"], peer.to_string());
        assert_eq!(value["multiaddr"], "/ip4/1.2.3.4/tcp/9000");
        assert_eq!(value["epoch"], 3);
        assert_eq!(value["metadata"]["seq_number"], 7);
        assert_eq!(value["client_version"], "Teku/v24.1.0");
        assert_eq!(value["crawler_id"], "sentry-1");
        assert_eq!(value["crawler_location"], "eu-west");
        assert!(value["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_epoch_saturates_to_u32() {
        let publisher = Arc::new(RecordingPublisher::default());
        let emitter = EventEmitter::new(publisher.clone(), "sentry-1", "eu-west");
        let addr: Multiaddr = "/ip4/1.2.3.4/tcp/9000".parse().unwrap();

        let epoch = u64::from(u32::MAX) + 1;
        emitter
            .metadata_received(PeerId::random(), &addr, epoch, metadata(), String::new())
            .await;

        let published = publisher.0.lock().clone();
        let event = SentryEvent::decode(published[0].subject, &published[0].payload).unwrap();
        assert_matches!(event, SentryEvent::MetadataReceived(event) if event.epoch == u32::MAX);
    }

    #[tokio::test]
    async fn test_peer_discovered_parses_addr() {
        let publisher = BroadcastPublisher::default();
        let mut rx = publisher.subscribe();
        let emitter = EventEmitter::new(Arc::new(publisher), "sentry-1", "eu-west");
        let peer = PeerId::random();
        let addr: Multiaddr = "/ip4/5.6.7.8/udp/9000/quic-v1".parse().unwrap();

        emitter.peer_discovered("enr:-abc", peer, &addr).await;

        let published = rx.recv().await.unwrap();
        let event = SentryEvent::decode(published.subject, &published.payload).unwrap();
        let SentryEvent::PeerDiscovered(event) = event else {
            panic!("unexpected event {event:?}");
        };
        assert_eq!(event.enr, "enr:-abc");
        assert_eq!(event.id, peer.to_string());
        assert_eq!(event.ip, "5.6.7.8");
        assert_eq!(event.port, 9000);
    }

    #[tokio::test]
    async fn test_publish_failure_is_not_fatal() {
        let emitter = EventEmitter::new(Arc::new(FailingPublisher), "sentry-1", "eu-west");
        let addr: Multiaddr = "/ip4/1.2.3.4/tcp/9000".parse().unwrap();

        emitter
            .metadata_received(PeerId::random(), &addr, 0, metadata(), String::new())
            .await;
    }

    #[tokio::test]
    async fn test_noop_publisher_accepts_everything() {
        let emitter = EventEmitter::new(Arc::new(NoopPublisher), "sentry-1", "eu-west");
        let addr: Multiaddr = "/ip4/1.2.3.4/tcp/9000".parse().unwrap();
        emitter.peer_discovered("enr:-abc", PeerId::random(), &addr).await;
    }

    #[test]
    fn test_decode_rejects_unknown_subject() {
        let err = SentryEvent::decode("events.unknown", b"{}").unwrap_err();
        assert_matches!(err, EventDecodeError::UnknownSubject(subject) if subject == "events.unknown");
    }

    #[test]
    fn test_decode_rejects_malformed_records() {
        let err = SentryEvent::decode(METADATA_RECEIVED_SUBJECT, b"not json").unwrap_err();
        assert_matches!(err, EventDecodeError::Malformed { .. });

        let missing_fields = br#"{"id":"16Uiu2HAm","ip":"1.2.3.4"}"#;
        let err = SentryEvent::decode(PEER_DISCOVERED_SUBJECT, missing_fields).unwrap_err();
        assert_matches!(
            err,
            EventDecodeError::Malformed {
                subject: PEER_DISCOVERED_SUBJECT,
                ..
            }
        );
    }

    #[test]
    fn test_ip_and_port() {
        let addr: Multiaddr = "/ip6/::1/tcp/13000".parse().unwrap();
        assert_eq!(ip_and_port(&addr), ("::1".to_string(), 13000));

        let addr: Multiaddr = "/dns4/node.example.org/tcp/9000".parse().unwrap();
        assert_eq!(ip_and_port(&addr), ("node.example.org".to_string(), 9000));

        let addr: Multiaddr = "/memory/5".parse().unwrap();
        assert_eq!(ip_and_port(&addr), (String::new(), 0));
    }
}
