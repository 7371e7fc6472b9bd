//! Connection lifecycle manager.
//!
//! Every connection notification becomes one task on the [`TaskExecutor`]. Outbound peers are
//! validated with a full Status, Ping, MetaData exchange and backed off on failure. Inbound peers
//! are given a grace period to finish their own handshake, then asked for their metadata only.
//! Whatever happens inside a flow, the connection is closed at the end of it, with a Goodbye if
//! it is still open. This includes a panic in the flow and a shutdown signal arriving mid-flow;
//! flows are graceful tasks, so the task manager waits for their cleanup on shutdown.

use std::{
    panic::AssertUnwindSafe,
    pin::pin,
    sync::Arc,
    time::Duration,
};

use futures::{
    FutureExt,
    future::{Either, select},
};
use libp2p::PeerId;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, sleep},
};
use tracing::{debug, error, info, trace, warn};
use vantage_net_peers::{AddrInfo, BackoffCache, MetadataCache};
use vantage_net_reqresp::{
    LocalStatus, MetaData, ReqResp, ReqRespClient, ReqRespError, SLOTS_PER_EPOCH, Status,
};
use vantage_tasks::{GracefulShutdown, TaskExecutor};

use crate::{
    config::SentryConfig,
    events::EventEmitter,
    handshake_log::{HandshakeLog, HandshakeLogError},
    network::{AddressBook, Direction, Network, NetworkEvent},
};

/// Step of the outbound validation that failed.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("failed to get status from peer: {0}")]
    Status(#[source] ReqRespError),
    #[error("failed to ping peer: {0}")]
    Ping(#[source] ReqRespError),
    #[error("failed to get metadata from peer: {0}")]
    MetaData(#[source] ReqRespError),
}

/// Deadline used when `now + timeout` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Reacts to connection events and drives one handshake flow per connection.
pub struct ConnectionManager<H, R> {
    inner: Arc<Inner<H, R>>,
}

impl<H, R> Clone for ConnectionManager<H, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H, R> std::fmt::Debug for ConnectionManager<H, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.inner.config)
            .field("handshaked_peers", &self.inner.metadata_cache.len())
            .field("backed_off_peers", &self.inner.backoff_cache.len())
            .finish_non_exhaustive()
    }
}

struct Inner<H, R> {
    config: SentryConfig,
    host: H,
    client: ReqRespClient<R>,
    metadata_cache: Arc<MetadataCache>,
    backoff_cache: Arc<BackoffCache>,
    events: EventEmitter,
    handshake_log: Option<Arc<HandshakeLog>>,
    executor: TaskExecutor,
}

impl<H, R> ConnectionManager<H, R>
where
    H: Network + AddressBook,
    R: ReqResp,
{
    /// Create a manager whose local status starts at genesis on the configured fork.
    pub fn new(
        config: SentryConfig,
        host: H,
        transport: R,
        events: EventEmitter,
        executor: TaskExecutor,
    ) -> Result<Self, HandshakeLogError> {
        let local_status = Status {
            fork_digest: config.fork_digest,
            ..Default::default()
        };
        Self::with_local_status(config, host, transport, local_status, events, executor)
    }

    /// Create a manager with an explicit initial local status.
    ///
    /// Fails if the configured handshake log cannot be opened.
    pub fn with_local_status(
        config: SentryConfig,
        host: H,
        transport: R,
        local_status: Status,
        events: EventEmitter,
        executor: TaskExecutor,
    ) -> Result<Self, HandshakeLogError> {
        let handshake_log = config
            .handshake_log
            .as_deref()
            .map(HandshakeLog::open)
            .transpose()?
            .map(Arc::new);
        let client = ReqRespClient::new(
            transport,
            Arc::new(LocalStatus::new(local_status)),
            config.local_seq_number,
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                host,
                client,
                metadata_cache: Arc::new(MetadataCache::new()),
                backoff_cache: Arc::new(BackoffCache::new()),
                events,
                handshake_log,
                executor,
            }),
        })
    }

    pub fn config(&self) -> &SentryConfig {
        &self.inner.config
    }

    pub fn host(&self) -> &H {
        &self.inner.host
    }

    pub fn local_status(&self) -> &Arc<LocalStatus> {
        self.inner.client.local_status()
    }

    pub fn metadata_cache(&self) -> &Arc<MetadataCache> {
        &self.inner.metadata_cache
    }

    /// Peers that failed outbound validation, for the dialer to consult.
    pub fn backoff_cache(&self) -> &Arc<BackoffCache> {
        &self.inner.backoff_cache
    }

    /// Handle a new connection. The flow runs on its own graceful task.
    pub fn on_connected(&self, peer: PeerId, direction: Direction) -> JoinHandle<()> {
        info!(
            %peer,
            %direction,
            total = self.inner.host.connected_count(),
            "connected to peer"
        );

        let inner = Arc::clone(&self.inner);
        self.inner
            .executor
            .spawn_with_graceful_shutdown_signal(move |shutdown| async move {
                inner.handle_connection(peer, direction, shutdown).await
            })
    }

    /// Handle a closed connection. Nothing is evicted.
    pub fn on_disconnected(&self, peer: PeerId) {
        if self.inner.metadata_cache.contains(&peer) {
            info!(%peer, "disconnected from handshaked peer");
        } else {
            trace!(%peer, "disconnected from peer");
        }
    }

    /// Status, Ping and MetaData against `addr_info.peer`, recording the metadata on success.
    pub async fn validate(
        &self,
        addr_info: &AddrInfo,
        deadline: Instant,
    ) -> Result<MetaData, HandshakeError> {
        self.inner.validate(addr_info, deadline).await
    }

    /// Dispatch network events until the stream closes.
    pub async fn run(self, mut events: mpsc::Receiver<NetworkEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                NetworkEvent::Connected { peer, direction } => {
                    self.on_connected(peer, direction);
                }
                NetworkEvent::Disconnected { peer } => self.on_disconnected(peer),
            }
        }
        debug!("network event stream closed");
    }

    /// Run [`Self::run`] as a critical task. A panic in the dispatch loop resolves the
    /// [`TaskManager`](vantage_tasks::TaskManager) with an error.
    pub fn spawn(self, events: mpsc::Receiver<NetworkEvent>) -> JoinHandle<()> {
        let executor = self.inner.executor.clone();
        executor.spawn_critical("connection-manager", self.run(events))
    }
}

impl<H, R> Inner<H, R>
where
    H: Network + AddressBook,
    R: ReqResp,
{
    async fn handle_connection(
        self: Arc<Self>,
        peer: PeerId,
        direction: Direction,
        shutdown: GracefulShutdown,
    ) {
        let flow = AssertUnwindSafe(async {
            let deadline = deadline_after(self.config.dial_timeout);
            match direction {
                Direction::Outbound => self.handle_outbound(peer, deadline).await,
                Direction::Inbound => self.handle_inbound(peer, deadline).await,
            }
        })
        .catch_unwind();
        let flow = pin!(flow);

        // Held until cleanup is done so shutdown waits for the Goodbye.
        let _guard = match select(flow, shutdown).await {
            Either::Left((Ok(()), _)) => None,
            Either::Left((Err(_), _)) => {
                error!(%peer, %direction, "handshake flow panicked");
                record_failure(direction);
                None
            }
            Either::Right((guard, _)) => {
                debug!(%peer, %direction, "shutdown during handshake flow");
                Some(guard)
            }
        };

        self.cleanup(peer).await;
    }

    async fn handle_outbound(&self, peer: PeerId, deadline: Instant) {
        let Some(addr_info) = AddrInfo::first_only(peer, self.host.addresses(&peer)) else {
            error!(%peer, "no addresses known for outbound peer");
            return;
        };

        match self.validate(&addr_info, deadline).await {
            Ok(_) => record_success(Direction::Outbound),
            Err(err) => {
                warn!(%peer, %err, "failed to validate peer");
                record_failure(Direction::Outbound);
                self.backoff_cache.put(addr_info);
                metrics::counter!("sentry.backoff.inserted_total").increment(1);
            }
        }
    }

    async fn handle_inbound(&self, peer: PeerId, deadline: Instant) {
        // The remote side runs its own handshake first.
        sleep(self.config.inbound_grace_period).await;

        if !self.host.is_connected(&peer) {
            warn!(%peer, "inbound peer disconnected during grace period");
            return;
        }

        let metadata = match self.client.metadata(peer, deadline).await {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(%peer, %err, "failed to get metadata from inbound peer");
                record_failure(Direction::Inbound);
                return;
            }
        };

        let Some(addr_info) = AddrInfo::first_only(peer, self.host.addresses(&peer)) else {
            error!(%peer, "no addresses known for connected inbound peer");
            record_failure(Direction::Inbound);
            return;
        };

        self.record_metadata(&addr_info, metadata).await;
        record_success(Direction::Inbound);
    }

    async fn validate(
        &self,
        addr_info: &AddrInfo,
        deadline: Instant,
    ) -> Result<MetaData, HandshakeError> {
        let peer = addr_info.peer;

        let status = self
            .client
            .status(peer, deadline)
            .await
            .map_err(HandshakeError::Status)?;

        let local_status = self.client.local_status();
        if local_status.maybe_update(&status) {
            debug!(%peer, head_slot = status.head_slot, "adopted peer status");
        } else if status.fork_digest != local_status.fork_digest() {
            debug!(%peer, fork_digest = %status.fork_digest, "peer follows a different fork");
        }

        self.client
            .ping(peer, deadline)
            .await
            .map_err(HandshakeError::Ping)?;

        let metadata = self
            .client
            .metadata(peer, deadline)
            .await
            .map_err(HandshakeError::MetaData)?;

        self.record_metadata(addr_info, metadata).await;
        Ok(metadata)
    }

    /// Cache, publish and log metadata from a handshaked peer.
    async fn record_metadata(&self, addr_info: &AddrInfo, metadata: MetaData) {
        let peer = addr_info.peer;
        self.metadata_cache.put(peer, metadata);

        if let Some(addr) = addr_info.first() {
            let epoch = self.client.local_status().head_slot() / SLOTS_PER_EPOCH;
            let client_version = self.host.agent_version(&peer).unwrap_or_default();
            self.events
                .metadata_received(peer, addr, epoch, metadata, client_version)
                .await;
        }

        info!(
            %peer,
            seq_number = metadata.seq_number,
            attnets = %hex::encode(metadata.attnets),
            "performed successful handshake"
        );

        if let Some(log) = &self.handshake_log
            && let Err(err) = log.record(&peer, &metadata).await
        {
            warn!(path = %log.path().display(), %err, "failed to append handshake log");
        }
    }

    async fn cleanup(&self, peer: PeerId) {
        if !self.host.is_connected(&peer) {
            trace!(%peer, "peer already disconnected");
            return;
        }

        let deadline = deadline_after(self.config.goodbye_timeout);
        if let Err(err) = self
            .client
            .goodbye(peer, self.config.goodbye_reason, deadline)
            .await
        {
            debug!(%peer, %err, "failed to send goodbye");
        }
        self.host.disconnect(&peer);
    }
}

/// `now + timeout`, or a deadline decades away if that overflows.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

fn record_success(direction: Direction) {
    metrics::counter!("sentry.handshake.succeeded_total", "direction" => direction.as_str())
        .increment(1);
}

fn record_failure(direction: Direction) {
    metrics::counter!("sentry.handshake.failed_total", "direction" => direction.as_str())
        .increment(1);
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicBool, time::Duration};

    use alloy_primitives::fixed_bytes;
    use assert_matches::assert_matches;
    use dashmap::DashSet;
    use libp2p::Multiaddr;
    use parking_lot::Mutex;
    use vantage_net_reqresp::{GoodbyeReason, RpcError};
    use vantage_tasks::TaskManager;

    use super::*;
    use crate::events::NoopPublisher;

    #[derive(Default)]
    struct TestHost {
        connected: DashSet<PeerId>,
        addrs: Vec<Multiaddr>,
        disconnects: Mutex<Vec<PeerId>>,
    }

    impl Network for TestHost {
        fn is_connected(&self, peer: &PeerId) -> bool {
            self.connected.contains(peer)
        }

        fn disconnect(&self, peer: &PeerId) {
            self.connected.remove(peer);
            self.disconnects.lock().push(*peer);
        }

        fn connected_count(&self) -> usize {
            self.connected.len()
        }
    }

    impl AddressBook for TestHost {
        fn addresses(&self, _peer: &PeerId) -> Vec<Multiaddr> {
            self.addrs.clone()
        }

        fn agent_version(&self, _peer: &PeerId) -> Option<String> {
            None
        }
    }

    #[derive(Default)]
    struct TestTransport {
        panic_on_status: AtomicBool,
        goodbyes: Mutex<Vec<GoodbyeReason>>,
    }

    #[async_trait::async_trait]
    impl ReqResp for TestTransport {
        async fn status(&self, _peer: PeerId, status: Status) -> Result<Status, RpcError> {
            if self.panic_on_status.load(std::sync::atomic::Ordering::SeqCst) {
                panic!("status handler bug");
            }
            Ok(status)
        }

        async fn ping(&self, _peer: PeerId, _seq_number: u64) -> Result<u64, RpcError> {
            Ok(1)
        }

        async fn metadata(&self, _peer: PeerId) -> Result<MetaData, RpcError> {
            Err(RpcError::Disconnected)
        }

        async fn goodbye(&self, _peer: PeerId, reason: GoodbyeReason) -> Result<(), RpcError> {
            self.goodbyes.lock().push(reason);
            Ok(())
        }
    }

    fn manager(
        host: TestHost,
        transport: TestTransport,
        executor: TaskExecutor,
    ) -> ConnectionManager<TestHost, TestTransport> {
        let config = SentryConfig {
            fork_digest: fixed_bytes!("0x6a95a1a9"),
            ..Default::default()
        };
        let events = EventEmitter::new(Arc::new(NoopPublisher), "test", "local");
        ConnectionManager::new(config, host, transport, events, executor).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_validate_surfaces_failing_step() {
        let tasks = TaskManager::current();
        let manager = manager(TestHost::default(), TestTransport::default(), tasks.executor());

        let addr_info = AddrInfo::new(
            PeerId::random(),
            vec!["/ip4/10.0.0.1/tcp/9000".parse().unwrap()],
        );
        let deadline = Instant::now() + Duration::from_secs(10);

        let err = manager.validate(&addr_info, deadline).await.unwrap_err();
        assert_matches!(err, HandshakeError::MetaData(ReqRespError::Rpc { .. }));
        assert!(manager.metadata_cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_flow_still_cleans_up() {
        let tasks = TaskManager::current();
        let peer = PeerId::random();
        let host = TestHost {
            addrs: vec!["/ip4/10.0.0.1/tcp/9000".parse().unwrap()],
            ..Default::default()
        };
        host.connected.insert(peer);
        let transport = TestTransport::default();
        transport
            .panic_on_status
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let manager = manager(host, transport, tasks.executor());
        manager.on_connected(peer, Direction::Outbound).await.unwrap();

        assert!(!manager.host().is_connected(&peer));
        assert_eq!(*manager.host().disconnects.lock(), vec![peer]);
        assert_eq!(
            *manager.inner.client.transport().goodbyes.lock(),
            vec![GoodbyeReason::Fault]
        );
        // A panic is not a validation failure.
        assert!(manager.backoff_cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_handshake_log_directory_fails_construction() {
        let tasks = TaskManager::current();
        let dir = tempfile::tempdir().unwrap();
        let config = SentryConfig {
            handshake_log: Some(dir.path().join("missing").join("handshakes.log")),
            ..Default::default()
        };
        let events = EventEmitter::new(Arc::new(NoopPublisher), "test", "local");

        let result = ConnectionManager::new(
            config,
            TestHost::default(),
            TestTransport::default(),
            events,
            tasks.executor(),
        );
        assert_matches!(result, Err(HandshakeLogError::Open { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_timeouts_still_clean_up() {
        let tasks = TaskManager::current();
        let peer = PeerId::random();
        let host = TestHost {
            addrs: vec!["/ip4/10.0.0.1/tcp/9000".parse().unwrap()],
            ..Default::default()
        };
        host.connected.insert(peer);
        let config = SentryConfig {
            dial_timeout: Duration::from_secs(u64::MAX),
            goodbye_timeout: Duration::MAX,
            ..Default::default()
        };
        let events = EventEmitter::new(Arc::new(NoopPublisher), "test", "local");
        let manager = ConnectionManager::new(
            config,
            host,
            TestTransport::default(),
            events,
            tasks.executor(),
        )
        .unwrap();

        manager.on_connected(peer, Direction::Outbound).await.unwrap();

        // Validation ran and failed at MetaData instead of panicking on the deadline.
        assert!(manager.backoff_cache().contains(&peer));
        assert!(!manager.host().is_connected(&peer));
        assert_eq!(
            *manager.inner.client.transport().goodbyes.lock(),
            vec![GoodbyeReason::Fault]
        );
    }

    #[test]
    fn test_deadline_after_saturates() {
        let far = deadline_after(Duration::MAX);
        assert!(far > Instant::now() + Duration::from_secs(86400 * 365));

        let now = Instant::now();
        let near = deadline_after(Duration::from_secs(5));
        assert!(near >= now + Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_of_unknown_peer_is_quiet() {
        let tasks = TaskManager::current();
        let manager = manager(TestHost::default(), TestTransport::default(), tasks.executor());
        manager.on_disconnected(PeerId::random());
        assert!(manager.metadata_cache().is_empty());
    }
}
