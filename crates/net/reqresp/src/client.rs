//! Deadline-bounded req/resp client.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use libp2p::PeerId;
use tokio::time::{Instant, timeout_at};
use tracing::trace;

use crate::{GoodbyeReason, LocalStatus, MetaData, Method, ReqRespError, RpcError, Status};

/// Raw request/response calls against a single peer.
///
/// Implemented by the embedding transport, which owns stream negotiation and the
/// `ssz_snappy` framing.
#[async_trait::async_trait]
pub trait ReqResp: Send + Sync + 'static {
    /// Send our status, receive the peer's.
    async fn status(&self, peer: PeerId, status: Status) -> Result<Status, RpcError>;

    /// Send our metadata sequence number, receive the peer's.
    async fn ping(&self, peer: PeerId, seq_number: u64) -> Result<u64, RpcError>;

    /// Request the peer's metadata.
    async fn metadata(&self, peer: PeerId) -> Result<MetaData, RpcError>;

    /// Notify the peer that we are about to disconnect. There is no response.
    async fn goodbye(&self, peer: PeerId, reason: GoodbyeReason) -> Result<(), RpcError>;
}

#[async_trait::async_trait]
impl<T: ReqResp + ?Sized> ReqResp for Arc<T> {
    async fn status(&self, peer: PeerId, status: Status) -> Result<Status, RpcError> {
        (**self).status(peer, status).await
    }

    async fn ping(&self, peer: PeerId, seq_number: u64) -> Result<u64, RpcError> {
        (**self).ping(peer, seq_number).await
    }

    async fn metadata(&self, peer: PeerId) -> Result<MetaData, RpcError> {
        (**self).metadata(peer).await
    }

    async fn goodbye(&self, peer: PeerId, reason: GoodbyeReason) -> Result<(), RpcError> {
        (**self).goodbye(peer, reason).await
    }
}

/// Client wrapping a [`ReqResp`] transport.
///
/// Every call is bounded by an absolute deadline, so a caller can derive one deadline for a
/// whole exchange and pass it to each step.
#[derive(Debug)]
pub struct ReqRespClient<R> {
    transport: R,
    local_status: Arc<LocalStatus>,
    seq_number: AtomicU64,
}

impl<R: ReqResp> ReqRespClient<R> {
    pub fn new(transport: R, local_status: Arc<LocalStatus>, seq_number: u64) -> Self {
        Self {
            transport,
            local_status,
            seq_number: AtomicU64::new(seq_number),
        }
    }

    pub fn transport(&self) -> &R {
        &self.transport
    }

    /// The node's own status record.
    pub fn local_status(&self) -> &Arc<LocalStatus> {
        &self.local_status
    }

    /// Local metadata sequence number sent with Ping.
    pub fn seq_number(&self) -> u64 {
        self.seq_number.load(Ordering::Relaxed)
    }

    pub fn set_seq_number(&self, seq_number: u64) {
        self.seq_number.store(seq_number, Ordering::Relaxed);
    }

    /// Exchange Status messages. Sends a snapshot of the local record.
    pub async fn status(&self, peer: PeerId, deadline: Instant) -> Result<Status, ReqRespError> {
        let local = self.local_status.current();
        self.call(
            Method::Status,
            peer,
            deadline,
            self.transport.status(peer, local),
        )
        .await
    }

    /// Liveness check. Returns the peer's metadata sequence number.
    pub async fn ping(&self, peer: PeerId, deadline: Instant) -> Result<u64, ReqRespError> {
        let seq_number = self.seq_number();
        self.call(
            Method::Ping,
            peer,
            deadline,
            self.transport.ping(peer, seq_number),
        )
        .await
    }

    pub async fn metadata(&self, peer: PeerId, deadline: Instant) -> Result<MetaData, ReqRespError> {
        self.call(
            Method::MetaData,
            peer,
            deadline,
            self.transport.metadata(peer),
        )
        .await
    }

    pub async fn goodbye(
        &self,
        peer: PeerId,
        reason: GoodbyeReason,
        deadline: Instant,
    ) -> Result<(), ReqRespError> {
        self.call(
            Method::Goodbye,
            peer,
            deadline,
            self.transport.goodbye(peer, reason),
        )
        .await
    }

    async fn call<T>(
        &self,
        method: Method,
        peer: PeerId,
        deadline: Instant,
        request: impl Future<Output = Result<T, RpcError>>,
    ) -> Result<T, ReqRespError> {
        trace!(%peer, %method, protocol = method.protocol_id(), "sending request");

        let result = match timeout_at(deadline, request).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(source)) => Err(ReqRespError::Rpc { method, source }),
            Err(_) => Err(ReqRespError::Timeout { method }),
        };

        let outcome = match &result {
            Ok(_) => "success",
            Err(ReqRespError::Timeout { .. }) => "timeout",
            Err(ReqRespError::Rpc { .. }) => "error",
        };
        metrics::counter!(
            "reqresp.requests_total",
            "method" => method.as_str(),
            "outcome" => outcome
        )
        .increment(1);

        result
    }
}
