//! Consensus-layer request/response client.
//!
//! The sentry only speaks the four handshake-related methods of the beacon chain req/resp
//! domain. Framing and compression live behind the [`ReqResp`] transport trait; this crate
//! owns the message types, the node's own [`Status`] record and the deadline handling around
//! each call.
//!
//! # Protocols
//!
//! | Method   | Protocol ID                                         |
//! |----------|-----------------------------------------------------|
//! | Status   | `/eth2/beacon_chain/req/status/1/ssz_snappy`        |
//! | Ping     | `/eth2/beacon_chain/req/ping/1/ssz_snappy`          |
//! | MetaData | `/eth2/beacon_chain/req/metadata/2/ssz_snappy`      |
//! | Goodbye  | `/eth2/beacon_chain/req/goodbye/1/ssz_snappy`       |

mod client;
pub use client::{ReqResp, ReqRespClient};

mod error;
pub use error::{ReqRespError, ResponseCode, RpcError};

mod status;
pub use status::LocalStatus;

mod types;
pub use types::{ForkDigest, GoodbyeReason, MetaData, Status};

/// Number of slots per epoch on every public consensus network.
pub const SLOTS_PER_EPOCH: u64 = 32;

/// Request/response methods used during a sentry handshake.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr, strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum Method {
    Status,
    Ping,
    #[strum(serialize = "metadata")]
    MetaData,
    Goodbye,
}

impl Method {
    /// Full libp2p protocol identifier for this method.
    pub const fn protocol_id(&self) -> &'static str {
        match self {
            Self::Status => "/eth2/beacon_chain/req/status/1/ssz_snappy",
            Self::Ping => "/eth2/beacon_chain/req/ping/1/ssz_snappy",
            Self::MetaData => "/eth2/beacon_chain/req/metadata/2/ssz_snappy",
            Self::Goodbye => "/eth2/beacon_chain/req/goodbye/1/ssz_snappy",
        }
    }

    /// Short method name, as used in metric labels.
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}
