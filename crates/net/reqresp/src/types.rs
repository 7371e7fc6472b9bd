//! Wire-level message types.

use alloy_primitives::{B256, FixedBytes};
use serde::{Deserialize, Serialize};

/// Four-byte fork digest identifying the network and fork a peer follows.
pub type ForkDigest = FixedBytes<4>;

/// Chain head summary exchanged by the Status method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Status {
    pub fork_digest: ForkDigest,
    pub finalized_root: B256,
    pub finalized_epoch: u64,
    pub head_root: B256,
    pub head_slot: u64,
}

/// Peer metadata as returned by the MetaData method (v2).
///
/// `syncnets` is absent when the peer answered with a v1 payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetaData {
    pub seq_number: u64,
    pub attnets: FixedBytes<8>,
    pub syncnets: Option<FixedBytes<1>>,
}

impl MetaData {
    /// Indices of the attestation subnets the peer is subscribed to, ascending.
    ///
    /// SSZ bitvectors store bit `i` in byte `i / 8` at position `i % 8`.
    pub fn subscribed_attnets(&self) -> Vec<usize> {
        self.attnets
            .iter()
            .enumerate()
            .flat_map(|(byte_idx, byte)| {
                (0..8)
                    .filter(move |bit| (byte >> bit) & 1 == 1)
                    .map(move |bit| byte_idx * 8 + bit)
            })
            .collect()
    }

    /// Number of attestation subnets the peer is subscribed to.
    pub fn attnet_count(&self) -> u32 {
        self.attnets.iter().map(|byte| byte.count_ones()).sum()
    }
}

/// Reason sent with a Goodbye request.
///
/// Equality and hashing go by wire code, so `Other(3)` is the same reason as `Fault`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub enum GoodbyeReason {
    ClientShutdown,
    IrrelevantNetwork,
    #[default]
    Fault,
    /// Any code outside the three standard reasons.
    Other(u64),
}

impl GoodbyeReason {
    /// Numeric code carried on the wire.
    pub const fn code(&self) -> u64 {
        match self {
            Self::ClientShutdown => 1,
            Self::IrrelevantNetwork => 2,
            Self::Fault => 3,
            Self::Other(code) => *code,
        }
    }
}

impl PartialEq for GoodbyeReason {
    fn eq(&self, other: &Self) -> bool {
        self.code() == other.code()
    }
}

impl Eq for GoodbyeReason {}

impl std::hash::Hash for GoodbyeReason {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.code().hash(state);
    }
}

impl From<u64> for GoodbyeReason {
    fn from(code: u64) -> Self {
        match code {
            1 => Self::ClientShutdown,
            2 => Self::IrrelevantNetwork,
            3 => Self::Fault,
            other => Self::Other(other),
        }
    }
}

impl From<GoodbyeReason> for u64 {
    fn from(reason: GoodbyeReason) -> Self {
        reason.code()
    }
}

impl std::fmt::Display for GoodbyeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientShutdown => write!(f, "client shutdown"),
            Self::IrrelevantNetwork => write!(f, "irrelevant network"),
            Self::Fault => write!(f, "fault/error"),
            Self::Other(code) => write!(f, "unknown reason ({code})"),
        }
    }
}
