//! Sentry configuration.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};
use vantage_net_reqresp::{ForkDigest, GoodbyeReason};

use crate::logging::LogArgs;

/// Default bound for a whole handshake exchange.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default wait before requesting metadata from an inbound peer.
pub const DEFAULT_INBOUND_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Default bound for the Goodbye sent during cleanup.
pub const DEFAULT_GOODBYE_TIMEOUT: Duration = Duration::from_secs(2);

pub const DEFAULT_CRAWLER_ID: &str = "sentry";

pub const DEFAULT_CRAWLER_LOCATION: &str = "unknown";

/// Error loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Configuration for the connection manager and its collaborators.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentryConfig {
    /// Deadline for a whole handshake exchange, in seconds.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub dial_timeout: Duration,

    /// Fork digest of the network the sentry follows.
    pub fork_digest: ForkDigest,

    /// Wait before requesting metadata from an inbound peer, in seconds.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub inbound_grace_period: Duration,

    /// Reason code sent with Goodbye during cleanup.
    pub goodbye_reason: GoodbyeReason,

    /// Deadline for the cleanup Goodbye, in seconds.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub goodbye_timeout: Duration,

    /// Identity stamped on every published event.
    pub crawler_id: String,

    /// Location stamped on every published event.
    pub crawler_location: String,

    /// Append-only handshake log. Disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_log: Option<PathBuf>,

    /// Metadata sequence number sent with Ping.
    pub local_seq_number: u64,

    /// Logging configuration.
    pub log: LogArgs,
}

impl Default for SentryConfig {
    fn default() -> Self {
        Self {
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            fork_digest: ForkDigest::ZERO,
            inbound_grace_period: DEFAULT_INBOUND_GRACE_PERIOD,
            goodbye_reason: GoodbyeReason::Fault,
            goodbye_timeout: DEFAULT_GOODBYE_TIMEOUT,
            crawler_id: DEFAULT_CRAWLER_ID.to_string(),
            crawler_location: DEFAULT_CRAWLER_LOCATION.to_string(),
            handshake_log: None,
            local_seq_number: 0,
            log: LogArgs::default(),
        }
    }
}

impl SentryConfig {
    /// Defaults, overridden by the TOML file at `path` if given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
