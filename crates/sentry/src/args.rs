//! Sentry command line arguments.

use std::{path::PathBuf, time::Duration};

use clap::Args;
use vantage_net_reqresp::{ForkDigest, GoodbyeReason};

use crate::{config::SentryConfig, logging::LogArgs};

/// Command line overrides for [`SentryConfig`].
///
/// Every option is unset by default so the config file and the built-in defaults show through.
#[derive(Debug, Clone, Default, Args, PartialEq, Eq)]
#[command(next_help_heading = "Sentry")]
pub struct SentryArgs {
    /// Path to a TOML configuration file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Deadline for a whole handshake exchange (e.g. "10s").
    #[arg(long = "dial-timeout", value_parser = humantime::parse_duration, value_name = "DURATION")]
    pub dial_timeout: Option<Duration>,

    /// Fork digest of the network to follow, hex encoded.
    #[arg(long = "fork-digest", value_name = "HEX")]
    pub fork_digest: Option<ForkDigest>,

    /// Wait before requesting metadata from inbound peers (e.g. "5s").
    #[arg(long = "inbound-grace", value_parser = humantime::parse_duration, value_name = "DURATION")]
    pub inbound_grace_period: Option<Duration>,

    /// Goodbye reason code sent during cleanup.
    #[arg(long = "goodbye-reason", value_name = "CODE")]
    pub goodbye_reason: Option<u64>,

    /// Deadline for the cleanup Goodbye (e.g. "2s").
    #[arg(long = "goodbye-timeout", value_parser = humantime::parse_duration, value_name = "DURATION")]
    pub goodbye_timeout: Option<Duration>,

    /// Crawler identity stamped on published events.
    #[arg(long = "crawler-id", value_name = "ID")]
    pub crawler_id: Option<String>,

    /// Crawler location stamped on published events.
    #[arg(long = "crawler-location", value_name = "LOCATION")]
    pub crawler_location: Option<String>,

    /// Append successful handshakes to this file.
    #[arg(long = "handshake-log", value_name = "FILE")]
    pub handshake_log: Option<PathBuf>,

    #[command(flatten)]
    pub log: LogArgs,
}

impl SentryArgs {
    /// Apply the options that were given on top of `config`.
    pub fn apply_to(&self, config: &mut SentryConfig) {
        if let Some(timeout) = self.dial_timeout {
            config.dial_timeout = timeout;
        }
        if let Some(digest) = self.fork_digest {
            config.fork_digest = digest;
        }
        if let Some(grace) = self.inbound_grace_period {
            config.inbound_grace_period = grace;
        }
        if let Some(code) = self.goodbye_reason {
            config.goodbye_reason = GoodbyeReason::from(code);
        }
        if let Some(timeout) = self.goodbye_timeout {
            config.goodbye_timeout = timeout;
        }
        if let Some(id) = &self.crawler_id {
            config.crawler_id = id.clone();
        }
        if let Some(location) = &self.crawler_location {
            config.crawler_location = location.clone();
        }
        if let Some(path) = &self.handshake_log {
            config.handshake_log = Some(path.clone());
        }

        if self.log.quiet {
            config.log.quiet = true;
        }
        if self.log.verbosity > 0 {
            config.log.verbosity = self.log.verbosity;
        }
        if self.log.filter.is_some() {
            config.log.filter = self.log.filter.clone();
        }
        if self.log.json {
            config.log.json = true;
        }
    }

    /// Load the config file (if any) and apply these overrides.
    pub fn resolve(&self) -> Result<SentryConfig, crate::config::ConfigError> {
        let mut config = SentryConfig::load(self.config.as_deref())?;
        self.apply_to(&mut config);
        Ok(config)
    }
}
