//! Append-only log of successful handshakes.

use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use libp2p::PeerId;
use parking_lot::Mutex;
use vantage_net_reqresp::MetaData;

/// Error opening or writing the handshake log.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeLogError {
    #[error("failed to open handshake log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write handshake log: {0}")]
    Write(#[from] io::Error),
    #[error("handshake log writer task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// One line per successful handshake:
/// `<RFC3339 time> peer=<id> seq_number=<n> attnets=<hex>`.
#[derive(Debug)]
pub struct HandshakeLog {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl HandshakeLog {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HandshakeLogError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| HandshakeLogError::Open {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line. The write runs on the blocking pool.
    pub async fn record(
        &self,
        peer: &PeerId,
        metadata: &MetaData,
    ) -> Result<(), HandshakeLogError> {
        let line = format!(
            "{} peer={} seq_number={} attnets={}\n",
            humantime::format_rfc3339_seconds(SystemTime::now()),
            peer,
            metadata.seq_number,
            hex::encode(metadata.attnets),
        );
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || {
            let mut file = file.lock();
            file.write_all(line.as_bytes())?;
            file.flush()
        })
        .await??;
        Ok(())
    }
}
