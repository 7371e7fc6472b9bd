//! Metadata fetched from handshaked peers.

use std::time::SystemTime;

use dashmap::DashMap;
use libp2p::PeerId;
use tracing::trace;
use vantage_net_reqresp::MetaData;

/// Cached metadata with the time it was fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedMetadata {
    pub metadata: MetaData,
    pub fetched_at: SystemTime,
}

/// Last metadata received from each peer. Later fetches overwrite earlier ones.
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: DashMap<PeerId, CachedMetadata>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `metadata` for `peer`, stamped with the current time.
    pub fn put(&self, peer: PeerId, metadata: MetaData) {
        trace!(%peer, seq_number = metadata.seq_number, "caching metadata");
        self.entries.insert(
            peer,
            CachedMetadata {
                metadata,
                fetched_at: SystemTime::now(),
            },
        );
    }

    pub fn get(&self, peer: &PeerId) -> Option<CachedMetadata> {
        self.entries.get(peer).map(|entry| *entry.value())
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.entries.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use alloy_primitives::FixedBytes;

    use super::*;

    fn metadata(seq_number: u64) -> MetaData {
        MetaData {
            seq_number,
            attnets: FixedBytes::with_last_byte(0x01),
            syncnets: None,
        }
    }

    #[test]
    fn test_put_get() {
        let cache = MetadataCache::new();
        let peer = PeerId::random();

        assert!(cache.is_empty());
        assert!(cache.get(&peer).is_none());

        cache.put(peer, metadata(7));

        let cached = cache.get(&peer).unwrap();
        assert_eq!(cached.metadata.seq_number, 7);
        assert!(cache.contains(&peer));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_last_write_wins_without_seq_check() {
        let cache = MetadataCache::new();
        let peer = PeerId::random();

        cache.put(peer, metadata(9));
        cache.put(peer, metadata(3));

        assert_eq!(cache.get(&peer).unwrap().metadata.seq_number, 3);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_overwrite_refreshes_timestamp() {
        let cache = MetadataCache::new();
        let peer = PeerId::random();

        cache.put(peer, metadata(1));
        let first = cache.get(&peer).unwrap().fetched_at;
        cache.put(peer, metadata(1));
        let second = cache.get(&peer).unwrap().fetched_at;

        assert!(second >= first);
    }

    #[test]
    fn test_concurrent_writers() {
        let cache = Arc::new(MetadataCache::new());
        let peers: Vec<_> = (0..16).map(|_| PeerId::random()).collect();

        let handles: Vec<_> = (0..4u64)
            .map(|worker| {
                let cache = Arc::clone(&cache);
                let peers = peers.clone();
                thread::spawn(move || {
                    for (i, peer) in peers.iter().enumerate() {
                        cache.put(*peer, metadata(worker * 100 + i as u64));
                        assert!(cache.get(peer).is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), peers.len());
        for (i, peer) in peers.iter().enumerate() {
            let seq = cache.get(peer).unwrap().metadata.seq_number;
            assert_eq!(seq % 100, i as u64);
        }
    }
}
