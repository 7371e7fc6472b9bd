//! Process-wide peer caches shared by concurrent handshakes.
//!
//! Both caches are keyed by [`PeerId`](libp2p::PeerId) and replace values whole, so a reader
//! observes either the previous or the new entry. Neither cache evicts.

mod addr;
pub use addr::AddrInfo;

mod backoff;
pub use backoff::{BackoffCache, BackoffEntry};

mod metadata;
pub use metadata::{CachedMetadata, MetadataCache};
