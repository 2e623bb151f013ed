//! Scrollback Core - Segment Cache for Channel History
//!
//! This crate caches an append-only, chronologically ordered remote history
//! (a chat channel's messages) as a set of closed time intervals ("segments")
//! that are known to be complete. Reads replay cached segments and fetch only
//! the gaps between them, folding what they fetch back into the cache.
//!
//! The pieces, leaves first:
//! - [`Record`]: one captured message
//! - [`Segment`]: an interval plus its records, with an O(n) merge
//! - [`SegmentStore`]: ordered, non-overlapping segments persisted per stream
//! - [`HistoryReader`]: a single read interleaving cache and remote fetches
//! - [`HistoryCache`]: the `get_history` entry point tying them together

pub mod cache;
pub mod config;
pub mod error;
pub mod reader;
pub mod record;
pub mod segment;
pub mod source;
pub mod store;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use cache::HistoryCache;
pub use config::{CacheConfig, ScrollbackConfig};
pub use error::{CacheError, ConfigError, Result};
pub use reader::{HistoryReader, ReadStats};
pub use record::{Record, Timestamp};
pub use segment::Segment;
pub use source::{FetchOptions, HistorySource};
pub use store::{LoadReport, LoadSource, SegmentStore, StreamKey};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        CacheConfig, CacheError, FetchOptions, HistoryCache, HistoryReader, HistorySource,
        Record, Result, Segment, SegmentStore, StreamKey, Timestamp,
    };
}
