//! Consumer-facing entry point: cached history for one stream.

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::reader::HistoryReader;
use crate::record::{Record, Timestamp};
use crate::source::{FetchOptions, HistorySource};
use crate::store::{LoadReport, SegmentStore, StreamKey};

/// History of one stream served through its segment cache.
///
/// The store is loaded from disk on first use. A `HistoryCache` hands out one
/// reader at a time; the reader borrows the store mutably until it is done.
#[derive(Debug)]
pub struct HistoryCache<S> {
    source: S,
    key: StreamKey,
    config: CacheConfig,
    store: Option<SegmentStore>,
}

impl<S: HistorySource> HistoryCache<S> {
    pub fn new(source: S, key: StreamKey, config: CacheConfig) -> Self {
        Self {
            source,
            key,
            config,
            store: None,
        }
    }

    /// Use an already loaded store, e.g. one inspected beforehand.
    pub fn with_store(source: S, store: SegmentStore, config: CacheConfig) -> Self {
        Self {
            source,
            key: store.key().clone(),
            config,
            store: Some(store),
        }
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The backing store, loading it if this is the first use.
    pub fn store(&mut self) -> &SegmentStore {
        self.store_mut()
    }

    /// Load the store now and report what was found on disk.
    ///
    /// Returns `None` if the store was already loaded.
    pub fn load(&mut self) -> Option<LoadReport> {
        if self.store.is_some() {
            return None;
        }
        let (store, report) = SegmentStore::load_with_report(&self.config.dir, self.key.clone());
        self.store = Some(store);
        Some(report)
    }

    /// Cached record with the given id, e.g. the target of a reply.
    pub fn get_record(&mut self, id: u64) -> Option<&Record> {
        self.store_mut().find_record(id)
    }

    /// Records of this stream from `start` up to `end`, oldest first.
    ///
    /// `None` bounds mean "from the beginning" and "to the live end". Cached
    /// ranges are replayed from disk; only the gaps hit the source.
    pub fn get_history(
        &mut self,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
        options: FetchOptions,
    ) -> Result<HistoryReader<'_, S>> {
        if let (Some(start), Some(end)) = (start, end) {
            if start >= end {
                return Err(CacheError::InvalidRange { start, end });
            }
        }

        let dir = &self.config.dir;
        let key = &self.key;
        let store = self
            .store
            .get_or_insert_with(|| SegmentStore::load(dir, key.clone()));

        Ok(HistoryReader::new(
            &self.source,
            store,
            start,
            end,
            options,
            self.config.flush_threshold,
        ))
    }

    /// Drop everything cached for this stream.
    pub fn clear(&mut self) -> Result<()> {
        self.store_mut().clear()
    }

    fn store_mut(&mut self) -> &mut SegmentStore {
        let dir = &self.config.dir;
        let key = &self.key;
        self.store
            .get_or_insert_with(|| SegmentStore::load(dir, key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Segment;
    use crate::store::LoadSource;
    use crate::test_helpers::{MemorySource, records_every, ts};
    use tempfile::TempDir;

    fn cache_in(dir: &TempDir) -> HistoryCache<MemorySource> {
        HistoryCache::new(
            MemorySource::new(records_every(0, 10, 1)),
            StreamKey::from(7u64),
            CacheConfig::in_dir(dir.path()),
        )
    }

    #[test]
    fn test_load_reports_once() {
        let dir = TempDir::new().unwrap();
        let mut cache = cache_in(&dir);

        let report = cache.load().unwrap();
        assert_eq!(report.source, LoadSource::Missing);
        assert!(cache.load().is_none());
    }

    #[test]
    fn test_with_store_and_clear() {
        let dir = TempDir::new().unwrap();
        let mut store = SegmentStore::empty(dir.path(), StreamKey::from(7u64));
        store
            .commit(Segment::new(ts(0), ts(9), records_every(0, 10, 1)))
            .unwrap();

        let mut cache = HistoryCache::with_store(
            MemorySource::default(),
            store,
            CacheConfig::in_dir(dir.path()),
        );
        assert_eq!(cache.key().as_str(), "7");
        assert_eq!(cache.get_record(3).map(|r| r.timestamp), Some(ts(3)));

        cache.clear().unwrap();
        assert!(cache.get_record(3).is_none());
        assert!(!dir.path().join("7.json").exists());
    }

    #[tokio::test]
    async fn test_rejects_empty_range() {
        let dir = TempDir::new().unwrap();
        let mut cache = cache_in(&dir);
        let result = cache.get_history(Some(ts(3)), Some(ts(3)), FetchOptions::default());
        assert!(matches!(result, Err(CacheError::InvalidRange { .. })));
        drop(result);
        assert_eq!(cache.source().fetch_count(), 0);
    }
}
