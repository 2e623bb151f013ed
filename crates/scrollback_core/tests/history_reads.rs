//! Integration tests for reads through the segment cache.
//!
//! Every test runs against an in-memory source and a temporary cache
//! directory, and checks both what the reader yields and what it leaves
//! behind in the store.

use std::collections::{BTreeMap, BTreeSet};

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use pretty_assertions::assert_eq;
use scrollback_core::test_helpers::{MemorySource, record_at, records_every, ts};
use scrollback_core::{
    CacheConfig, CacheError, FetchOptions, HistoryCache, HistorySource, Record, Segment,
    SegmentStore, StreamKey, Timestamp,
};
use tempfile::TempDir;

const HOUR: i64 = 3_600;
const DAY: i64 = 24 * HOUR;

fn key() -> StreamKey {
    StreamKey::from(468923220607762485u64)
}

async fn read_all<S: HistorySource>(
    cache: &mut HistoryCache<S>,
    start: Option<Timestamp>,
    end: Option<Timestamp>,
    options: FetchOptions,
) -> Vec<Record> {
    let mut reader = cache.get_history(start, end, options).unwrap();
    let mut records = Vec::new();
    while let Some(record) = reader.next().await.unwrap() {
        records.push(record);
    }
    assert!(reader.is_done());
    records
}

fn ids(records: &[Record]) -> Vec<u64> {
    records.iter().map(|r| r.id).collect()
}

fn assert_strictly_chronological(records: &[Record]) {
    assert!(
        records.windows(2).all(|w| w[0].timestamp < w[1].timestamp),
        "records out of order"
    );
}

/// Seed the on-disk cache with the source's records inside each interval.
fn seed(dir: &TempDir, history: &[Record], intervals: &[(i64, i64)]) {
    let mut store = SegmentStore::empty(dir.path(), key());
    for &(start, end) in intervals {
        let records = history
            .iter()
            .filter(|r| r.timestamp >= ts(start) && r.timestamp <= ts(end))
            .cloned()
            .collect();
        store.commit(Segment::new(ts(start), ts(end), records)).unwrap();
    }
}

#[tokio::test]
async fn gaps_between_cached_segments_are_fetched_once_each() {
    let dir = TempDir::new().unwrap();
    // Hourly messages from Jan 1 through Jan 21.
    let history = records_every(0, 21 * 24, HOUR);
    // Jan1–Jan5 and Jan10–Jan15 are already cached.
    seed(&dir, &history, &[(0, 4 * DAY), (9 * DAY, 14 * DAY)]);

    let mut cache = HistoryCache::new(
        MemorySource::new(history.clone()),
        key(),
        CacheConfig::in_dir(dir.path()),
    );
    let records = read_all(
        &mut cache,
        Some(ts(0)),
        Some(ts(19 * DAY)),
        FetchOptions::default(),
    )
    .await;

    assert_eq!(
        cache.source().ranges(),
        vec![
            (Some(ts(4 * DAY)), Some(ts(9 * DAY))),
            (Some(ts(14 * DAY)), Some(ts(19 * DAY))),
        ]
    );

    let expected: Vec<Record> = history
        .iter()
        .filter(|r| r.timestamp < ts(19 * DAY))
        .cloned()
        .collect();
    assert_strictly_chronological(&records);
    assert_eq!(ids(&records), ids(&expected));

    let store = cache.store();
    assert_eq!(store.segments().len(), 1);
    assert_eq!(store.segments()[0].start, ts(0));
    assert_eq!(store.segments()[0].end, ts(19 * DAY));
    assert_eq!(store.record_count(), expected.len());
}

#[tokio::test]
async fn repeated_read_is_served_from_cache() {
    let dir = TempDir::new().unwrap();
    let history = records_every(0, 500, 60);
    let (start, end) = (Some(ts(1_830)), Some(ts(20_000)));

    let mut cache = HistoryCache::new(
        MemorySource::new(history.clone()),
        key(),
        CacheConfig::in_dir(dir.path()),
    );
    let first = read_all(&mut cache, start, end, FetchOptions::default()).await;
    assert_eq!(cache.source().fetch_count(), 1);
    assert!(!first.is_empty());

    // Same process, warm store.
    cache.source().reset_calls();
    let second = read_all(&mut cache, start, end, FetchOptions::default()).await;
    assert_eq!(cache.source().fetch_count(), 0);
    assert_eq!(second, first);
    assert_eq!(cache.store().commits(), 1);

    // New process, cold store loaded from disk.
    let mut reopened = HistoryCache::new(
        MemorySource::new(history),
        key(),
        CacheConfig::in_dir(dir.path()),
    );
    let third = read_all(&mut reopened, start, end, FetchOptions::default()).await;
    assert_eq!(reopened.source().fetch_count(), 0);
    assert_eq!(third, first);
}

#[tokio::test]
async fn read_inside_cached_segment_does_not_touch_disk() {
    let dir = TempDir::new().unwrap();
    let history = records_every(0, 101, 1);
    seed(&dir, &history, &[(0, 100)]);

    let mut cache = HistoryCache::new(
        MemorySource::new(history),
        key(),
        CacheConfig::in_dir(dir.path()),
    );
    let records = read_all(&mut cache, Some(ts(10)), Some(ts(50)), FetchOptions::default()).await;

    assert_eq!(ids(&records), (10..=50).collect::<Vec<u64>>());
    assert_eq!(cache.source().fetch_count(), 0);
    assert_eq!(cache.store().commits(), 0);
}

#[tokio::test]
async fn unbounded_read_fetches_past_last_segment() {
    let dir = TempDir::new().unwrap();
    let history = records_every(0, 50, 10);
    seed(&dir, &history, &[(0, 200)]);

    let mut cache = HistoryCache::new(
        MemorySource::new(history.clone()),
        key(),
        CacheConfig::in_dir(dir.path()),
    );
    let records = read_all(&mut cache, None, None, FetchOptions::default()).await;

    assert_eq!(ids(&records), ids(&history));
    // Everything before the first cached segment is a gap too, even if empty.
    assert_eq!(
        cache.source().ranges(),
        vec![(None, Some(ts(0))), (Some(ts(200)), None)]
    );

    let store = cache.store();
    assert_eq!(store.segments().len(), 1);
    assert_eq!(store.segments()[0].end, ts(490));
    assert_eq!(store.record_count(), history.len());
}

#[tokio::test]
async fn flush_threshold_bounds_uncommitted_records() {
    let dir = TempDir::new().unwrap();
    let history = records_every(0, 25_000, 1);

    let mut cache = HistoryCache::new(
        MemorySource::new(history),
        key(),
        CacheConfig::in_dir(dir.path()).with_flush_threshold(10_000),
    );

    let mut reader = cache.get_history(None, None, FetchOptions::default()).unwrap();
    let mut seen = 0usize;
    while reader.next().await.unwrap().is_some() {
        seen += 1;
    }
    let stats = reader.stats();
    drop(reader);

    assert_eq!(seen, 25_000);
    assert_eq!(stats.flushes, 2);
    assert_eq!(stats.fetched, 25_000);

    let store = cache.store();
    // Two intermediate commits plus the final one.
    assert_eq!(store.commits(), 3);
    assert_eq!(store.segments().len(), 1);
    assert_eq!(store.record_count(), 25_000);
    let unique: BTreeSet<u64> = store.segments()[0].records.iter().map(|r| r.id).collect();
    assert_eq!(unique.len(), 25_000);
}

#[tokio::test]
async fn source_error_commits_progress_before_surfacing() {
    let dir = TempDir::new().unwrap();
    let history = records_every(0, 20, 10);

    let mut cache = HistoryCache::new(
        MemorySource::new(history.clone()).failing_after(5),
        key(),
        CacheConfig::in_dir(dir.path()),
    );
    let mut reader = cache.get_history(None, None, FetchOptions::default()).unwrap();
    for expected in 0..5 {
        let record = reader.next().await.unwrap().unwrap();
        assert_eq!(record.id, expected * 10);
    }
    let err = reader.next().await.unwrap_err();
    assert!(err.is_source_error());
    // The reader is finished after an error.
    assert!(reader.next().await.unwrap().is_none());
    drop(reader);

    assert_eq!(cache.store().record_count(), 5);
    assert_eq!(cache.store().segments()[0].end, ts(40));

    // A later run picks up where the failed one stopped.
    let mut retry = HistoryCache::new(
        MemorySource::new(history.clone()),
        key(),
        CacheConfig::in_dir(dir.path()),
    );
    let records = read_all(&mut retry, None, None, FetchOptions::default()).await;
    assert_eq!(ids(&records), ids(&history));
    assert_eq!(retry.source().ranges(), vec![(Some(ts(40)), None)]);
}

#[tokio::test]
async fn dropping_reader_mid_stream_keeps_what_was_read() {
    let dir = TempDir::new().unwrap();
    let history = records_every(0, 100, 1);

    {
        let mut cache = HistoryCache::new(
            MemorySource::new(history.clone()),
            key(),
            CacheConfig::in_dir(dir.path()),
        );
        let mut reader = cache.get_history(None, None, FetchOptions::default()).unwrap();
        for _ in 0..10 {
            reader.next().await.unwrap().unwrap();
        }
        // Caller loses interest here.
    }

    let store = SegmentStore::load(dir.path(), key());
    assert_eq!(store.record_count(), 10);
    assert_eq!(store.segments()[0].end, ts(9));
}

#[tokio::test]
async fn close_reports_partial_commit() {
    let dir = TempDir::new().unwrap();
    let mut cache = HistoryCache::new(
        MemorySource::new(records_every(0, 30, 1)),
        key(),
        CacheConfig::in_dir(dir.path()),
    );

    let mut reader = cache
        .get_history(Some(ts(-1)), Some(ts(100)), FetchOptions::default())
        .unwrap();
    for _ in 0..3 {
        reader.next().await.unwrap().unwrap();
    }
    let stats = reader.close().unwrap();
    assert_eq!(stats.fetched, 3);

    // Interrupted reads only claim the range they actually covered.
    let store = cache.store();
    assert_eq!(store.segments()[0].start, ts(-1));
    assert_eq!(store.segments()[0].end, ts(2));
}

#[tokio::test]
async fn invalid_range_is_rejected_before_fetching() {
    let dir = TempDir::new().unwrap();
    let mut cache = HistoryCache::new(
        MemorySource::new(records_every(0, 10, 1)),
        key(),
        CacheConfig::in_dir(dir.path()),
    );

    let err = cache
        .get_history(Some(ts(10)), Some(ts(5)), FetchOptions::default())
        .err()
        .unwrap();
    assert!(matches!(err, CacheError::InvalidRange { .. }));

    let err = cache
        .get_history(Some(ts(5)), Some(ts(5)), FetchOptions::default())
        .err()
        .unwrap();
    assert!(matches!(err, CacheError::InvalidRange { .. }));

    assert_eq!(cache.source().fetch_count(), 0);
}

#[tokio::test]
async fn enrichment_options_reach_the_source() {
    let dir = TempDir::new().unwrap();
    let mut reactions = BTreeMap::new();
    reactions.insert("kekw".to_string(), vec![3, 4]);
    let history = vec![
        record_at(10).with_reactions(reactions.clone()),
        record_at(20)
            .with_mentions(vec![3])
            .with_reference(Some(10)),
    ];

    let mut cache = HistoryCache::new(
        MemorySource::new(history),
        key(),
        CacheConfig::in_dir(dir.path()),
    );

    let plain = read_all(&mut cache, None, Some(ts(15)), FetchOptions::default()).await;
    assert!(plain[0].reactions.is_empty());

    let enriched = read_all(&mut cache, Some(ts(15)), Some(ts(30)), FetchOptions::all()).await;
    assert_eq!(enriched[0].mentions, vec![3]);
    assert!(enriched[0].is_reply());

    let options: Vec<FetchOptions> = cache.source().calls().iter().map(|c| c.options).collect();
    assert_eq!(options, vec![FetchOptions::default(), FetchOptions::all()]);

    // Replies can be resolved against the cache.
    assert_eq!(cache.get_record(10).map(|r| r.timestamp), Some(ts(10)));
}

/// Ignores `before`, like a source that only understands "after".
struct OverrunningSource {
    records: Vec<Record>,
}

impl HistorySource for OverrunningSource {
    fn name(&self) -> &str {
        "overrunning"
    }

    fn fetch(
        &self,
        _key: &StreamKey,
        after: Option<Timestamp>,
        _before: Option<Timestamp>,
        _options: FetchOptions,
    ) -> BoxStream<'_, scrollback_core::Result<Record>> {
        let records: Vec<_> = self
            .records
            .iter()
            .filter(|r| after.map_or(true, |after| r.timestamp > after))
            .cloned()
            .map(Ok)
            .collect();
        stream::iter(records).boxed()
    }
}

#[tokio::test]
async fn bounded_read_stops_and_commits_at_requested_end() {
    let dir = TempDir::new().unwrap();
    let mut cache = HistoryCache::new(
        OverrunningSource {
            records: records_every(0, 100, 1),
        },
        key(),
        CacheConfig::in_dir(dir.path()),
    );

    let records = read_all(&mut cache, None, Some(ts(50)), FetchOptions::default()).await;
    assert_eq!(records.last().map(|r| r.id), Some(49));

    let store = cache.store();
    assert_eq!(store.segments().len(), 1);
    assert_eq!(store.segments()[0].end, ts(50));
    assert_eq!(store.record_count(), 50);
}

#[tokio::test]
async fn bounded_read_ending_in_a_gap_leaves_later_segments_alone() {
    let dir = TempDir::new().unwrap();
    let history = records_every(0, 700, 1);
    seed(&dir, &history, &[(0, 100), (500, 600)]);

    let mut cache = HistoryCache::new(
        MemorySource::new(history),
        key(),
        CacheConfig::in_dir(dir.path()),
    );
    let records = read_all(&mut cache, Some(ts(50)), Some(ts(300)), FetchOptions::default()).await;

    assert_eq!(ids(&records), (50..300).collect::<Vec<u64>>());
    assert_eq!(
        cache.source().ranges(),
        vec![(Some(ts(100)), Some(ts(300)))]
    );
    let store = cache.store();
    assert_eq!(
        store
            .segments()
            .iter()
            .map(|s| (s.start, s.end))
            .collect::<Vec<_>>(),
        vec![(ts(0), ts(300)), (ts(500), ts(600))]
    );
    assert_eq!(store.record_count(), 300 + 101);
}

#[tokio::test]
async fn overrunning_gap_fetch_defers_to_cached_segment() {
    let dir = TempDir::new().unwrap();
    let history = records_every(0, 100, 1);
    seed(&dir, &history, &[(40, 60)]);

    let mut cache = HistoryCache::new(
        OverrunningSource {
            records: history.clone(),
        },
        key(),
        CacheConfig::in_dir(dir.path()),
    );
    let records = read_all(&mut cache, None, Some(ts(80)), FetchOptions::default()).await;

    assert_strictly_chronological(&records);
    assert_eq!(ids(&records), (0..80).collect::<Vec<u64>>());
    assert_eq!(cache.store().record_count(), 80);
}

#[tokio::test]
async fn reader_works_as_a_stream() {
    let dir = TempDir::new().unwrap();
    let history = records_every(0, 40, 5);
    seed(&dir, &history, &[(50, 100)]);

    let mut cache = HistoryCache::new(
        MemorySource::new(history.clone()),
        key(),
        CacheConfig::in_dir(dir.path()),
    );
    let records: Vec<Record> = cache
        .get_history(None, None, FetchOptions::default())
        .unwrap()
        .into_stream()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(ids(&records), ids(&history));
    assert_eq!(
        cache.source().ranges(),
        vec![(None, Some(ts(50))), (Some(ts(100)), None)]
    );
}

#[tokio::test]
async fn failed_intermediate_commit_ends_the_read() {
    let dir = TempDir::new().unwrap();
    // A regular file where the cache directory should be makes every commit fail.
    let cache_dir = dir.path().join("blocked");
    std::fs::write(&cache_dir, b"not a directory").unwrap();
    let history = records_every(0, 10, 1);

    let mut cache = HistoryCache::new(
        MemorySource::new(history.clone()),
        key(),
        CacheConfig::in_dir(&cache_dir).with_flush_threshold(3),
    );
    let mut reader = cache
        .get_history(Some(ts(-1)), Some(ts(100)), FetchOptions::default())
        .unwrap();
    assert_eq!(reader.next().await.unwrap().unwrap().id, 0);
    assert_eq!(reader.next().await.unwrap().unwrap().id, 1);

    let err = reader.next().await.unwrap_err();
    assert!(matches!(err, CacheError::Io { .. }), "unexpected error: {err:?}");
    assert!(!err.is_source_error());
    assert!(reader.is_done());
    assert!(reader.next().await.unwrap().is_none());
    drop(reader);

    // Neither the failed flush nor the drop may claim the range.
    assert!(cache.store().segments().is_empty());
    assert_eq!(cache.source().fetch_count(), 1);

    // Once the directory can be created the same read completes in full.
    std::fs::remove_file(&cache_dir).unwrap();
    let records = read_all(&mut cache, Some(ts(-1)), Some(ts(100)), FetchOptions::default()).await;
    assert_eq!(ids(&records), ids(&history));

    let store = cache.store();
    assert_eq!(store.segments().len(), 1);
    assert_eq!(store.segments()[0].start, ts(-1));
    assert_eq!(store.segments()[0].end, ts(100));
    assert_eq!(store.record_count(), history.len());
    assert_eq!(
        SegmentStore::load(&cache_dir, key()).record_count(),
        history.len()
    );
}
