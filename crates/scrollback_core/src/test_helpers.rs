//! In-memory history source and record builders for tests.

use chrono::{Duration, TimeZone, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;

use crate::error::{CacheError, Result};
use crate::record::{Record, Timestamp};
use crate::source::{FetchOptions, HistorySource};
use crate::store::StreamKey;

/// One call made against a [`MemorySource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub key: StreamKey,
    pub after: Option<Timestamp>,
    pub before: Option<Timestamp>,
    pub options: FetchOptions,
}

/// A fixed, sorted history that remembers every fetch made against it.
#[derive(Debug, Default)]
pub struct MemorySource {
    records: Vec<Record>,
    calls: Mutex<Vec<FetchCall>>,
    fail_after: Option<usize>,
}

impl MemorySource {
    pub fn new(mut records: Vec<Record>) -> Self {
        records.sort_by_key(|r| r.timestamp);
        Self {
            records,
            calls: Mutex::new(Vec::new()),
            fail_after: None,
        }
    }

    /// Every fetch yields at most `count` records and then an error.
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Ranges of every fetch so far as `(after, before)`.
    pub fn ranges(&self) -> Vec<(Option<Timestamp>, Option<Timestamp>)> {
        self.calls
            .lock()
            .iter()
            .map(|call| (call.after, call.before))
            .collect()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }
}

impl HistorySource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn fetch(
        &self,
        key: &StreamKey,
        after: Option<Timestamp>,
        before: Option<Timestamp>,
        options: FetchOptions,
    ) -> BoxStream<'_, Result<Record>> {
        self.calls.lock().push(FetchCall {
            key: key.clone(),
            after,
            before,
            options,
        });

        let mut items: Vec<Result<Record>> = self
            .records
            .iter()
            .filter(|r| after.map_or(true, |after| r.timestamp > after))
            .filter(|r| before.map_or(true, |before| r.timestamp < before))
            .map(|r| Ok(enrich(r.clone(), options)))
            .collect();

        if let Some(limit) = self.fail_after {
            if items.len() > limit {
                items.truncate(limit);
                items.push(Err(CacheError::source_error(
                    "memory",
                    "fetch page",
                    std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset"),
                )));
            }
        }

        stream::iter(items).boxed()
    }
}

fn enrich(mut record: Record, options: FetchOptions) -> Record {
    if !options.reactions {
        record.reactions.clear();
    }
    if !options.mentions {
        record.mentions.clear();
        record.reference = None;
    }
    record
}

/// Fixed base instant all test timestamps are offsets from.
pub fn base_time() -> Timestamp {
    Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(crate::store::HISTORY_ORIGIN)
}

/// `base_time() + secs`
pub fn ts(secs: i64) -> Timestamp {
    base_time() + Duration::seconds(secs)
}

/// A record at `ts(secs)` whose id is its offset.
pub fn record_at(secs: i64) -> Record {
    Record::new(
        secs as u64,
        ts(secs),
        (secs % 7) as u64,
        format!("user{}", secs % 7),
        format!("message at {secs}"),
    )
}

/// `count` records, one every `step` seconds starting at `first`.
pub fn records_every(first: i64, count: usize, step: i64) -> Vec<Record> {
    (0..count as i64)
        .map(|i| record_at(first + i * step))
        .collect()
}
