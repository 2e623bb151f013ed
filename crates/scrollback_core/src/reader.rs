//! One logical read over cached and remote history.
//!
//! A [`HistoryReader`] walks the cached segments overlapping the request and
//! fills the gaps between them from the remote source, yielding a single
//! chronological sequence. Fetched records are buffered and folded back into
//! the store as the read progresses, so an interrupted read keeps whatever it
//! already pulled.

use std::sync::Arc;

use futures::stream::{BoxStream, Stream, StreamExt};

use crate::error::{CacheError, Result};
use crate::record::{Record, Timestamp};
use crate::segment::Segment;
use crate::source::{FetchOptions, HistorySource};
use crate::store::{HISTORY_ORIGIN, SegmentStore};

/// Default number of buffered records that triggers an intermediate commit.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    /// Fetching the gap before `next_segment` (or up to the requested end)
    FillingGap { next_segment: usize },
    /// Yielding cached records of `segment` starting at `position`
    ReplayingSegment { segment: usize, position: usize },
    /// Fetching after the last cached segment
    TrailingFetch,
    Done,
}

/// Counters for one read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Records served from the cache
    pub replayed: usize,
    /// Records pulled from the remote source
    pub fetched: usize,
    /// Remote fetches issued (one per gap)
    pub fetches: usize,
    /// Intermediate commits triggered by the flush threshold
    pub flushes: usize,
}

enum Pulled {
    Record(Record),
    /// The gap (or the live end) was reached
    Exhausted,
    /// The source produced a record past the requested end
    PastEnd,
}

/// A read of `[start, end)` through a [`SegmentStore`].
///
/// Pull records with [`next`](Self::next) or turn the reader into a
/// `Stream` with [`into_stream`](Self::into_stream). Dropping the reader
/// before it finishes commits the records fetched so far; use
/// [`close`](Self::close) to observe that commit's result.
pub struct HistoryReader<'a, S: HistorySource + ?Sized> {
    source: &'a S,
    store: &'a mut SegmentStore,
    options: FetchOptions,
    flush_threshold: usize,
    start: Option<Timestamp>,
    end: Option<Timestamp>,
    segments: Vec<Arc<Segment>>,
    state: ReadState,
    fetch: Option<BoxStream<'a, Result<Record>>>,
    /// Exclusive lower bound for the next fetch
    cursor: Option<Timestamp>,
    buffer: Vec<Record>,
    stats: ReadStats,
}

impl<'a, S: HistorySource + ?Sized> HistoryReader<'a, S> {
    /// Callers go through `HistoryCache::get_history`, which validates the range.
    pub(crate) fn new(
        source: &'a S,
        store: &'a mut SegmentStore,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
        options: FetchOptions,
        flush_threshold: usize,
    ) -> Self {
        let lower = start.unwrap_or(HISTORY_ORIGIN);
        let segments = store.overlapping(lower, end);

        let state = match segments.first() {
            Some(first) if first.start <= lower => ReadState::ReplayingSegment {
                segment: 0,
                position: first.records.partition_point(|r| r.timestamp < lower),
            },
            _ => ReadState::FillingGap { next_segment: 0 },
        };

        tracing::debug!(
            key = %store.key(),
            ?start,
            ?end,
            cached_segments = segments.len(),
            "opened history read"
        );

        Self {
            source,
            store,
            options,
            flush_threshold: flush_threshold.max(1),
            start,
            end,
            segments,
            state,
            fetch: None,
            cursor: start,
            buffer: Vec::new(),
            stats: ReadStats::default(),
        }
    }

    pub fn stats(&self) -> ReadStats {
        self.stats
    }

    pub fn is_done(&self) -> bool {
        self.state == ReadState::Done
    }

    /// Next record in chronological order, or `None` once the read is over.
    pub async fn next(&mut self) -> Result<Option<Record>> {
        loop {
            match self.state {
                ReadState::Done => return Ok(None),

                ReadState::ReplayingSegment { segment, position } => {
                    let current = Arc::clone(&self.segments[segment]);
                    match current.records.get(position) {
                        Some(record) => {
                            self.state = ReadState::ReplayingSegment {
                                segment,
                                position: position + 1,
                            };
                            if self.start.is_some_and(|start| record.timestamp < start) {
                                continue;
                            }
                            if self.end.is_some_and(|end| record.timestamp > end) {
                                self.finish()?;
                                return Ok(None);
                            }
                            self.stats.replayed += 1;
                            return Ok(Some(record.clone()));
                        }
                        None => {
                            self.cursor = Some(match self.cursor {
                                Some(cursor) => cursor.max(current.end),
                                None => current.end,
                            });
                            if self.end.is_some_and(|end| current.end >= end) {
                                self.finish()?;
                                return Ok(None);
                            }
                            self.state = ReadState::FillingGap {
                                next_segment: segment + 1,
                            };
                        }
                    }
                }

                ReadState::FillingGap { next_segment } => {
                    let Some(next_start) = self.segments.get(next_segment).map(|s| s.start)
                    else {
                        self.state = ReadState::TrailingFetch;
                        continue;
                    };
                    // Snapshot segments all start at or before `end`, so the
                    // next segment bounds the gap.
                    match self.pull(Some(next_start)).await? {
                        Pulled::Record(record) => return Ok(Some(record)),
                        Pulled::PastEnd => {
                            self.finish()?;
                            return Ok(None);
                        }
                        Pulled::Exhausted => {
                            self.state = ReadState::ReplayingSegment {
                                segment: next_segment,
                                position: 0,
                            };
                        }
                    }
                }

                ReadState::TrailingFetch => match self.pull(self.end).await? {
                    Pulled::Record(record) => return Ok(Some(record)),
                    Pulled::Exhausted | Pulled::PastEnd => {
                        self.finish()?;
                        return Ok(None);
                    }
                },
            }
        }
    }

    /// Adapt the reader into a `Stream`. The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Record>> + 'a
    where
        S: 'a,
    {
        futures::stream::try_unfold(self, |mut reader| async move {
            Ok::<_, CacheError>(reader.next().await?.map(|record| (record, reader)))
        })
    }

    /// Stop reading and commit whatever was fetched but not yet committed.
    pub fn close(mut self) -> Result<ReadStats> {
        if self.state != ReadState::Done {
            self.state = ReadState::Done;
            self.fetch = None;
            self.commit_partial()?;
        }
        Ok(self.stats)
    }

    async fn pull(&mut self, before: Option<Timestamp>) -> Result<Pulled> {
        if self.fetch.is_none() {
            if let (Some(after), Some(before)) = (self.cursor, before) {
                if after >= before {
                    return Ok(Pulled::Exhausted);
                }
            }
            self.stats.fetches += 1;
            tracing::debug!(
                source = self.source.name(),
                key = %self.store.key(),
                after = ?self.cursor,
                ?before,
                "fetching gap"
            );
            let source: &'a S = self.source;
            self.fetch = Some(source.fetch(self.store.key(), self.cursor, before, self.options));
        }
        let Some(stream) = self.fetch.as_mut() else {
            return Ok(Pulled::Exhausted);
        };

        let item = stream.next().await;
        match item {
            None => {
                self.fetch = None;
                Ok(Pulled::Exhausted)
            }
            Some(Err(error)) => {
                self.fetch = None;
                Err(self.fail(error))
            }
            Some(Ok(record)) => {
                if self.end.is_some_and(|end| record.timestamp > end) {
                    self.fetch = None;
                    return Ok(Pulled::PastEnd);
                }
                if before.is_some_and(|before| record.timestamp >= before) {
                    // Source overran the gap; the cached segment takes it from here.
                    self.fetch = None;
                    return Ok(Pulled::Exhausted);
                }

                self.cursor = Some(record.timestamp);
                self.stats.fetched += 1;
                self.buffer.push(record.clone());
                if self.buffer.len() >= self.flush_threshold {
                    self.flush()?;
                }
                Ok(Pulled::Record(record))
            }
        }
    }

    /// Intermediate commit of `[start, last buffered record]`.
    ///
    /// A failed commit ends the read, so no later commit covers the records
    /// it dropped.
    fn flush(&mut self) -> Result<()> {
        let records = std::mem::take(&mut self.buffer);
        let count = records.len();
        match self.store.commit_range(self.start, None, records) {
            Ok(committed) => {
                if committed {
                    self.stats.flushes += 1;
                    tracing::info!(key = %self.store.key(), count, "committed new records to disk");
                }
                Ok(())
            }
            Err(error) => {
                self.state = ReadState::Done;
                self.fetch = None;
                tracing::error!(
                    key = %self.store.key(),
                    %error,
                    dropped = count,
                    "intermediate commit failed, ending history read"
                );
                Err(error)
            }
        }
    }

    /// Final commit when the read reached its natural end.
    fn finish(&mut self) -> Result<()> {
        self.state = ReadState::Done;
        self.fetch = None;
        let records = std::mem::take(&mut self.buffer);

        // Nothing fetched means the request was served entirely from cache.
        if self.stats.fetches == 0 && records.is_empty() {
            return Ok(());
        }
        self.store.commit_range(self.start, self.end, records)?;
        Ok(())
    }

    fn commit_partial(&mut self) -> Result<bool> {
        let records = std::mem::take(&mut self.buffer);
        self.store.commit_range(self.start, None, records)
    }

    /// Commit buffered progress, then hand back the source error.
    fn fail(&mut self, error: CacheError) -> CacheError {
        self.state = ReadState::Done;
        if let Err(commit_error) = self.commit_partial() {
            tracing::error!(
                key = %self.store.key(),
                error = %commit_error,
                "failed to commit progress after source error"
            );
        }
        error
    }
}

impl<S: HistorySource + ?Sized> Drop for HistoryReader<'_, S> {
    fn drop(&mut self) {
        if self.state == ReadState::Done || self.buffer.is_empty() {
            return;
        }
        self.state = ReadState::Done;
        self.fetch = None;
        if let Err(error) = self.commit_partial() {
            tracing::warn!(
                key = %self.store.key(),
                %error,
                "failed to commit history read on drop"
            );
        }
    }
}
