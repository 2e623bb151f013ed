//! Closed time intervals of fully-known history.

use std::borrow::Borrow;

use serde::{Deserialize, Serialize};

use crate::record::{Record, Timestamp};

/// A closed interval `[start, end]` and every record known to fall inside it.
///
/// Completeness holds only inside the interval: a segment says nothing about
/// records before `start` or after `end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start: Timestamp,
    pub end: Timestamp,
    /// Sorted non-decreasing by timestamp, all within `[start, end]`
    pub records: Vec<Record>,
}

impl Segment {
    pub fn new(start: Timestamp, end: Timestamp, records: Vec<Record>) -> Self {
        debug_assert!(start <= end, "segment start {start} after end {end}");
        Self {
            start,
            end,
            records,
        }
    }

    /// Inclusive on both sides, so `[a, b]` and `[b, c]` overlap.
    pub fn overlaps(&self, start: Timestamp, end: Timestamp) -> bool {
        start <= self.end && self.start <= end
    }

    pub fn contains(&self, timestamp: Timestamp) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find(&self, id: u64) -> Option<&Record> {
        self.records.iter().find(|record| record.id == id)
    }

    /// Merge a contiguous run of segments into this one.
    ///
    /// `others` must be ascending and non-overlapping among themselves (as they
    /// are inside a store), so their concatenated records are already sorted.
    /// The result spans every input interval and its records are a stable
    /// two-way merge: on equal timestamps records from `self` come first.
    pub fn merge<S: Borrow<Segment>>(self, others: &[S]) -> Segment {
        let Segment {
            mut start,
            mut end,
            records: ours,
        } = self;

        let mut total = ours.len();
        for other in others {
            let other = other.borrow();
            start = start.min(other.start);
            end = end.max(other.end);
            total += other.records.len();
        }

        let mut theirs = others
            .iter()
            .flat_map(|segment| segment.borrow().records.iter())
            .peekable();
        let mut ours = ours.into_iter().peekable();
        let mut records = Vec::with_capacity(total);

        loop {
            let take_ours = match (ours.peek(), theirs.peek()) {
                (Some(a), Some(b)) => a.timestamp <= b.timestamp,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            if take_ours {
                records.extend(ours.next());
            } else {
                records.extend(theirs.next().cloned());
            }
        }

        Segment {
            start,
            end,
            records,
        }
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}, {}, [{}]}}", self.start, self.end, self.records.len())
    }
}
