//! Remote history sources.

use std::sync::Arc;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::record::{Record, Timestamp};
use crate::store::StreamKey;

/// Optional per-record enrichment a read asks the source for.
///
/// Enrichment usually costs extra requests per record, so sources only fill
/// in what was asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOptions {
    /// Resolve which users reacted with each emoji
    #[serde(default)]
    pub reactions: bool,
    /// Capture user mentions and reply references
    #[serde(default)]
    pub mentions: bool,
}

impl FetchOptions {
    pub fn all() -> Self {
        Self {
            reactions: true,
            mentions: true,
        }
    }
}

/// A paginated, append-only remote history.
///
/// `fetch` yields records with `after < timestamp < before`, oldest first and
/// strictly increasing. `after = None` starts at the beginning of the stream;
/// `before = None` runs to the live end. Retries and timeouts are the
/// source's own business; errors are surfaced as they happen.
pub trait HistorySource: Send + Sync {
    /// Human-readable name used in logs and errors.
    fn name(&self) -> &str;

    fn fetch(
        &self,
        key: &StreamKey,
        after: Option<Timestamp>,
        before: Option<Timestamp>,
        options: FetchOptions,
    ) -> BoxStream<'_, Result<Record>>;
}

impl<T: HistorySource + ?Sized> HistorySource for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch(
        &self,
        key: &StreamKey,
        after: Option<Timestamp>,
        before: Option<Timestamp>,
        options: FetchOptions,
    ) -> BoxStream<'_, Result<Record>> {
        (**self).fetch(key, after, before, options)
    }
}
