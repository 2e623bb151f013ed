//! Persistent, ordered set of cached segments for one stream.
//!
//! On disk each stream key owns three possible files in the cache directory:
//!
//! - `<key>.json`: the canonical state
//! - `<key>.json.bak`: the previous state, present only while a commit is
//!   installing a new canonical file (or after a crash during one)
//! - `<key>.json.tmp`: a new state being written, never read back
//!
//! A commit writes and fsyncs the temp file, moves the canonical file to the
//! backup location, renames the temp file into place and finally removes the
//! backup. Loading prefers the canonical file. The backup is only renamed back
//! when the canonical file is missing (a crash between the two renames); if
//! both exist the backup is stale and gets deleted.

use std::fs;
use std::io::Write;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::record::{Record, Timestamp};
use crate::segment::Segment;

/// Bumped whenever the cache file layout changes; older files load as empty.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Lower bound used for commits of reads that started "from the beginning".
pub const HISTORY_ORIGIN: Timestamp = Timestamp::UNIX_EPOCH;

/// Identity of a stream, e.g. a channel id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamKey(String);

impl StreamKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for StreamKey {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for StreamKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Locations of the files backing one stream's cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePaths {
    pub canonical: PathBuf,
    pub backup: PathBuf,
    pub temp: PathBuf,
}

impl CachePaths {
    pub fn new(dir: &Path, key: &StreamKey) -> Self {
        Self {
            canonical: dir.join(format!("{key}.json")),
            backup: dir.join(format!("{key}.json.bak")),
            temp: dir.join(format!("{key}.json.tmp")),
        }
    }

    /// Move the backup over the canonical path after a failed install.
    /// A failure is only logged: the next load restores the backup itself.
    fn put_backup_back(&self) -> bool {
        match fs::rename(&self.backup, &self.canonical) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    path = %self.backup.display(),
                    error = %e,
                    "failed to move cache backup back; next load will restore it"
                );
                false
            }
        }
    }
}

/// Where the segments of a freshly loaded store came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    /// No cache file existed
    Missing,
    /// Canonical file parsed cleanly
    Canonical,
    /// Canonical file was missing and the backup was moved back into place
    RestoredBackup,
    /// A file existed but could not be read or parsed; the store starts empty
    Corrupt,
}

/// What `load` found and cleaned up on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub source: LoadSource,
    pub removed_stale_backup: bool,
    pub removed_temp: bool,
}

/// Result of scanning the store against a requested interval.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Coverage {
    /// Contiguous indices of segments overlapping the interval
    pub overlapping: Option<RangeInclusive<usize>>,
    /// Index of the first segment entirely after the interval
    pub successor: Option<usize>,
}

#[derive(Serialize)]
struct CacheFileRef<'a> {
    version: u32,
    key: &'a StreamKey,
    segments: &'a [Arc<Segment>],
}

#[derive(Deserialize)]
struct CacheFile {
    version: u32,
    key: StreamKey,
    segments: Vec<Arc<Segment>>,
}

/// Ordered, non-overlapping segments for one stream identity.
///
/// Not safe for concurrent writers: two processes committing the same key
/// will race on the rename sequence.
#[derive(Debug)]
pub struct SegmentStore {
    key: StreamKey,
    paths: CachePaths,
    segments: Vec<Arc<Segment>>,
    commits: u64,
}

impl SegmentStore {
    /// Empty store that will persist under `dir` on first commit.
    pub fn empty(dir: &Path, key: StreamKey) -> Self {
        Self {
            paths: CachePaths::new(dir, &key),
            key,
            segments: Vec::new(),
            commits: 0,
        }
    }

    /// Load the cache for `key`, falling back to an empty store on any error.
    pub fn load(dir: &Path, key: StreamKey) -> Self {
        Self::load_with_report(dir, key).0
    }

    pub fn load_with_report(dir: &Path, key: StreamKey) -> (Self, LoadReport) {
        let mut store = Self::empty(dir, key);
        let mut report = LoadReport {
            source: LoadSource::Missing,
            removed_stale_backup: false,
            removed_temp: false,
        };
        let paths = store.paths.clone();

        if paths.temp.exists() {
            match fs::remove_file(&paths.temp) {
                Ok(()) => {
                    tracing::debug!(path = %paths.temp.display(), "removed unfinished cache write");
                    report.removed_temp = true;
                }
                Err(e) => tracing::warn!(
                    path = %paths.temp.display(),
                    error = %e,
                    "failed to remove unfinished cache write"
                ),
            }
        }

        let mut restored = false;
        if paths.backup.exists() {
            if paths.canonical.exists() {
                match fs::remove_file(&paths.backup) {
                    Ok(()) => {
                        tracing::debug!(path = %paths.backup.display(), "removed stale cache backup");
                        report.removed_stale_backup = true;
                    }
                    Err(e) => tracing::warn!(
                        path = %paths.backup.display(),
                        error = %e,
                        "failed to remove stale cache backup"
                    ),
                }
            } else {
                match fs::rename(&paths.backup, &paths.canonical) {
                    Ok(()) => {
                        tracing::info!(
                            key = %store.key,
                            "restored cache from backup left by an interrupted commit"
                        );
                        restored = true;
                    }
                    Err(e) => tracing::warn!(
                        path = %paths.backup.display(),
                        error = %e,
                        "failed to restore cache backup"
                    ),
                }
            }
        }

        let bytes = match fs::read(&paths.canonical) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return (store, report),
            Err(e) => {
                tracing::warn!(path = %paths.canonical.display(), error = %e, "cache unreadable, starting empty");
                report.source = LoadSource::Corrupt;
                return (store, report);
            }
        };

        match decode(&bytes, &store.key) {
            Ok(segments) => {
                tracing::debug!(
                    key = %store.key,
                    segments = segments.len(),
                    "loaded cached segments"
                );
                store.segments = segments;
                report.source = if restored {
                    LoadSource::RestoredBackup
                } else {
                    LoadSource::Canonical
                };
            }
            Err(reason) => {
                tracing::warn!(
                    path = %paths.canonical.display(),
                    %reason,
                    "cache file corrupt, starting empty"
                );
                report.source = LoadSource::Corrupt;
            }
        }

        (store, report)
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn paths(&self) -> &CachePaths {
        &self.paths
    }

    pub fn segments(&self) -> &[Arc<Segment>] {
        &self.segments
    }

    /// Number of successful commits since this store was loaded.
    pub fn commits(&self) -> u64 {
        self.commits
    }

    pub fn record_count(&self) -> usize {
        self.segments.iter().map(|s| s.len()).sum()
    }

    /// Look up a cached record by id, e.g. to resolve a reply reference.
    pub fn find_record(&self, id: u64) -> Option<&Record> {
        self.segments.iter().find_map(|segment| segment.find(id))
    }

    /// Single pass over the segments: which ones overlap `[start, end]` and
    /// which is the first one after it.
    pub fn covering_gap(&self, start: Timestamp, end: Timestamp) -> Coverage {
        let mut coverage = Coverage::default();
        let mut low = None;
        let mut high = None;

        for (index, segment) in self.segments.iter().enumerate() {
            if end < segment.start {
                coverage.successor = Some(index);
                break;
            }
            if segment.overlaps(start, end) {
                low.get_or_insert(index);
                high = Some(index);
            }
        }

        if let (Some(low), Some(high)) = (low, high) {
            coverage.overlapping = Some(low..=high);
        }
        coverage
    }

    /// Snapshot of the segments overlapping `[start, end]`, in order.
    pub fn overlapping(&self, start: Timestamp, end: Option<Timestamp>) -> Vec<Arc<Segment>> {
        self.segments
            .iter()
            .filter(|segment| match end {
                Some(end) => segment.overlaps(start, end),
                None => start <= segment.end,
            })
            .cloned()
            .collect()
    }

    /// Fold `records` covering `[start, end]` into the store.
    ///
    /// `start` defaults to [`HISTORY_ORIGIN`] and `end` to the timestamp of
    /// the last record. With no explicit end and no records there is nothing
    /// to record and the call returns `Ok(false)` without touching disk.
    pub fn commit_range(
        &mut self,
        start: Option<Timestamp>,
        end: Option<Timestamp>,
        records: Vec<Record>,
    ) -> Result<bool> {
        let Some(end) = end.or_else(|| records.last().map(|record| record.timestamp)) else {
            return Ok(false);
        };
        let start = start.unwrap_or(HISTORY_ORIGIN).min(end);
        self.commit(Segment::new(start, end, records))?;
        Ok(true)
    }

    /// Insert or merge `segment` and persist the result.
    ///
    /// The in-memory list is only replaced once the new state is on disk, so
    /// a failed write leaves the store exactly as it was.
    pub fn commit(&mut self, segment: Segment) -> Result<()> {
        let coverage = self.covering_gap(segment.start, segment.end);
        let added = segment.len();

        let next: Vec<Arc<Segment>> = match coverage {
            Coverage {
                overlapping: Some(run),
                ..
            } => {
                let (low, high) = (*run.start(), *run.end());
                let merged = segment.merge(&self.segments[low..=high]);
                let mut next = Vec::with_capacity(self.segments.len() - (high - low));
                next.extend(self.segments[..low].iter().cloned());
                next.push(Arc::new(merged));
                next.extend(self.segments[high + 1..].iter().cloned());
                next
            }
            Coverage {
                successor: Some(index),
                ..
            } => {
                let mut next = self.segments.clone();
                next.insert(index, Arc::new(segment));
                next
            }
            Coverage { .. } => {
                let mut next = self.segments.clone();
                next.push(Arc::new(segment));
                next
            }
        };

        self.persist(&next)?;
        self.segments = next;
        self.commits += 1;

        tracing::debug!(
            key = %self.key,
            added,
            segments = self.segments.len(),
            "committed segment"
        );
        Ok(())
    }

    /// Forget everything cached for this key, on disk and in memory.
    pub fn clear(&mut self) -> Result<()> {
        for path in [&self.paths.canonical, &self.paths.backup, &self.paths.temp] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::io("remove cache file", path, e)),
            }
        }
        self.segments.clear();
        Ok(())
    }

    fn persist(&self, segments: &[Arc<Segment>]) -> Result<()> {
        let paths = &self.paths;
        if let Some(dir) = paths.canonical.parent() {
            fs::create_dir_all(dir).map_err(|e| CacheError::io("create cache directory", dir, e))?;
        }

        let bytes = serde_json::to_vec(&CacheFileRef {
            version: CACHE_FORMAT_VERSION,
            key: &self.key,
            segments,
        })
        .map_err(|cause| CacheError::Serialization {
            data_type: "segment cache".to_string(),
            cause,
        })?;

        {
            let mut file = fs::File::create(&paths.temp)
                .map_err(|e| CacheError::io("create cache temp file", &paths.temp, e))?;
            file.write_all(&bytes)
                .map_err(|e| CacheError::io("write cache temp file", &paths.temp, e))?;
            file.sync_all()
                .map_err(|e| CacheError::io("sync cache temp file", &paths.temp, e))?;
        }

        let had_canonical = paths.canonical.exists();
        if had_canonical {
            fs::rename(&paths.canonical, &paths.backup)
                .map_err(|e| CacheError::io("move cache to backup", &paths.canonical, e))?;
        }

        if let Err(e) = fs::rename(&paths.temp, &paths.canonical) {
            // Put the previous state back so the next load sees it as canonical.
            if had_canonical {
                paths.put_backup_back();
            }
            return Err(CacheError::io("install cache file", &paths.canonical, e));
        }

        if had_canonical {
            if let Err(e) = fs::remove_file(&paths.backup) {
                tracing::warn!(
                    path = %paths.backup.display(),
                    error = %e,
                    "failed to remove cache backup; it is safe to delete"
                );
            }
        }
        Ok(())
    }
}

fn decode(bytes: &[u8], key: &StreamKey) -> std::result::Result<Vec<Arc<Segment>>, String> {
    if bytes.is_empty() {
        return Err("empty file".to_string());
    }
    let file: CacheFile = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    if file.version != CACHE_FORMAT_VERSION {
        return Err(format!(
            "unsupported cache version {} (expected {})",
            file.version, CACHE_FORMAT_VERSION
        ));
    }
    if &file.key != key {
        return Err(format!("cache belongs to stream {}", file.key));
    }
    if !is_well_formed(&file.segments) {
        return Err("segments overlap or are out of order".to_string());
    }
    Ok(file.segments)
}

fn is_well_formed(segments: &[Arc<Segment>]) -> bool {
    let each_valid = segments.iter().all(|segment| {
        segment.start <= segment.end
            && segment.records.iter().all(|r| segment.contains(r.timestamp))
            && segment
                .records
                .windows(2)
                .all(|pair| pair[0].timestamp <= pair[1].timestamp)
    });
    let ordered = segments.windows(2).all(|pair| pair[0].end < pair[1].start);
    each_valid && ordered
}
