//! A single captured message from a channel's history.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source-authoritative creation time of a record.
pub type Timestamp = DateTime<Utc>;

/// One message as it was captured at fetch time.
///
/// Records are never mutated after construction. Enrichment fields
/// (`reactions`, `mentions`, `reference`) are only filled in when the read
/// that fetched the record asked for them, so an empty map does not mean the
/// message had no reactions unless the read requested them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Source message id
    pub id: u64,
    pub timestamp: Timestamp,
    pub author_id: u64,
    pub author: String,
    pub content: String,
    /// Emoji name -> ids of users who reacted with it
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reactions: BTreeMap<String, Vec<u64>>,
    /// Ids of users mentioned in the content
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<u64>,
    /// Id of the message this one replies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<u64>,
}

impl Record {
    pub fn new(
        id: u64,
        timestamp: Timestamp,
        author_id: u64,
        author: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id,
            timestamp,
            author_id,
            author: author.into(),
            content: content.into(),
            reactions: BTreeMap::new(),
            mentions: Vec::new(),
            reference: None,
        }
    }

    pub fn with_reactions(mut self, reactions: BTreeMap<String, Vec<u64>>) -> Self {
        self.reactions = reactions;
        self
    }

    pub fn with_mentions(mut self, mentions: Vec<u64>) -> Self {
        self.mentions = mentions;
        self
    }

    pub fn with_reference(mut self, reference: Option<u64>) -> Self {
        self.reference = reference;
        self
    }

    pub fn is_reply(&self) -> bool {
        self.reference.is_some()
    }

    /// Whether `user_id` reacted to this record with an emoji whose name contains `emoji`.
    pub fn reacted_by(&self, user_id: u64, emoji: &str) -> bool {
        self.reactions
            .iter()
            .any(|(name, users)| name.contains(emoji) && users.contains(&user_id))
    }

    /// Total number of reactions across all emoji.
    pub fn reaction_count(&self) -> usize {
        self.reactions.values().map(Vec::len).sum()
    }
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Record{{{} @ {}: \"{}\"}}",
            self.author, self.timestamp, self.content
        )
    }
}
