use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use scrollback_core::{FetchOptions, HistorySource, Record, StreamKey, Timestamp};
use serenity::builder::GetMessages;
use serenity::http::Http;
use serenity::model::channel::{Message, ReactionType};
use serenity::model::id::{ChannelId, MessageId, UserId};

use crate::config::DiscordConfig;
use crate::error::{DiscordError, Result};
use crate::snowflake::{high_snowflake, snowflake_time};

/// Discord caps both message and reaction-user pages at 100.
pub const PAGE_SIZE: u8 = 100;

/// Message history of Discord text channels over the REST API.
///
/// Stream keys are channel ids. Messages are requested oldest-first with
/// `after` pagination; each page costs one request, plus one request per
/// reaction (and per 100 reacting users) when reactions are requested.
#[derive(Clone)]
pub struct DiscordHistory {
    http: Arc<Http>,
}

impl std::fmt::Debug for DiscordHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordHistory").finish_non_exhaustive()
    }
}

/// Where the next page starts.
struct Paging {
    channel: ChannelId,
    after: MessageId,
    before: Option<Timestamp>,
    exhausted: bool,
}

impl DiscordHistory {
    pub fn new(token: &str) -> Self {
        Self::with_http(Arc::new(Http::new(token)))
    }

    pub fn from_config(config: &DiscordConfig) -> Self {
        Self::new(&config.token)
    }

    /// Share an HTTP client (and its rate limiter) with other Discord code.
    pub fn with_http(http: Arc<Http>) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &Arc<Http> {
        &self.http
    }

    /// One page of messages strictly after `paging.after`, oldest first and
    /// clipped to `paging.before`.
    async fn next_page(&self, mut paging: Paging) -> Result<Option<(Vec<Message>, Paging)>> {
        if paging.exhausted {
            return Ok(None);
        }

        let builder = GetMessages::new().after(paging.after).limit(PAGE_SIZE);
        let mut page = paging
            .channel
            .messages(&*self.http, builder)
            .await
            .map_err(|e| DiscordError::api("fetch messages", e))?;

        let Some(settled) = settle_page(&mut page, |message| message.id.get(), paging.before)
        else {
            return Ok(None);
        };
        paging.after = MessageId::new(settled.last_id);
        paging.exhausted = settled.exhausted;

        tracing::trace!(
            channel = %paging.channel,
            count = page.len(),
            after = %paging.after,
            "fetched message page"
        );
        Ok(Some((page, paging)))
    }

    /// Ids of every user who reacted to `message` with `reaction`.
    async fn reaction_users(
        &self,
        channel: ChannelId,
        message: MessageId,
        reaction: &ReactionType,
    ) -> Result<Vec<u64>> {
        let mut users = Vec::new();
        let mut after: Option<UserId> = None;
        loop {
            let page = channel
                .reaction_users(&self.http, message, reaction.clone(), Some(PAGE_SIZE), after)
                .await
                .map_err(|e| DiscordError::api("fetch reaction users", e))?;
            let full = page.len() == usize::from(PAGE_SIZE);
            after = page.last().map(|user| user.id);
            users.extend(page.into_iter().map(|user| user.id.get()));
            if !full || after.is_none() {
                return Ok(users);
            }
        }
    }

    async fn to_record(
        &self,
        channel: ChannelId,
        message: Message,
        options: FetchOptions,
    ) -> Result<Record> {
        let mut record = Record::new(
            message.id.get(),
            snowflake_time(message.id.get()),
            message.author.id.get(),
            message.author.name.clone(),
            message.content.clone(),
        );

        if options.reactions && !message.reactions.is_empty() {
            let mut reactions = BTreeMap::new();
            for reaction in &message.reactions {
                let users = self
                    .reaction_users(channel, message.id, &reaction.reaction_type)
                    .await?;
                reactions.insert(reaction.reaction_type.to_string(), users);
            }
            record = record.with_reactions(reactions);
        }

        if options.mentions {
            record = record
                .with_mentions(message.mentions.iter().map(|user| user.id.get()).collect())
                .with_reference(
                    message
                        .message_reference
                        .as_ref()
                        .and_then(|reference| reference.message_id)
                        .map(|id| id.get()),
                );
        }

        Ok(record)
    }
}

/// What a settled page tells the pager about the next request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SettledPage {
    /// Newest id Discord returned, before any clipping
    last_id: u64,
    exhausted: bool,
}

/// Put a raw page in oldest-first order and drop everything at or after
/// `before`. Returns `None` for an empty page.
///
/// Discord answers newest first regardless of the query direction. A short
/// page or a clipped one ends the paging.
fn settle_page<T>(
    page: &mut Vec<T>,
    id_of: impl Fn(&T) -> u64,
    before: Option<Timestamp>,
) -> Option<SettledPage> {
    page.sort_by_key(&id_of);
    let last_id = id_of(page.last()?);
    let mut exhausted = page.len() < usize::from(PAGE_SIZE);

    if let Some(before) = before {
        let in_range = page.partition_point(|item| snowflake_time(id_of(item)) < before);
        if in_range < page.len() {
            page.truncate(in_range);
            exhausted = true;
        }
    }
    Some(SettledPage { last_id, exhausted })
}

/// Parse a stream key into a channel id.
pub fn channel_id(key: &StreamKey) -> Result<ChannelId> {
    match key.as_str().parse::<u64>() {
        Ok(id) if id != 0 => Ok(ChannelId::new(id)),
        _ => Err(DiscordError::InvalidChannel(key.to_string())),
    }
}

/// Message id to page after; id 0 is not a valid snowflake, so the very
/// beginning of a channel is "after 1".
fn after_id(after: Option<Timestamp>) -> MessageId {
    MessageId::new(after.map_or(0, high_snowflake).max(1))
}

impl HistorySource for DiscordHistory {
    fn name(&self) -> &str {
        "discord"
    }

    fn fetch(
        &self,
        key: &StreamKey,
        after: Option<Timestamp>,
        before: Option<Timestamp>,
        options: FetchOptions,
    ) -> BoxStream<'_, scrollback_core::Result<Record>> {
        let channel = match channel_id(key) {
            Ok(channel) => channel,
            Err(e) => return stream::once(async move { Err(e.into()) }).boxed(),
        };

        tracing::debug!(%channel, ?after, ?before, ?options, "requesting channel history");

        let paging = Paging {
            channel,
            after: after_id(after),
            before,
            exhausted: false,
        };

        stream::try_unfold(paging, move |paging| self.next_page(paging))
            .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, DiscordError>)))
            .try_flatten()
            .and_then(move |message| self.to_record(channel, message, options))
            .map_err(scrollback_core::CacheError::from)
            .boxed()
    }
}
