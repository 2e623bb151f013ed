pub mod cache;
pub mod history;

use chrono::{DateTime, NaiveDate, Utc};
use miette::{Result, miette};
use scrollback_core::{ScrollbackConfig, StreamKey, Timestamp};

/// Parse `--start`/`--end`: RFC 3339 or a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_time(value: &str) -> std::result::Result<Timestamp, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("'{value}' is neither RFC 3339 nor YYYY-MM-DD"))
}

/// Resolve a channel alias or id and check it against the allow-list.
pub fn resolve_channel(config: &ScrollbackConfig, channel: &str) -> Result<StreamKey> {
    let id = config.resolve_channel(channel).ok_or_else(|| {
        miette!(
            help = "Use a numeric channel id or add an alias under [channels] in scrollback.toml",
            "Unknown channel '{channel}'"
        )
    })?;
    if !config.channel_allowed(id) {
        return Err(miette!(
            help = "Add it to discord.allowed_channels in scrollback.toml",
            "Channel {id} is not in the allowed channel list"
        ));
    }
    Ok(StreamKey::from(id))
}
