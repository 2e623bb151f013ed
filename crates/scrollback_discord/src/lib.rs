//! Scrollback Discord - channel history source
//!
//! Implements [`scrollback_core::HistorySource`] for Discord text channels
//! using serenity's HTTP client. No gateway connection is opened; history is
//! read page by page over REST.
//!
//! ## Configuration
//!
//! The bot token comes from `DISCORD_TOKEN` via [`DiscordConfig::from_env`].
//! It should be loaded once at startup and passed to [`DiscordHistory`].

pub mod config;
pub mod error;
pub mod snowflake;
pub mod source;

pub use config::DiscordConfig;
pub use error::{DiscordError, Result};
pub use source::DiscordHistory;

// Re-export serenity for convenience
pub use serenity;
