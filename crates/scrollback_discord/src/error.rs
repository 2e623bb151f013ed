use miette::Diagnostic;
use scrollback_core::CacheError;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum DiscordError {
    #[error("Discord API error: {operation} failed")]
    #[diagnostic(
        code(scrollback_discord::api_error),
        help("Check that the bot token is valid and the bot can read this channel's history")
    )]
    Api {
        operation: String,
        #[source]
        cause: serenity::Error,
    },

    #[error("Invalid channel id '{0}'")]
    #[diagnostic(
        code(scrollback_discord::invalid_channel),
        help("Discord channel ids are non-zero 64-bit integers")
    )]
    InvalidChannel(String),

    #[error("No Discord token configured")]
    #[diagnostic(
        code(scrollback_discord::missing_token),
        help("Set DISCORD_TOKEN in the environment or in a .env file")
    )]
    MissingToken,
}

pub type Result<T> = std::result::Result<T, DiscordError>;

impl DiscordError {
    pub fn api(operation: impl Into<String>, cause: serenity::Error) -> Self {
        Self::Api {
            operation: operation.into(),
            cause,
        }
    }
}

impl From<DiscordError> for CacheError {
    fn from(error: DiscordError) -> Self {
        let operation = match &error {
            DiscordError::Api { operation, .. } => operation.clone(),
            DiscordError::InvalidChannel(_) => "resolve channel".to_string(),
            DiscordError::MissingToken => "authenticate".to_string(),
        };
        CacheError::source_error("discord", operation, error)
    }
}
