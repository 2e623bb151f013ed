//! Discord credentials.
//!
//! The token is a secret and only ever comes from the environment, never
//! from `scrollback.toml`. Channel restrictions live in the TOML file under
//! `[discord]`.

use crate::error::{DiscordError, Result};

#[derive(Clone)]
pub struct DiscordConfig {
    /// Bot token, without the `Bot ` prefix
    pub token: String,
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("token", &"<redacted>")
            .finish()
    }
}

impl DiscordConfig {
    /// Load from `DISCORD_TOKEN`. Returns `None` if it is unset or blank.
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("DISCORD_TOKEN").ok()?;
        Self::from_token(&token)
    }

    /// Like [`from_env`](Self::from_env), but a missing token is an error.
    pub fn require_env() -> Result<Self> {
        Self::from_env().ok_or(DiscordError::MissingToken)
    }

    fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        let token = token.strip_prefix("Bot ").unwrap_or(token).trim();
        if token.is_empty() {
            return None;
        }
        Some(Self {
            token: token.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_normalization() {
        assert_eq!(
            DiscordConfig::from_token("  Bot abc.def  ").map(|c| c.token),
            Some("abc.def".to_string())
        );
        assert_eq!(
            DiscordConfig::from_token("abc.def").map(|c| c.token),
            Some("abc.def".to_string())
        );
        assert!(DiscordConfig::from_token("   ").is_none());
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = DiscordConfig::from_token("secret").unwrap();
        assert!(!format!("{config:?}").contains("secret"));
    }
}
