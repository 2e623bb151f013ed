//! Configuration system for Scrollback
//!
//! Settings live in a TOML file (`scrollback.toml` by default). Secrets such
//! as the Discord token are never read from it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, ConfigError, Result};
use crate::reader::DEFAULT_FLUSH_THRESHOLD;

/// Where segment caches are kept and how often long reads commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding one cache file per stream.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    /// Buffered records that trigger an intermediate commit.
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }
}

impl CacheConfig {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn with_flush_threshold(mut self, flush_threshold: usize) -> Self {
        self.flush_threshold = flush_threshold;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.flush_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.flush_threshold".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scrollback")
}

fn default_flush_threshold() -> usize {
    DEFAULT_FLUSH_THRESHOLD
}

fn default_log_interval() -> f64 {
    1.0
}

/// Discord options in scrollback.toml (non-sensitive)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DiscordAppConfig {
    /// Channel ids the CLI may read; unrestricted when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_channels: Option<Vec<u64>>,
}

/// Top-level configuration for Scrollback
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScrollbackConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    /// Seconds between progress log lines during long reads.
    #[serde(default = "default_log_interval")]
    pub log_interval_secs: f64,

    /// Friendly channel names: `general = 704196071881965589`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub channels: BTreeMap<String, u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord: Option<DiscordAppConfig>,
}

impl Default for ScrollbackConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            log_interval_secs: default_log_interval(),
            channels: BTreeMap::new(),
            discord: None,
        }
    }
}

impl ScrollbackConfig {
    /// Resolve a channel alias from `[channels]`, or parse a raw id.
    pub fn resolve_channel(&self, name_or_id: &str) -> Option<u64> {
        self.channels
            .get(name_or_id)
            .copied()
            .or_else(|| name_or_id.parse().ok())
    }

    /// Whether the configured allow-list permits reading `channel_id`.
    pub fn channel_allowed(&self, channel_id: u64) -> bool {
        match self
            .discord
            .as_ref()
            .and_then(|d| d.allowed_channels.as_ref())
        {
            Some(allowed) => allowed.contains(&channel_id),
            None => true,
        }
    }
}

/// Resolve a path relative to a base directory
/// If the path is absolute, return it as-is
fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Load configuration from a TOML file
pub async fn load_config(path: &Path) -> Result<ScrollbackConfig> {
    let content =
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CacheError::Configuration {
                config_path: path.display().to_string(),
                field: "file".to_string(),
                expected: "readable TOML file".to_string(),
                cause: ConfigError::Io(e.to_string()),
            })?;

    let mut config: ScrollbackConfig =
        toml::from_str(&content).map_err(|e| CacheError::Configuration {
            config_path: path.display().to_string(),
            field: "content".to_string(),
            expected: "valid TOML configuration".to_string(),
            cause: ConfigError::TomlParse(e.to_string()),
        })?;

    config
        .cache
        .validate()
        .map_err(|cause| CacheError::Configuration {
            config_path: path.display().to_string(),
            field: "cache.flush_threshold".to_string(),
            expected: "a positive number of records".to_string(),
            cause,
        })?;

    // Resolve paths relative to the config file's directory
    let base_dir = path.parent().unwrap_or(Path::new("."));
    config.cache.dir = resolve_path(base_dir, &config.cache.dir);

    Ok(config)
}

/// Save configuration to a TOML file
pub async fn save_config(config: &ScrollbackConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CacheError::Configuration {
                config_path: parent.display().to_string(),
                field: "directory".to_string(),
                expected: "writable directory".to_string(),
                cause: ConfigError::Io(e.to_string()),
            })?;
    }

    let content = toml::to_string_pretty(config).map_err(|e| CacheError::Configuration {
        config_path: path.display().to_string(),
        field: "serialization".to_string(),
        expected: "serializable config structure".to_string(),
        cause: ConfigError::TomlSerialize(e.to_string()),
    })?;

    tokio::fs::write(path, content)
        .await
        .map_err(|e| CacheError::Configuration {
            config_path: path.display().to_string(),
            field: "file".to_string(),
            expected: "writable file location".to_string(),
            cause: ConfigError::Io(e.to_string()),
        })?;

    Ok(())
}

/// Standard config file locations
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("scrollback.toml")];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("scrollback").join("config.toml"));
    }
    paths
}

/// Load from the first standard location that exists, or defaults.
pub async fn load_config_from_standard_locations() -> Result<ScrollbackConfig> {
    for path in config_paths() {
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::info!("Loading config from: {:?}", path);
            return load_config(&path).await;
        }
    }
    tracing::debug!("No config file found, using defaults");
    Ok(ScrollbackConfig::default())
}
