use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::Timestamp;

/// Configuration-specific errors
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for field {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Diagnostic, Debug)]
pub enum CacheError {
    #[error("IO error: {operation} failed for {}", path.display())]
    #[diagnostic(
        code(scrollback_core::io_error),
        help("Check permissions and free space in the cache directory")
    )]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },

    #[error("Serialization error")]
    #[diagnostic(
        code(scrollback_core::serialization_error),
        help("Failed to serialize/deserialize {data_type}")
    )]
    Serialization {
        data_type: String,
        #[source]
        cause: serde_json::Error,
    },

    #[error("Invalid history range: start {start} is not before end {end}")]
    #[diagnostic(
        code(scrollback_core::invalid_range),
        help("Pass a start timestamp strictly earlier than the end timestamp, or omit one of them")
    )]
    InvalidRange { start: Timestamp, end: Timestamp },

    #[error("Source error in {source_name}: {operation} failed")]
    #[diagnostic(
        code(scrollback_core::source_error),
        help("The remote history source failed; progress read so far has been cached")
    )]
    Source {
        source_name: String,
        operation: String,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Configuration error for field '{field}'")]
    #[diagnostic(
        code(scrollback_core::configuration_error),
        help("Check configuration file at {config_path}\nExpected: {expected}")
    )]
    Configuration {
        config_path: String,
        field: String,
        expected: String,
        #[source]
        cause: ConfigError,
    },
}

pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    pub fn io(operation: impl Into<String>, path: &Path, cause: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.to_path_buf(),
            cause,
        }
    }

    pub fn source_error(
        source_name: impl Into<String>,
        operation: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Source {
            source_name: source_name.into(),
            operation: operation.into(),
            cause: Box::new(cause),
        }
    }

    /// Whether this error came from the remote source rather than the cache itself.
    pub fn is_source_error(&self) -> bool {
        matches!(self, CacheError::Source { .. })
    }
}
