//! Error types for vaultsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (permission denied, unreadable file, etc.).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.vaultsync/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The config file did not exist at the expected path.
    #[error("config not found at {path}")]
    NotFound { path: PathBuf },

    /// One or more settings failed validation.
    #[error("invalid configuration: {}", errors.join("; "))]
    Invalid { errors: Vec<String> },
}

/// Errors raised while decoding upstream JSON payloads into domain types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A required field was absent or had the wrong JSON type.
    #[error("{object} payload is missing field '{field}'")]
    MissingField {
        object: &'static str,
        field: &'static str,
    },

    /// A timestamp field was present but not RFC 3339.
    #[error("{object} field '{field}' is not an RFC 3339 timestamp: {value}")]
    InvalidTimestamp {
        object: &'static str,
        field: &'static str,
        value: String,
    },
}
