//! Error types for vaultsync-sync.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use vaultsync_core::{ConfigError, ParseError};
use vaultsync_render::RenderError;

/// Failures reported by a [`Fetcher`](crate::source::Fetcher).
///
/// The first three variants are transient and retried with backoff; the
/// rest are fatal for the request that produced them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    #[error("upstream request timed out: {0}")]
    Timeout(String),

    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("upstream rejected credentials: {0}")]
    Auth(String),

    #[error("not found upstream: {0}")]
    NotFound(String),

    #[error("malformed upstream payload: {0}")]
    Parse(#[from] ParseError),

    #[error("upstream error: {0}")]
    Other(String),
}

impl UpstreamError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Unavailable(_)
        )
    }

    /// Server-requested delay, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// A conversion failure for one item.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("conversion failed: {0}")]
pub struct ConvertError(pub String);

impl From<RenderError> for ConvertError {
    fn from(e: RenderError) -> Self {
        Self(e.to_string())
    }
}

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the remote content source.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// An error from the default converter.
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// Invalid or unreadable configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (cache, run records).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Pre-flight checks failed; nothing was fetched or written.
    #[error("pre-flight validation failed: {}", errors.join("; "))]
    Validation { errors: Vec<String> },

    /// A background task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
