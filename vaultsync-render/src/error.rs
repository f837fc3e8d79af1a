//! Error types for vaultsync-render.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while converting content into documents.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Tera template engine error.
    #[error("template engine error: {0}")]
    Tera(#[from] tera::Error),

    /// JSON serialization error (building tera context).
    #[error("context serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Frontmatter could not be encoded as YAML.
    #[error("frontmatter error: {0}")]
    Frontmatter(#[from] serde_yaml::Error),

    /// Filesystem error while loading user templates.
    #[error("template io error at {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}
