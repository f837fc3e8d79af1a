//! vaultsync core library: domain types, documents, configuration, errors.
//!
//! - [`types`]: item identifiers, summaries and typed properties
//! - [`content`]: owned block trees decoded from upstream JSON
//! - [`document`]: Markdown documents, filename rules, file policy
//! - [`config`]: YAML configuration with env overrides and validation
//! - [`error`]: [`ConfigError`], [`ParseError`]

pub mod config;
pub mod content;
pub mod document;
pub mod error;
pub mod types;

pub use config::{AppConfig, BrokenLinkMode, InternalLinkMode, UnsupportedPolicy};
pub use content::{Block, BlockKind, ContentTree, MediaKind, RichText};
pub use document::{ConversionOutput, Document, FilePolicy};
pub use error::{ConfigError, ParseError};
pub use types::{ItemId, ItemSummary, PropertyValue, RevisionToken};
