//! # vaultsync-render
//!
//! Converts content trees into Markdown documents for an Obsidian vault.
//!
//! Block rendering lives in [`markdown`]; the document envelope and the
//! filename pattern are tera templates compiled once by [`MarkdownConverter`].
//! Links between synced pages are rewritten by [`links::LinkResolver`].

pub mod context;
pub mod engine;
pub mod error;
pub mod links;
pub mod markdown;

pub use context::PageContext;
pub use engine::{ConvertOptions, MarkdownConverter};
pub use error::RenderError;
pub use links::{LinkKind, LinkReport, LinkResolver};
