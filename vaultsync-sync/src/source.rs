//! Collaborator seams: where items come from and how they become documents.

use async_trait::async_trait;
use serde_json::Value;

use vaultsync_core::{ContentTree, ConversionOutput, ItemId, ItemSummary};
use vaultsync_render::{LinkReport, MarkdownConverter};

use crate::error::{ConvertError, UpstreamError};

/// One listing request. `filter` and `sorts` are passed through to the
/// upstream query API untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub filter: Option<Value>,
    pub sorts: Option<Value>,
    pub cursor: Option<String>,
    pub page_size: usize,
}

/// One page of listing results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPage {
    pub items: Vec<ItemSummary>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Remote content source.
///
/// Implementations must be safe to call concurrently; the executor issues
/// `get_item_content` calls in parallel.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Cheap reachability and credential check.
    async fn test_connection(&self) -> Result<(), UpstreamError>;

    async fn list_items(&self, query: &ListQuery) -> Result<ItemPage, UpstreamError>;

    /// Full content of one item, children resolved.
    async fn get_item_content(&self, id: &ItemId) -> Result<ContentTree, UpstreamError>;
}

/// Content tree → document. Treated as pure and re-entrant.
pub trait Converter: Send + Sync {
    fn convert(&self, tree: &ContentTree) -> Result<ConversionOutput, ConvertError>;

    /// The filename `convert` would produce, without fetching content.
    fn filename_for(&self, item: &ItemSummary) -> String;

    /// Start of a sync run. Clears per-run link bookkeeping.
    fn begin_run(&self) {}

    /// `id` will exist in the vault as `filename`; links to it resolve.
    fn register_page(&self, _id: &ItemId, _title: &str, _filename: &str) {}

    /// Links seen since [`Converter::begin_run`], if the converter tracks them.
    fn link_report(&self) -> Option<LinkReport> {
        None
    }
}

impl Converter for MarkdownConverter {
    fn convert(&self, tree: &ContentTree) -> Result<ConversionOutput, ConvertError> {
        Ok(MarkdownConverter::convert(self, tree)?)
    }

    fn filename_for(&self, item: &ItemSummary) -> String {
        MarkdownConverter::filename_for(self, item)
    }

    fn begin_run(&self) {
        self.links().reset();
    }

    fn register_page(&self, id: &ItemId, title: &str, filename: &str) {
        MarkdownConverter::register_page(self, id, title, filename);
    }

    fn link_report(&self) -> Option<LinkReport> {
        Some(self.links().report())
    }
}
