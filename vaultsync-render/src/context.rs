//! Template context built from an item summary.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use vaultsync_core::types::ItemSummary;

use crate::error::RenderError;

/// Values available to the page and filename templates.
#[derive(Debug, Clone, Serialize)]
pub struct PageContext {
    pub id: String,
    pub title: String,
    pub url: Option<String>,
    pub created_time: String,
    pub last_edited_time: String,
    /// Creation date as `YYYY-MM-DD`.
    pub date: String,
    pub properties: BTreeMap<String, Value>,
    /// Rendered Markdown body; empty when building filenames.
    pub content: String,
}

impl PageContext {
    pub fn from_item(item: &ItemSummary) -> Self {
        Self {
            id: item.id.0.clone(),
            title: item.title.clone(),
            url: item.url.clone(),
            created_time: item.created_time.to_rfc3339(),
            last_edited_time: item.last_edited_time.to_rfc3339(),
            date: item.created_time.format("%Y-%m-%d").to_string(),
            properties: item
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.to_plain()))
                .collect(),
            content: String::new(),
        }
    }

    pub fn with_content(mut self, content: String) -> Self {
        self.content = content;
        self
    }

    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        Ok(tera::Context::from_serialize(self)?)
    }
}
