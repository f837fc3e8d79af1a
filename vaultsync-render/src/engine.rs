//! Tera rendering engine: [`MarkdownConverter`].
//!
//! | Template        | Purpose                                           |
//! |-----------------|---------------------------------------------------|
//! | `page.md.tera`  | document body: title heading + converted blocks  |
//! | `filename`      | filename stem, from `sync.file_naming`            |

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value as YamlValue};
use tera::Tera;

use vaultsync_core::config::SyncConfig;
use vaultsync_core::document::{sanitize_filename, MAX_FILENAME_LEN};
use vaultsync_core::{
    BrokenLinkMode, ContentTree, ConversionOutput, Document, FilePolicy, InternalLinkMode,
    ItemId, ItemSummary, PropertyValue, UnsupportedPolicy,
};

use crate::context::PageContext;
use crate::error::RenderError;
use crate::links::LinkResolver;
use crate::markdown::render_blocks;

pub const PAGE_TEMPLATE: &str = "page.md.tera";
pub const FILENAME_TEMPLATE: &str = "filename";

// ---------------------------------------------------------------------------
// Embedded templates: baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[(PAGE_TEMPLATE, include_str!("templates/page.md.tera"))];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io {
        path: path.into(),
        source,
    }
}

fn normalize_template_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

/// `.tera` files directly inside `dir`, keyed by normalised file name.
fn load_user_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut templates = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("tera") {
            continue;
        }
        let name = normalize_template_name(Path::new(&entry.file_name()));
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((name, contents));
    }
    Ok(templates)
}

fn build_tera(file_naming: &str, user_template_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: HashMap<String, String> = TPLS
        .iter()
        .map(|(name, content)| (name.to_string(), content.to_string()))
        .collect();
    if let Some(dir) = user_template_dir {
        for (name, content) in load_user_templates(dir)? {
            tracing::debug!(template = %name, dir = %dir.display(), "using template override");
            templates.insert(name, content);
        }
    }
    templates.insert(FILENAME_TEMPLATE.to_string(), file_naming.to_string());

    let mut tera = Tera::default();
    tera.add_raw_templates(templates.into_iter().collect::<Vec<_>>())?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// MarkdownConverter
// ---------------------------------------------------------------------------

/// Conversion settings, usually taken from the `sync` config section.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertOptions {
    pub file_naming: String,
    pub include_properties: bool,
    pub unsupported: UnsupportedPolicy,
    pub file_policy: FilePolicy,
    pub template_dir: Option<PathBuf>,
    pub internal_links: InternalLinkMode,
    pub broken_links: BrokenLinkMode,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl ConvertOptions {
    pub fn from_config(sync: &SyncConfig) -> Self {
        Self {
            file_naming: sync.file_naming.clone(),
            include_properties: sync.include_properties,
            unsupported: sync.unsupported_blocks,
            file_policy: sync.file_policy(),
            template_dir: sync.template_dir.clone(),
            internal_links: sync.internal_links,
            broken_links: sync.broken_links,
        }
    }
}

/// Converts content trees into Markdown documents with YAML frontmatter.
pub struct MarkdownConverter {
    tera: Tera,
    options: ConvertOptions,
    links: LinkResolver,
}

impl MarkdownConverter {
    /// Compile the embedded templates, any overrides, and the filename
    /// pattern. An invalid pattern fails here rather than per item.
    pub fn new(options: ConvertOptions) -> Result<Self, RenderError> {
        let tera = build_tera(&options.file_naming, options.template_dir.as_deref())?;
        let links = LinkResolver::new(options.internal_links, options.broken_links);
        Ok(Self {
            tera,
            options,
            links,
        })
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    pub fn links(&self) -> &LinkResolver {
        &self.links
    }

    /// Make `id` a link target, stored as `filename`.
    pub fn register_page(&self, id: &ItemId, title: &str, filename: &str) {
        self.links.register(id, title, filename);
    }

    /// Sanitized `<stem>.md` for `item`. Falls back to the item id when the
    /// pattern renders empty or fails.
    pub fn filename_for(&self, item: &ItemSummary) -> String {
        let rendered = PageContext::from_item(item)
            .to_tera_context()
            .and_then(|ctx| Ok(self.tera.render(FILENAME_TEMPLATE, &ctx)?));
        let stem = match rendered {
            Ok(s) if !s.trim().is_empty() => s.trim().to_string(),
            Ok(_) => item.id.0.clone(),
            Err(e) => {
                tracing::warn!(item = %item.id, error = %e, "filename pattern failed; using item id");
                item.id.0.clone()
            }
        };
        format!("{}.md", sanitize_filename(&stem, MAX_FILENAME_LEN))
    }

    /// Convert one content tree.
    pub fn convert(&self, tree: &ContentTree) -> Result<ConversionOutput, RenderError> {
        let item = &tree.item;
        let blocks = render_blocks(&tree.blocks, self.options.unsupported, Some(&self.links));
        let ctx = PageContext::from_item(item)
            .with_content(blocks.markdown)
            .to_tera_context()?;
        let mut body = self.tera.render(PAGE_TEMPLATE, &ctx)?.trim_end().to_string();
        body.push('\n');

        let mut warnings = blocks.warnings;
        let frontmatter = self.frontmatter(item, &mut warnings);
        let document = Document {
            filename: self.filename_for(item),
            frontmatter,
            body,
        };
        warnings.extend(document.validate(&self.options.file_policy));

        Ok(ConversionOutput {
            document,
            warnings,
            unsupported: blocks.unsupported,
        })
    }

    fn frontmatter(&self, item: &ItemSummary, warnings: &mut Vec<String>) -> Mapping {
        let mut fm = Mapping::new();
        fm.insert("notion_id".into(), item.id.0.clone().into());
        fm.insert("created_time".into(), item.created_time.to_rfc3339().into());
        fm.insert(
            "last_edited_time".into(),
            item.last_edited_time.to_rfc3339().into(),
        );
        fm.insert("archived".into(), item.archived.into());
        if let Some(url) = &item.url {
            fm.insert("url".into(), url.clone().into());
        }
        if !self.options.include_properties {
            return fm;
        }

        for (name, prop) in &item.properties {
            if matches!(prop, PropertyValue::Title(_)) || fm.contains_key(name.as_str()) {
                continue;
            }
            let plain = prop.to_plain();
            if plain.is_null() {
                continue;
            }
            match serde_yaml::to_value(&plain) {
                Ok(value) => {
                    fm.insert(YamlValue::from(name.as_str()), value);
                }
                Err(e) => warnings.push(format!("property '{name}' skipped: {e}")),
            }
        }
        fm
    }
}
