//! Content trees: the full body of an item as an owned tree of blocks.
//!
//! Every upstream block type the converter understands has its own
//! [`BlockKind`] variant. Anything else decodes to [`BlockKind::Unknown`]
//! with the raw payload kept, so new upstream types never fail a decode.

use serde_json::Value;

use crate::types::ItemSummary;

// ---------------------------------------------------------------------------
// Rich text
// ---------------------------------------------------------------------------

/// Inline formatting flags on a run of text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotations {
    pub bold: bool,
    pub italic: bool,
    pub strikethrough: bool,
    pub underline: bool,
    pub code: bool,
}

/// One run of formatted text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RichText {
    pub plain_text: String,
    pub href: Option<String>,
    pub annotations: Annotations,
}

impl RichText {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            plain_text: text.into(),
            ..Self::default()
        }
    }

    pub fn from_api(v: &Value) -> Self {
        let ann = v.get("annotations").unwrap_or(&Value::Null);
        let flag = |name: &str| ann.get(name).and_then(Value::as_bool).unwrap_or(false);
        Self {
            plain_text: v
                .get("plain_text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            href: v.get("href").and_then(Value::as_str).map(str::to_string),
            annotations: Annotations {
                bold: flag("bold"),
                italic: flag("italic"),
                strikethrough: flag("strikethrough"),
                underline: flag("underline"),
                code: flag("code"),
            },
        }
    }
}

/// Concatenated plain text of a rich-text run list.
pub fn plain_text(runs: &[RichText]) -> String {
    runs.iter().map(|r| r.plain_text.as_str()).collect()
}

fn rich_list(v: Option<&Value>) -> Vec<RichText> {
    v.and_then(Value::as_array)
        .map(|runs| runs.iter().map(RichText::from_api).collect())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

/// The typed payload of one block.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    Paragraph { text: Vec<RichText> },
    Heading { level: u8, text: Vec<RichText> },
    BulletedListItem { text: Vec<RichText> },
    NumberedListItem { text: Vec<RichText> },
    ToDo { text: Vec<RichText>, checked: bool },
    Toggle { text: Vec<RichText> },
    Code { text: Vec<RichText>, language: String },
    Quote { text: Vec<RichText> },
    Callout { text: Vec<RichText>, icon: Option<String> },
    Divider,
    /// Image, video, file and pdf blocks: a hosted or external asset.
    Media { kind: MediaKind, url: String, caption: Vec<RichText> },
    /// Bookmark, embed and link preview blocks.
    Link { url: String, caption: Vec<RichText> },
    Equation { expression: String },
    Table { has_column_header: bool },
    TableRow { cells: Vec<Vec<RichText>> },
    ColumnList,
    Column,
    ChildPage { title: String },
    ChildDatabase { title: String },
    LinkToPage { target: String },
    SyncedBlock,
    TableOfContents,
    Breadcrumb,
    Unknown { kind: String, raw: Value },
}

/// Asset flavour of a [`BlockKind::Media`] block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    File,
    Pdf,
}

impl BlockKind {
    /// The upstream type name, used for statistics and placeholders.
    pub fn name(&self) -> &str {
        match self {
            Self::Paragraph { .. } => "paragraph",
            Self::Heading { level: 1, .. } => "heading_1",
            Self::Heading { level: 2, .. } => "heading_2",
            Self::Heading { .. } => "heading_3",
            Self::BulletedListItem { .. } => "bulleted_list_item",
            Self::NumberedListItem { .. } => "numbered_list_item",
            Self::ToDo { .. } => "to_do",
            Self::Toggle { .. } => "toggle",
            Self::Code { .. } => "code",
            Self::Quote { .. } => "quote",
            Self::Callout { .. } => "callout",
            Self::Divider => "divider",
            Self::Media { kind, .. } => match kind {
                MediaKind::Image => "image",
                MediaKind::Video => "video",
                MediaKind::File => "file",
                MediaKind::Pdf => "pdf",
            },
            Self::Link { .. } => "bookmark",
            Self::Equation { .. } => "equation",
            Self::Table { .. } => "table",
            Self::TableRow { .. } => "table_row",
            Self::ColumnList => "column_list",
            Self::Column => "column",
            Self::ChildPage { .. } => "child_page",
            Self::ChildDatabase { .. } => "child_database",
            Self::LinkToPage { .. } => "link_to_page",
            Self::SyncedBlock => "synced_block",
            Self::TableOfContents => "table_of_contents",
            Self::Breadcrumb => "breadcrumb",
            Self::Unknown { kind, .. } => kind,
        }
    }
}

/// One node of a content tree. Children are owned.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: String,
    pub has_children: bool,
    pub kind: BlockKind,
    pub children: Vec<Block>,
}

impl Block {
    pub fn new(kind: BlockKind) -> Self {
        Self {
            id: String::new(),
            has_children: false,
            kind,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<Block>) -> Self {
        self.has_children = !children.is_empty();
        self.children = children;
        self
    }

    /// Decode one upstream block object. Children are fetched separately and
    /// attached by the caller.
    pub fn from_api(v: &Value) -> Self {
        let kind_name = v.get("type").and_then(Value::as_str).unwrap_or("unknown");
        let body = v.get(kind_name).unwrap_or(&Value::Null);
        let text = || rich_list(body.get("rich_text"));
        let caption = || rich_list(body.get("caption"));

        let kind = match kind_name {
            "paragraph" => BlockKind::Paragraph { text: text() },
            "heading_1" => BlockKind::Heading { level: 1, text: text() },
            "heading_2" => BlockKind::Heading { level: 2, text: text() },
            "heading_3" => BlockKind::Heading { level: 3, text: text() },
            "bulleted_list_item" => BlockKind::BulletedListItem { text: text() },
            "numbered_list_item" => BlockKind::NumberedListItem { text: text() },
            "to_do" => BlockKind::ToDo {
                text: text(),
                checked: body.get("checked").and_then(Value::as_bool).unwrap_or(false),
            },
            "toggle" => BlockKind::Toggle { text: text() },
            "code" => BlockKind::Code {
                text: text(),
                language: body
                    .get("language")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            "quote" => BlockKind::Quote { text: text() },
            "callout" => BlockKind::Callout {
                text: text(),
                icon: body
                    .get("icon")
                    .and_then(|i| i.get("emoji"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            "divider" => BlockKind::Divider,
            "image" | "video" | "file" | "pdf" => BlockKind::Media {
                kind: match kind_name {
                    "image" => MediaKind::Image,
                    "video" => MediaKind::Video,
                    "pdf" => MediaKind::Pdf,
                    _ => MediaKind::File,
                },
                url: asset_url(body),
                caption: caption(),
            },
            "bookmark" | "embed" | "link_preview" => BlockKind::Link {
                url: body
                    .get("url")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                caption: caption(),
            },
            "equation" => BlockKind::Equation {
                expression: body
                    .get("expression")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            "table" => BlockKind::Table {
                has_column_header: body
                    .get("has_column_header")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            },
            "table_row" => BlockKind::TableRow {
                cells: body
                    .get("cells")
                    .and_then(Value::as_array)
                    .map(|cells| cells.iter().map(|c| rich_list(Some(c))).collect())
                    .unwrap_or_default(),
            },
            "column_list" => BlockKind::ColumnList,
            "column" => BlockKind::Column,
            "child_page" => BlockKind::ChildPage {
                title: string_field(body, "title"),
            },
            "child_database" => BlockKind::ChildDatabase {
                title: string_field(body, "title"),
            },
            "link_to_page" => BlockKind::LinkToPage {
                target: ["page_id", "database_id"]
                    .iter()
                    .find_map(|k| body.get(*k).and_then(Value::as_str))
                    .unwrap_or_default()
                    .to_string(),
            },
            "synced_block" => BlockKind::SyncedBlock,
            "table_of_contents" => BlockKind::TableOfContents,
            "breadcrumb" => BlockKind::Breadcrumb,
            other => BlockKind::Unknown {
                kind: other.to_string(),
                raw: body.clone(),
            },
        };

        Self {
            id: v
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            has_children: v.get("has_children").and_then(Value::as_bool).unwrap_or(false),
            kind,
            children: Vec::new(),
        }
    }
}

fn string_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Hosted assets carry `{file: {url}}`, linked ones `{external: {url}}`.
fn asset_url(body: &Value) -> String {
    ["file", "external"]
        .iter()
        .find_map(|k| body.get(*k).and_then(|o| o.get("url")).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

// ---------------------------------------------------------------------------
// Content tree
// ---------------------------------------------------------------------------

/// An item together with its complete block tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentTree {
    pub item: ItemSummary,
    pub blocks: Vec<Block>,
}

impl ContentTree {
    pub fn new(item: ItemSummary, blocks: Vec<Block>) -> Self {
        Self { item, blocks }
    }

    /// Total number of blocks, nested children included.
    pub fn block_count(&self) -> usize {
        fn count(blocks: &[Block]) -> usize {
            blocks.iter().map(|b| 1 + count(&b.children)).sum()
        }
        count(&self.blocks)
    }
}
