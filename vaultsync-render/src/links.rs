//! Upstream links → vault links.
//!
//! [`LinkResolver`] keeps a registry of pages that exist in the vault. Links
//! to registered pages become wiki links (or relative Markdown links);
//! links to anything else on the upstream host are broken and rendered per
//! [`BrokenLinkMode`]. Every resolved URL is remembered for [`LinkReport`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{LazyLock, Mutex, PoisonError, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use vaultsync_core::{BrokenLinkMode, InternalLinkMode, ItemId};

/// Absolute or root-relative upstream URL, split into path, query and
/// fragment.
static NOTION_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?i:https?://(?:www\.)?notion\.so)?/(?P<path>[^?#]*)(?:\?(?P<query>[^#]*))?(?:#(?P<fragment>.*))?$",
    )
    .expect("link pattern is valid")
});

/// Compact 32-hex-digit id at the end of a slug such as
/// `Weekly-Plan-0123…cdef` or a hyphenated UUID.
pub fn normalize_id(raw: &str) -> Option<String> {
    let compact: String = raw.chars().filter(|c| *c != '-').collect();
    let tail = compact.get(compact.len().checked_sub(32)?..)?;
    tail.chars()
        .all(|c| c.is_ascii_hexdigit())
        .then(|| tail.to_ascii_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Page,
    Database,
    Block,
    External,
    /// An upstream URL with no recognisable target id.
    Unrecognized,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Database => "database",
            Self::Block => "block",
            Self::External => "external",
            Self::Unrecognized => "unrecognized",
        }
    }
}

/// What a URL points at, and whether the vault has it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkReference {
    pub url: String,
    pub kind: LinkKind,
    pub target_id: Option<String>,
    pub target_title: Option<String>,
    /// Vault filename of the target, when registered.
    pub target_file: Option<String>,
    pub error: Option<String>,
}

impl LinkReference {
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }

    fn external(url: &str) -> Self {
        Self {
            url: url.to_string(),
            kind: LinkKind::External,
            target_id: None,
            target_title: None,
            target_file: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone)]
struct PageEntry {
    title: String,
    filename: String,
}

/// Totals over every link resolved since the last [`LinkResolver::reset`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkReport {
    pub total: usize,
    pub valid: usize,
    pub broken: usize,
    pub by_kind: BTreeMap<String, usize>,
    /// `(url, reason)`, sorted by URL.
    pub broken_links: Vec<(String, String)>,
    pub registered_pages: usize,
}

impl LinkReport {
    /// Fraction of resolved links that were valid; 1.0 with no links.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.valid as f64 / self.total as f64
        }
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::from("# Links\n\n");
        out.push_str(&format!("- resolved: {}\n", self.total));
        out.push_str(&format!("- valid: {}\n", self.valid));
        out.push_str(&format!("- broken: {}\n", self.broken));
        out.push_str(&format!("- known pages: {}\n", self.registered_pages));
        for (kind, count) in &self.by_kind {
            out.push_str(&format!("- {kind} links: {count}\n"));
        }
        if self.broken_links.is_empty() {
            return out;
        }
        out.push_str("\n## Broken links\n");
        for (n, (url, reason)) in self.broken_links.iter().enumerate() {
            out.push_str(&format!("{}. {url}: {reason}\n", n + 1));
        }
        out.push_str(
            "\nShare the target pages with the integration, or include them in the synced \
             database. `sync.broken_links` controls how these links are written.\n",
        );
        out
    }
}

/// Page registry plus per-URL resolution cache. Shared by concurrent
/// conversions.
#[derive(Debug, Default)]
pub struct LinkResolver {
    internal: InternalLinkMode,
    broken: BrokenLinkMode,
    pages: RwLock<HashMap<String, PageEntry>>,
    seen: Mutex<BTreeMap<String, LinkReference>>,
}

impl LinkResolver {
    pub fn new(internal: InternalLinkMode, broken: BrokenLinkMode) -> Self {
        Self {
            internal,
            broken,
            ..Self::default()
        }
    }

    /// Record that `id` lives in the vault as `filename`. Later
    /// registrations of the same id win.
    pub fn register(&self, id: &ItemId, title: &str, filename: &str) {
        let Some(key) = normalize_id(&id.0) else {
            tracing::debug!(item = %id, "not registering link target without a page id");
            return;
        };
        let mut pages = self.pages.write().unwrap_or_else(PoisonError::into_inner);
        pages.insert(
            key,
            PageEntry {
                title: title.to_string(),
                filename: filename.to_string(),
            },
        );
        // Cached broken results may now resolve.
        drop(pages);
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, r| r.is_valid());
    }

    pub fn registered(&self) -> usize {
        self.pages.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Forget resolved links; the registry is kept.
    pub fn reset(&self) {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Classify `url` and look its target up in the registry.
    pub fn resolve(&self, url: &str) -> LinkReference {
        if let Some(known) = self
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
        {
            return known.clone();
        }
        let reference = self.analyze(url);
        if !reference.is_valid() {
            tracing::debug!(url, error = ?reference.error, "broken link");
        }
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), reference.clone());
        reference
    }

    /// A `link_to_page` block target (a bare page id).
    pub fn resolve_page_id(&self, id: &str) -> LinkReference {
        let compact: String = id.chars().filter(|c| *c != '-').collect();
        self.resolve(&format!("https://www.notion.so/{compact}"))
    }

    fn analyze(&self, url: &str) -> LinkReference {
        let Some(caps) = NOTION_LINK.captures(url) else {
            if url.to_ascii_lowercase().contains("notion.so") {
                return self.unrecognized(url);
            }
            return LinkReference::external(url);
        };
        let path = caps.name("path").map_or("", |m| m.as_str());
        let query = caps.name("query").map_or("", |m| m.as_str());
        let fragment = caps.name("fragment").map_or("", |m| m.as_str());

        let last_segment = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
        let Some(page_id) = normalize_id(last_segment) else {
            return self.unrecognized(url);
        };
        let kind = if query.split('&').any(|kv| kv.starts_with("v=")) {
            LinkKind::Database
        } else if normalize_id(fragment).is_some() {
            LinkKind::Block
        } else {
            LinkKind::Page
        };

        let pages = self.pages.read().unwrap_or_else(PoisonError::into_inner);
        let entry = pages.get(&page_id);
        LinkReference {
            url: url.to_string(),
            kind,
            target_title: entry.map(|e| e.title.clone()),
            target_file: entry.map(|e| e.filename.clone()),
            error: entry
                .is_none()
                .then(|| format!("{} is not in the vault", kind.as_str())),
            target_id: Some(page_id),
        }
    }

    fn unrecognized(&self, url: &str) -> LinkReference {
        LinkReference {
            url: url.to_string(),
            kind: LinkKind::Unrecognized,
            target_id: None,
            target_title: None,
            target_file: None,
            error: Some("unrecognized link format".into()),
        }
    }

    /// Markdown for `link`; `label` defaults to the target title.
    pub fn render(&self, link: &LinkReference, label: &str) -> String {
        let label = if label.is_empty() {
            default_label(link)
        } else {
            label.to_string()
        };
        if link.kind == LinkKind::External {
            return format!("[{label}]({})", link.url);
        }
        if !link.is_valid() {
            return match self.broken {
                BrokenLinkMode::Placeholder => format!("~~{label}~~ (broken link)"),
                BrokenLinkMode::Comment => format!(
                    "{label} <!-- broken link: {} -->",
                    link.error.as_deref().unwrap_or("unknown target")
                ),
                BrokenLinkMode::TextOnly => label,
                BrokenLinkMode::OriginalUrl => format!("[{label}]({})", link.url),
            };
        }
        let file = link.target_file.as_deref().unwrap_or_default();
        match self.internal {
            InternalLinkMode::Obsidian => {
                let stem = file.strip_suffix(".md").unwrap_or(file);
                if label == stem {
                    format!("[[{stem}]]")
                } else {
                    format!("[[{stem}|{label}]]")
                }
            }
            InternalLinkMode::Markdown if file.contains(' ') => format!("[{label}](<{file}>)"),
            InternalLinkMode::Markdown => format!("[{label}]({file})"),
            InternalLinkMode::NotionUrl => format!("[{label}]({})", link.url),
        }
    }

    pub fn report(&self) -> LinkReport {
        let seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let mut report = LinkReport {
            total: seen.len(),
            registered_pages: self.registered(),
            ..LinkReport::default()
        };
        let mut broken = BTreeSet::new();
        for r in seen.values() {
            *report.by_kind.entry(r.kind.as_str().to_string()).or_default() += 1;
            match &r.error {
                None => report.valid += 1,
                Some(e) => {
                    broken.insert((r.url.clone(), e.clone()));
                }
            }
        }
        report.broken = broken.len();
        report.broken_links = broken.into_iter().collect();
        report
    }
}

fn default_label(link: &LinkReference) -> String {
    if let Some(title) = &link.target_title {
        return title.clone();
    }
    match link.kind {
        LinkKind::Page => "page link".into(),
        LinkKind::Database => "database link".into(),
        LinkKind::Block => "block link".into(),
        LinkKind::External | LinkKind::Unrecognized => link.url.clone(),
    }
}
