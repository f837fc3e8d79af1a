//! Block tree → Markdown.
//!
//! Output targets Obsidian-flavoured Markdown: callouts for callout blocks,
//! `[[wiki links]]` for child pages, `$$` fences for equations. Links into
//! the upstream workspace go through a [`LinkResolver`] when one is given.

use vaultsync_core::content::{Block, BlockKind, MediaKind, RichText};
use vaultsync_core::UnsupportedPolicy;

use crate::links::{LinkReference, LinkResolver};

const INDENT: &str = "    ";

/// Markdown for a block list plus what could not be rendered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedBlocks {
    pub markdown: String,
    pub warnings: Vec<String>,
    /// Upstream type names of unrendered blocks, one entry per occurrence.
    pub unsupported: Vec<String>,
}

/// Render a whole block tree. Without `links`, hrefs are copied verbatim.
pub fn render_blocks(
    blocks: &[Block],
    policy: UnsupportedPolicy,
    links: Option<&LinkResolver>,
) -> RenderedBlocks {
    let mut r = BlockRenderer {
        policy,
        links,
        out: RenderedBlocks::default(),
    };
    let mut markdown = String::new();
    r.render_seq(blocks, 0, &mut markdown);
    r.out.markdown = markdown.trim_end().to_string();
    if !r.out.markdown.is_empty() {
        r.out.markdown.push('\n');
    }
    r.out
}

struct BlockRenderer<'a> {
    policy: UnsupportedPolicy,
    links: Option<&'a LinkResolver>,
    out: RenderedBlocks,
}

impl BlockRenderer<'_> {
    fn render_seq(&mut self, blocks: &[Block], depth: usize, out: &mut String) {
        let mut number = 0usize;
        let mut in_list = false;
        for block in blocks {
            let is_list = matches!(
                block.kind,
                BlockKind::BulletedListItem { .. }
                    | BlockKind::NumberedListItem { .. }
                    | BlockKind::ToDo { .. }
                    | BlockKind::Toggle { .. }
            );
            if in_list && !is_list && depth == 0 {
                out.push('\n');
            }
            in_list = is_list;
            number = match block.kind {
                BlockKind::NumberedListItem { .. } => number + 1,
                _ => 0,
            };
            self.render_block(block, depth, number, out);
        }
    }

    fn render_block(&mut self, block: &Block, depth: usize, number: usize, out: &mut String) {
        let indent = INDENT.repeat(depth);
        match &block.kind {
            BlockKind::Paragraph { text } => {
                let line = self.inline(text);
                if line.is_empty() {
                    out.push('\n');
                } else {
                    out.push_str(&format!("{indent}{line}\n\n"));
                }
                self.render_seq(&block.children, depth, out);
            }
            BlockKind::Heading { level, text } => {
                let hashes = "#".repeat(usize::from(*level).clamp(1, 6));
                out.push_str(&format!("{hashes} {}\n\n", self.inline(text)));
                self.render_seq(&block.children, depth, out);
            }
            BlockKind::BulletedListItem { text } | BlockKind::Toggle { text } => {
                out.push_str(&format!("{indent}- {}\n", self.inline(text)));
                self.render_seq(&block.children, depth + 1, out);
            }
            BlockKind::NumberedListItem { text } => {
                out.push_str(&format!("{indent}{number}. {}\n", self.inline(text)));
                self.render_seq(&block.children, depth + 1, out);
            }
            BlockKind::ToDo { text, checked } => {
                let mark = if *checked { "x" } else { " " };
                out.push_str(&format!("{indent}- [{mark}] {}\n", self.inline(text)));
                self.render_seq(&block.children, depth + 1, out);
            }
            BlockKind::Code { text, language } => {
                let code = vaultsync_core::content::plain_text(text);
                out.push_str(&format!("{indent}```{language}\n"));
                for line in code.lines() {
                    out.push_str(&format!("{indent}{line}\n"));
                }
                out.push_str(&format!("{indent}```\n\n"));
            }
            BlockKind::Quote { text } => {
                let mut inner = format!("{}\n", self.inline(text));
                let mut nested = String::new();
                self.render_seq(&block.children, 0, &mut nested);
                inner.push_str(&nested);
                out.push_str(&prefix_lines(inner.trim_end(), &format!("{indent}> ")));
                out.push_str("\n\n");
            }
            BlockKind::Callout { text, icon } => {
                let header = match icon {
                    Some(icon) => format!("[!note] {icon}"),
                    None => "[!note]".to_string(),
                };
                let mut inner = format!("{header}\n{}\n", self.inline(text));
                let mut nested = String::new();
                self.render_seq(&block.children, 0, &mut nested);
                inner.push_str(&nested);
                out.push_str(&prefix_lines(inner.trim_end(), &format!("{indent}> ")));
                out.push_str("\n\n");
            }
            BlockKind::Divider => out.push_str(&format!("{indent}---\n\n")),
            BlockKind::Media { kind, url, caption } => {
                let label = self.inline(caption);
                let line = match kind {
                    MediaKind::Image => format!("![{label}]({url})"),
                    other => {
                        let label = if label.is_empty() {
                            media_label(*other).to_string()
                        } else {
                            label
                        };
                        format!("[{label}]({url})")
                    }
                };
                out.push_str(&format!("{indent}{line}\n\n"));
            }
            BlockKind::Link { url, caption } => {
                let label = self.inline(caption);
                let line = match self.links {
                    Some(links) => {
                        let link = links.resolve(url);
                        self.note_broken(&link);
                        links.render(&link, &label)
                    }
                    None if label.is_empty() => format!("[{url}]({url})"),
                    None => format!("[{label}]({url})"),
                };
                out.push_str(&format!("{indent}{line}\n\n"));
            }
            BlockKind::Equation { expression } => {
                out.push_str(&format!("{indent}$$\n{indent}{expression}\n{indent}$$\n\n"));
            }
            BlockKind::Table { .. } => {
                let table = self.render_table(&block.children, &indent);
                out.push_str(&table);
                out.push('\n');
            }
            BlockKind::TableRow { cells } => {
                let row = self.table_row_padded(cells, cells.len());
                out.push_str(&format!("{indent}{row}\n"));
            }
            BlockKind::ColumnList | BlockKind::Column | BlockKind::SyncedBlock => {
                self.render_seq(&block.children, depth, out);
            }
            BlockKind::ChildPage { title } | BlockKind::ChildDatabase { title } => {
                out.push_str(&format!("{indent}[[{title}]]\n\n"));
            }
            BlockKind::LinkToPage { target } => {
                let line = match self.links {
                    Some(links) => {
                        let link = links.resolve_page_id(target);
                        self.note_broken(&link);
                        links.render(&link, "")
                    }
                    None => {
                        let compact = target.replace('-', "");
                        format!("[Linked page](https://www.notion.so/{compact})")
                    }
                };
                out.push_str(&format!("{indent}{line}\n\n"));
            }
            BlockKind::TableOfContents | BlockKind::Breadcrumb => {}
            BlockKind::Unknown { kind, .. } => {
                self.out.unsupported.push(kind.clone());
                match self.policy {
                    UnsupportedPolicy::Skip => {}
                    UnsupportedPolicy::Placeholder => {
                        out.push_str(&format!("{indent}<!-- unsupported block: {kind} -->\n\n"));
                    }
                    UnsupportedPolicy::Warning => {
                        self.out
                            .warnings
                            .push(format!("unsupported block type '{kind}' was skipped"));
                    }
                }
            }
        }
    }

    fn note_broken(&mut self, link: &LinkReference) {
        if let Some(error) = &link.error {
            self.out
                .warnings
                .push(format!("broken link {}: {error}", link.url));
        }
    }

    fn inline(&mut self, runs: &[RichText]) -> String {
        runs.iter().map(|run| self.inline_run(run)).collect()
    }

    fn inline_run(&mut self, run: &RichText) -> String {
        let (lead, s, trail) = annotate(run);
        let Some(href) = run.href.as_ref().filter(|_| !s.is_empty()) else {
            return format!("{lead}{s}{trail}");
        };
        let s = match self.links {
            Some(links) => {
                let link = links.resolve(href);
                self.note_broken(&link);
                links.render(&link, &s)
            }
            None => format!("[{s}]({href})"),
        };
        format!("{lead}{s}{trail}")
    }

    fn render_table(&mut self, rows: &[Block], indent: &str) -> String {
        let rows: Vec<&Vec<Vec<RichText>>> = rows
            .iter()
            .filter_map(|b| match &b.kind {
                BlockKind::TableRow { cells } => Some(cells),
                _ => None,
            })
            .collect();
        let Some(first) = rows.first() else {
            return String::new();
        };
        // Markdown tables always need a header row; the first row serves as one.
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(first.len());
        let mut out = String::new();
        let header = self.table_row_padded(first, width);
        out.push_str(&format!("{indent}{header}\n"));
        out.push_str(&format!(
            "{indent}|{}\n",
            " --- |".repeat(width.max(1))
        ));
        for row in rows.iter().skip(1) {
            let row = self.table_row_padded(row, width);
            out.push_str(&format!("{indent}{row}\n"));
        }
        out
    }

    fn table_row_padded(&mut self, cells: &[Vec<RichText>], width: usize) -> String {
        let mut parts: Vec<String> = cells
            .iter()
            .map(|c| self.inline(c).replace('|', "\\|").replace('\n', "<br>"))
            .collect();
        parts.resize(width.max(parts.len()), String::new());
        format!("| {} |", parts.join(" | "))
    }
}

fn media_label(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "image",
        MediaKind::Video => "video",
        MediaKind::File => "file",
        MediaKind::Pdf => "pdf",
    }
}

fn prefix_lines(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|l| {
            if l.is_empty() {
                prefix.trim_end().to_string()
            } else {
                format!("{prefix}{l}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Inline formatting
// ---------------------------------------------------------------------------

/// Render a rich-text run list as inline Markdown, hrefs copied verbatim.
pub fn inline(runs: &[RichText]) -> String {
    runs.iter()
        .map(|run| {
            let (lead, s, trail) = annotate(run);
            match &run.href {
                Some(href) if !s.is_empty() => format!("{lead}[{s}]({href}){trail}"),
                _ => format!("{lead}{s}{trail}"),
            }
        })
        .collect()
}

/// Annotated core text of a run, with the surrounding whitespace split off.
fn annotate(run: &RichText) -> (&str, String, &str) {
    let text = run.plain_text.as_str();
    if text.trim().is_empty() {
        return (text, String::new(), "");
    }
    // Emphasis markers must hug the text, so surrounding whitespace is kept
    // outside them.
    let start = text.len() - text.trim_start().len();
    let end = text.trim_end().len();
    let (lead, core, trail) = (&text[..start], &text[start..end], &text[end..]);

    let a = &run.annotations;
    let mut s = if a.code {
        format!("`{core}`")
    } else {
        core.to_string()
    };
    if a.bold {
        s = format!("**{s}**");
    }
    if a.italic {
        s = format!("*{s}*");
    }
    if a.strikethrough {
        s = format!("~~{s}~~");
    }
    if a.underline {
        s = format!("<u>{s}</u>");
    }
    (lead, s, trail)
}
