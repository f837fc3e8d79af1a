//! Output documents: Markdown with a YAML frontmatter block.

use serde_yaml::{Mapping, Value as YamlValue};

/// Longest filename stem (in characters) produced by [`sanitize_filename`].
pub const MAX_FILENAME_LEN: usize = 100;

/// Characters that are invalid in filenames on at least one major platform,
/// paired with a visually similar full-width replacement.
const RESERVED: &[(char, char)] = &[
    ('<', '＜'),
    ('>', '＞'),
    (':', '：'),
    ('"', '＂'),
    ('|', '｜'),
    ('?', '？'),
    ('*', '＊'),
    ('\\', '＼'),
    ('/', '／'),
];

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A converted document ready to be written under the destination root.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// File name relative to the destination root, extension included.
    pub filename: String,
    pub frontmatter: Mapping,
    pub body: String,
}

impl Document {
    pub fn new(filename: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            frontmatter: Mapping::new(),
            body: body.into(),
        }
    }

    /// Render as `---\n<yaml>---\n\n<body>`; the frontmatter block is omitted
    /// when empty.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        if !self.frontmatter.is_empty() {
            // A Mapping of plain scalars always serializes.
            let yaml = serde_yaml::to_string(&self.frontmatter).unwrap_or_default();
            out.push_str("---\n");
            out.push_str(&yaml);
            if !yaml.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("---\n\n");
        }
        out.push_str(&self.body);
        out
    }

    /// Split rendered Markdown back into frontmatter and body.
    ///
    /// Content without a well-formed frontmatter block is returned as body.
    pub fn from_markdown(filename: impl Into<String>, content: &str) -> Self {
        let filename = filename.into();
        if let Some((frontmatter, body)) = split_frontmatter(content) {
            if let Ok(YamlValue::Mapping(map)) = serde_yaml::from_str::<YamlValue>(frontmatter) {
                return Self {
                    filename,
                    frontmatter: map,
                    body: body.trim_start_matches('\n').to_string(),
                };
            }
        }
        Self::new(filename, content)
    }

    /// Non-fatal policy checks on the rendered output.
    pub fn validate(&self, policy: &FilePolicy) -> Vec<String> {
        policy.check(&self.to_markdown())
    }
}

/// Returns `(frontmatter_yaml, rest)` when `content` opens with a `---` block.
pub fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let rest = content.strip_prefix("---\n")?;
    if let Some(body) = rest.strip_prefix("---\n") {
        return Some(("", body));
    }
    match rest.find("\n---\n") {
        Some(close) => Some((&rest[..close + 1], &rest[close + 5..])),
        None => rest.strip_suffix("\n---").map(|yaml| (yaml, "")),
    }
}

/// Output of one conversion: the document plus anything worth reporting.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConversionOutput {
    pub document: Document,
    pub warnings: Vec<String>,
    /// Upstream block type names the converter could not render.
    pub unsupported: Vec<String>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new("", "")
    }
}

// ---------------------------------------------------------------------------
// File policy
// ---------------------------------------------------------------------------

/// Size and line-length limits applied to rendered documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePolicy {
    pub max_file_size_bytes: u64,
    pub max_line_length: usize,
}

impl Default for FilePolicy {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 10 * 1024 * 1024,
            max_line_length: 1000,
        }
    }
}

impl FilePolicy {
    pub fn check(&self, content: &str) -> Vec<String> {
        let mut warnings = Vec::new();
        let size = content.len() as u64;
        if size > self.max_file_size_bytes {
            warnings.push(format!(
                "file is large: {:.1} MB",
                size as f64 / (1024.0 * 1024.0)
            ));
        }
        for (n, line) in content.lines().enumerate() {
            let len = line.chars().count();
            if len > self.max_line_length {
                warnings.push(format!("line {} is very long: {len} characters", n + 1));
            }
        }
        warnings
    }
}

// ---------------------------------------------------------------------------
// Filenames
// ---------------------------------------------------------------------------

/// Make `title` safe to use as a filename stem.
///
/// Reserved characters become full-width look-alikes, whitespace runs
/// collapse to one space, the result is cut to `max_len` characters and
/// trailing dots are removed. An empty result falls back to `Untitled`.
pub fn sanitize_filename(title: &str, max_len: usize) -> String {
    let replaced: String = title
        .chars()
        .map(|c| {
            RESERVED
                .iter()
                .find(|(bad, _)| *bad == c)
                .map(|(_, good)| *good)
                .unwrap_or(if c.is_control() { ' ' } else { c })
        })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(max_len).collect();
    let cleaned = truncated.trim().trim_end_matches('.').trim_end();
    if cleaned.is_empty() {
        crate::types::UNTITLED.to_string()
    } else {
        cleaned.to_string()
    }
}

/// `true` when `name` can be written as-is: no reserved characters, no path
/// separators or traversal, no surrounding whitespace.
pub fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name.trim() == name
        && !name.ends_with('.')
        && !name
            .chars()
            .any(|c| c.is_control() || RESERVED.iter().any(|(bad, _)| *bad == c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Weekly Notes", "Weekly Notes")]
    #[case("a/b\\c", "a／b＼c")]
    #[case("What? Now: *yes*", "What？ Now： ＊yes＊")]
    #[case("  spaced   out\ttitle  ", "spaced out title")]
    #[case("ends with dots...", "ends with dots")]
    #[case("", "Untitled")]
    #[case("...", "Untitled")]
    fn sanitizes_titles(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize_filename(input, MAX_FILENAME_LEN), expected);
    }

    #[test]
    fn truncates_on_char_boundary() {
        let long = "é".repeat(150);
        let out = sanitize_filename(&long, MAX_FILENAME_LEN);
        assert_eq!(out.chars().count(), MAX_FILENAME_LEN);
    }

    #[rstest]
    #[case("Notes.md", true)]
    #[case("a/b.md", false)]
    #[case("..", false)]
    #[case(" padded.md", false)]
    #[case("", false)]
    fn safe_filename_rules(#[case] name: &str, #[case] safe: bool) {
        assert_eq!(is_safe_filename(name), safe);
    }

    #[test]
    fn markdown_roundtrip_keeps_frontmatter_order() {
        let mut doc = Document::new("a.md", "# A\n\nbody\n");
        doc.frontmatter.insert("notion_id".into(), "abc".into());
        doc.frontmatter.insert("archived".into(), false.into());

        let rendered = doc.to_markdown();
        assert!(rendered.starts_with("---\nnotion_id: abc\narchived: false\n---\n\n# A"));

        let parsed = Document::from_markdown("a.md", &rendered);
        assert_eq!(parsed, doc);
    }

    #[test]
    fn empty_frontmatter_is_omitted() {
        let doc = Document::new("a.md", "plain\n");
        assert_eq!(doc.to_markdown(), "plain\n");
    }

    #[test]
    fn content_without_frontmatter_is_all_body() {
        let parsed = Document::from_markdown("x.md", "no header here\n");
        assert!(parsed.frontmatter.is_empty());
        assert_eq!(parsed.body, "no header here\n");
    }

    #[test]
    fn policy_flags_long_lines_and_large_files() {
        let policy = FilePolicy {
            max_file_size_bytes: 10,
            max_line_length: 5,
        };
        let warnings = policy.check("short\nmuch too long\n");
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].starts_with("file is large"));
        assert_eq!(warnings[1], "line 2 is very long: 13 characters");
    }
}
