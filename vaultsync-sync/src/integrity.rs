//! Post-write integrity checks on documents in the destination.

use std::path::Path;

use serde::Serialize;

use vaultsync_core::document::{split_frontmatter, FilePolicy};

/// Outcome of re-reading one written document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub filename: String,
    pub exists: bool,
    /// Read succeeded and the bytes are valid UTF-8.
    pub readable: bool,
    pub size_bytes: u64,
    pub line_count: usize,
    pub has_frontmatter: bool,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

impl IntegrityReport {
    fn missing(filename: &str) -> Self {
        Self {
            filename: filename.to_string(),
            exists: false,
            readable: false,
            size_bytes: 0,
            line_count: 0,
            has_frontmatter: false,
            warnings: Vec::new(),
            error: Some("file does not exist".into()),
        }
    }

    /// Readable with no warnings.
    pub fn is_valid(&self) -> bool {
        self.exists && self.readable && self.warnings.is_empty()
    }

    /// Missing or unreadable.
    pub fn is_corrupted(&self) -> bool {
        !self.exists || !self.readable
    }
}

/// Re-read `path` and check it against `policy`. Never fails; problems are
/// reported in the returned value.
pub fn check_file(path: &Path, policy: &FilePolicy) -> IntegrityReport {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return IntegrityReport::missing(&filename),
        Err(e) => {
            return IntegrityReport {
                error: Some(e.to_string()),
                exists: true,
                ..IntegrityReport::missing(&filename)
            }
        }
    };
    let size_bytes = bytes.len() as u64;
    let content = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => {
            return IntegrityReport {
                exists: true,
                size_bytes,
                error: Some(format!("invalid UTF-8: {e}")),
                ..IntegrityReport::missing(&filename)
            }
        }
    };

    let mut warnings = policy.check(&content);
    let has_frontmatter = match split_frontmatter(&content) {
        Some((yaml, _)) => match serde_yaml::from_str::<serde_yaml::Value>(yaml) {
            Ok(_) => true,
            Err(e) => {
                warnings.push(format!("frontmatter is not valid YAML: {e}"));
                false
            }
        },
        None => false,
    };

    IntegrityReport {
        filename,
        exists: true,
        readable: true,
        size_bytes,
        line_count: content.lines().count(),
        has_frontmatter,
        warnings,
        error: None,
    }
}

/// Markdown summary of a set of integrity checks.
pub fn integrity_report(results: &[IntegrityReport]) -> String {
    let valid = results.iter().filter(|r| r.is_valid()).count();
    let with_warnings: Vec<&IntegrityReport> = results
        .iter()
        .filter(|r| !r.is_corrupted() && !r.warnings.is_empty())
        .collect();
    let broken: Vec<&IntegrityReport> = results.iter().filter(|r| r.is_corrupted()).collect();

    let mut out = String::from("# File integrity\n\n## Summary\n");
    out.push_str(&format!("- valid: {valid}\n"));
    out.push_str(&format!("- with warnings: {}\n", with_warnings.len()));
    out.push_str(&format!("- unreadable: {}\n", broken.len()));

    if !with_warnings.is_empty() {
        out.push_str("\n## Warnings\n");
        for r in with_warnings {
            out.push_str(&format!("### {}\n", r.filename));
            for w in &r.warnings {
                out.push_str(&format!("- {w}\n"));
            }
        }
    }
    if !broken.is_empty() {
        out.push_str("\n## Unreadable\n");
        for r in broken {
            let reason = r.error.as_deref().unwrap_or("read error");
            out.push_str(&format!("- {}: {reason}\n", r.filename));
        }
    }
    out
}
