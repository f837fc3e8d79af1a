//! Filename conflict detection and resolution.
//!
//! Names are compared case-insensitively: vaults routinely live on
//! case-insensitive filesystems, where `Notes.md` and `notes.md` are one file.

use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Two or more documents in the same batch share a name.
    Batch,
    /// A document's name matches a file already in the destination.
    Existing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub kind: ConflictKind,
    /// Lowercased name the documents collide on.
    pub key: String,
    /// The colliding names as given, in input order.
    pub filenames: Vec<String>,
}

/// Lowercased comparison key for a filename.
pub fn conflict_key(name: &str) -> String {
    name.to_lowercase()
}

/// Duplicate groups in input order of first occurrence, then one
/// [`ConflictKind::Existing`] entry per document that matches `existing`
/// (a set of lowercased names).
pub fn check_conflicts(filenames: &[String], existing: &HashSet<String>) -> Vec<Conflict> {
    let mut groups: BTreeMap<String, (usize, Vec<String>)> = BTreeMap::new();
    for (i, name) in filenames.iter().enumerate() {
        groups
            .entry(conflict_key(name))
            .or_insert_with(|| (i, Vec::new()))
            .1
            .push(name.clone());
    }
    let mut duplicates: Vec<(usize, Conflict)> = groups
        .into_iter()
        .filter(|(_, (_, names))| names.len() > 1)
        .map(|(key, (first, filenames))| {
            (
                first,
                Conflict {
                    kind: ConflictKind::Batch,
                    key,
                    filenames,
                },
            )
        })
        .collect();
    duplicates.sort_by_key(|(first, _)| *first);

    let mut conflicts: Vec<Conflict> = duplicates.into_iter().map(|(_, c)| c).collect();
    let mut reported = HashSet::new();
    for name in filenames {
        let key = conflict_key(name);
        if existing.contains(&key) && reported.insert(key.clone()) {
            conflicts.push(Conflict {
                kind: ConflictKind::Existing,
                key,
                filenames: vec![name.clone()],
            });
        }
    }
    conflicts
}

/// Rename later occurrences of a name to `<stem>_1<ext>`, `<stem>_2<ext>`, …
/// until unique against both earlier names and `reserved` (lowercased).
/// The first unreserved occurrence keeps its name. Output is parallel to
/// the input.
pub fn resolve_conflicts(filenames: &[String], reserved: &HashSet<String>) -> Vec<String> {
    let mut used: HashSet<String> = reserved.clone();
    let mut resolved = Vec::with_capacity(filenames.len());
    for name in filenames {
        let unique = unique_name(name, &used);
        if &unique != name {
            tracing::info!(from = %name, to = %unique, "resolved filename conflict");
        }
        used.insert(conflict_key(&unique));
        resolved.push(unique);
    }
    resolved
}

/// `name` if free, otherwise the first free `<stem>_<n><ext>`.
pub fn unique_name(name: &str, used: &HashSet<String>) -> String {
    if !used.contains(&conflict_key(name)) {
        return name.to_string();
    }
    let (stem, ext) = split_extension(name);
    (1u32..)
        .map(|n| format!("{stem}_{n}{ext}"))
        .find(|candidate| !used.contains(&conflict_key(candidate)))
        .unwrap_or_else(|| name.to_string())
}

/// `("Notes", ".md")` for `Notes.md`; a leading dot does not start an
/// extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => name.split_at(i),
        _ => (name, ""),
    }
}

/// Markdown summary of `conflicts`.
pub fn conflict_report(conflicts: &[Conflict]) -> String {
    if conflicts.is_empty() {
        return "No filename conflicts detected.\n".to_string();
    }
    let mut out = String::from("# Filename conflicts\n\n");
    for c in conflicts {
        match c.kind {
            ConflictKind::Batch => {
                out.push_str(&format!("## Duplicate name: {}\n", c.key));
                for name in &c.filenames {
                    out.push_str(&format!("- {name}\n"));
                }
            }
            ConflictKind::Existing => {
                out.push_str(&format!("## Existing file: {}\n", c.filenames[0]));
                out.push_str("- the existing file will be overwritten\n");
            }
        }
        out.push('\n');
    }
    out
}
