//! Atomic document writer for the destination directory.
//!
//! ## `write` protocol
//!
//! 1. Normalise line endings to LF.
//! 2. Take the per-path lock.
//! 3. Ensure the parent directory exists.
//! 4. Write to a hidden sibling `.<name>.vaultsync.tmp` and fsync it.
//! 5. Rename over the destination (atomic on POSIX).
//! 6. On any failure remove the temp file; the destination keeps its old
//!    content.
//!
//! `write_batch` adds filename conflict handling on top. Names claimed during
//! a run are remembered across batches (see [`AtomicFileWriter::begin_run`]).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::io::AsyncWriteExt;

use vaultsync_core::document::FilePolicy;
use vaultsync_core::{Document, ItemId};

use crate::conflict::{self, Conflict, ConflictKind};
use crate::error::{io_err, SyncError};
use crate::integrity::{self, IntegrityReport};

pub const BACKUP_SUFFIX: &str = ".backup";
pub const CORRUPTED_SUFFIX: &str = ".corrupted";
const OBSIDIAN_DIR: &str = ".obsidian";

// ---------------------------------------------------------------------------
// Batch types
// ---------------------------------------------------------------------------

/// One converted document waiting to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub item_id: ItemId,
    pub document: Document,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written {
        path: PathBuf,
        /// The converter's name when conflict resolution changed it.
        renamed_from: Option<String>,
    },
    /// Not written; the destination already has the file and overwriting
    /// is disabled, or the name collided and resolution is disabled.
    Skipped { path: PathBuf, reason: String },
    Failed { filename: String, error: String },
}

impl WriteOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentWrite {
    pub item_id: ItemId,
    /// Final filename, after conflict resolution.
    pub filename: String,
    pub outcome: WriteOutcome,
}

/// Result of one [`AtomicFileWriter::write_batch`], outcomes in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub writes: Vec<DocumentWrite>,
    pub conflicts: Vec<Conflict>,
    pub conflicts_resolved: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Markdown summary; `None` when there were no conflicts.
    pub conflict_report: Option<String>,
}

impl WriteReport {
    pub fn batch_conflicts(&self) -> usize {
        self.conflicts
            .iter()
            .filter(|c| c.kind == ConflictKind::Batch)
            .count()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiskUsage {
    pub file_count: usize,
    pub total_bytes: u64,
}

impl DiskUsage {
    pub fn total_mb(&self) -> f64 {
        self.total_bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn average_bytes(&self) -> u64 {
        match self.file_count {
            0 => 0,
            n => self.total_bytes / n as u64,
        }
    }
}

// ---------------------------------------------------------------------------
// AtomicFileWriter
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AtomicFileWriter {
    root: PathBuf,
    policy: FilePolicy,
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
    /// Lowercased names owned by this run or by other known items.
    claimed: Mutex<HashSet<String>>,
}

impl AtomicFileWriter {
    pub fn new(root: impl Into<PathBuf>, policy: FilePolicy) -> Self {
        Self {
            root: root.into(),
            policy,
            locks: Mutex::new(HashMap::new()),
            claimed: Mutex::new(HashSet::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    /// Start a new run. `reserved` names (files owned by items outside this
    /// run) are treated as taken by [`write_batch`](Self::write_batch).
    pub fn begin_run<I, S>(&self, reserved: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        claimed.clear();
        claimed.extend(reserved.into_iter().map(|s| conflict::conflict_key(s.as_ref())));
    }

    /// Pre-flight checks on the destination. Missing directories are
    /// created. Returns non-fatal warnings, or every fatal problem found.
    pub fn validate_destination(&self) -> Result<Vec<String>, SyncError> {
        let mut warnings = Vec::new();
        if self.root.exists() && !self.root.is_dir() {
            return Err(SyncError::Validation {
                errors: vec![format!("{} is not a directory", self.root.display())],
            });
        }
        if let Err(e) = std::fs::create_dir_all(&self.root) {
            return Err(SyncError::Validation {
                errors: vec![format!("cannot create {}: {e}", self.root.display())],
            });
        }

        let marker = self.root.join(".vaultsync.write-check");
        let writable = std::fs::write(&marker, b"ok").and_then(|_| std::fs::remove_file(&marker));
        if let Err(e) = writable {
            let _ = std::fs::remove_file(&marker);
            return Err(SyncError::Validation {
                errors: vec![format!("{} is not writable: {e}", self.root.display())],
            });
        }

        let has_marker = self
            .root
            .ancestors()
            .any(|dir| dir.join(OBSIDIAN_DIR).is_dir());
        if !has_marker {
            warnings.push(format!(
                "no {OBSIDIAN_DIR} folder found at or above {}; is this an Obsidian vault?",
                self.root.display()
            ));
        }
        Ok(warnings)
    }

    /// Atomically replace `<root>/<filename>` with `content`.
    pub async fn write(&self, filename: &str, content: &str) -> Result<PathBuf, SyncError> {
        let path = self.path_for(filename);
        let tmp = tmp_path_for(&path);
        self.write_with_tmp(&path, content, &tmp).await?;
        Ok(path)
    }

    async fn write_with_tmp(&self, path: &Path, content: &str, tmp: &Path) -> Result<(), SyncError> {
        let normalized = content.replace("\r\n", "\n");

        let lock = self.lock_for(path);
        let _guard = lock.lock().await;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(parent, e))?;
        }

        if let Err(e) = write_synced(tmp, normalized.as_bytes()).await {
            let _ = tokio::fs::remove_file(tmp).await;
            return Err(io_err(tmp, e));
        }
        if let Err(e) = tokio::fs::rename(tmp, path).await {
            let _ = tokio::fs::remove_file(tmp).await;
            return Err(io_err(path, e));
        }

        tracing::debug!(path = %path.display(), bytes = normalized.len(), "wrote document");
        Ok(())
    }

    pub async fn write_document(&self, document: &Document) -> Result<PathBuf, SyncError> {
        self.write(&document.filename, &document.to_markdown()).await
    }

    /// Write a batch with conflict detection.
    ///
    /// With `resolve_conflicts`, colliding names (within the batch, with
    /// names claimed earlier in the run, or reserved via `begin_run`) are
    /// renamed `_1`, `_2`, …; without it, later duplicates are skipped.
    /// Existing files are overwritten only when `overwrite` is set. One
    /// failed write never stops the rest of the batch.
    pub async fn write_batch(
        &self,
        batch: Vec<PendingWrite>,
        overwrite: bool,
        resolve_conflicts: bool,
    ) -> WriteReport {
        let names: Vec<String> = batch.iter().map(|p| p.document.filename.clone()).collect();
        let existing = self.existing_names();
        let claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner).clone();

        // Files this run already wrote are ours to resolve, not "existing".
        let unclaimed_existing: HashSet<String> = existing.difference(&claimed).cloned().collect();
        let mut conflicts = conflict::check_conflicts(&names, &unclaimed_existing);
        for (name, key) in names.iter().map(|n| (n, conflict::conflict_key(n))) {
            if claimed.contains(&key) && !conflicts.iter().any(|c| c.key == key) {
                conflicts.push(Conflict {
                    kind: ConflictKind::Batch,
                    key,
                    filenames: vec![name.clone()],
                });
            }
        }

        let targets: Vec<Option<String>> = if resolve_conflicts {
            conflict::resolve_conflicts(&names, &claimed)
                .into_iter()
                .map(Some)
                .collect()
        } else {
            let mut seen = claimed.clone();
            names
                .iter()
                .map(|n| seen.insert(conflict::conflict_key(n)).then(|| n.clone()))
                .collect()
        };
        let conflicts_resolved = if resolve_conflicts {
            names.iter().zip(&targets).filter(|(n, t)| t.as_deref() != Some(n.as_str())).count()
        } else {
            0
        };
        if !conflicts.is_empty() {
            tracing::info!(
                detected = conflicts.len(),
                resolved = conflicts_resolved,
                "filename conflicts in batch"
            );
        }

        let mut report = WriteReport {
            conflict_report: (!conflicts.is_empty()).then(|| conflict::conflict_report(&conflicts)),
            conflicts,
            conflicts_resolved,
            ..WriteReport::default()
        };

        for (pending, target) in batch.into_iter().zip(targets) {
            let original = pending.document.filename.clone();
            let Some(filename) = target else {
                report.skipped += 1;
                report.writes.push(DocumentWrite {
                    item_id: pending.item_id,
                    filename: original.clone(),
                    outcome: WriteOutcome::Skipped {
                        path: self.path_for(&original),
                        reason: "filename already used in this run".into(),
                    },
                });
                continue;
            };
            self.claim(&filename);

            let path = self.path_for(&filename);
            if !overwrite && path.exists() {
                report.skipped += 1;
                report.writes.push(DocumentWrite {
                    item_id: pending.item_id,
                    filename,
                    outcome: WriteOutcome::Skipped {
                        path,
                        reason: "file exists and overwrite is disabled".into(),
                    },
                });
                continue;
            }

            let mut document = pending.document;
            document.filename = filename.clone();
            let outcome = match self.write_document(&document).await {
                Ok(path) => {
                    report.successful += 1;
                    WriteOutcome::Written {
                        path,
                        renamed_from: (original != filename).then_some(original),
                    }
                }
                Err(e) => {
                    tracing::error!(item = %pending.item_id, file = %filename, error = %e, "write failed");
                    report.failed += 1;
                    WriteOutcome::Failed {
                        filename: filename.clone(),
                        error: e.to_string(),
                    }
                }
            };
            report.writes.push(DocumentWrite {
                item_id: pending.item_id,
                filename,
                outcome,
            });
        }
        report
    }

    /// Markdown files directly under the root, sorted.
    pub fn list_documents(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".md") && !n.starts_with('.'))
            .collect();
        names.sort();
        names
    }

    pub fn read_document(&self, filename: &str) -> Result<Document, SyncError> {
        let path = self.path_for(filename);
        let content = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        Ok(Document::from_markdown(filename, &content))
    }

    /// Returns `false` when there was nothing to delete.
    pub async fn delete(&self, filename: &str) -> Result<bool, SyncError> {
        let path = self.path_for(filename);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "deleted document");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "nothing to delete");
                Ok(false)
            }
            Err(e) => Err(io_err(&path, e)),
        }
    }

    /// Copy `<name>` to `<name><suffix>`. `None` when the source is missing.
    pub fn backup(&self, filename: &str, suffix: &str) -> Result<Option<PathBuf>, SyncError> {
        let path = self.path_for(filename);
        if !path.exists() {
            tracing::warn!(path = %path.display(), "nothing to back up");
            return Ok(None);
        }
        let backup = self.path_for(&format!("{filename}{suffix}"));
        std::fs::copy(&path, &backup).map_err(|e| io_err(&backup, e))?;
        tracing::debug!(from = %path.display(), to = %backup.display(), "backed up document");
        Ok(Some(backup))
    }

    /// Keep the `max_keep` most recent `*.backup` files; delete the rest.
    /// Returns the deleted paths.
    pub fn cleanup_old_backups(&self, max_keep: usize) -> Result<Vec<PathBuf>, SyncError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.root, e)),
        };
        let mut backups: Vec<(std::time::SystemTime, PathBuf)> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(BACKUP_SUFFIX))
            .filter_map(|e| {
                let modified = e.metadata().and_then(|m| m.modified()).ok()?;
                Some((modified, e.path()))
            })
            .collect();
        if backups.len() <= max_keep {
            return Ok(Vec::new());
        }
        backups.sort_by(|a, b| b.0.cmp(&a.0));

        let mut removed = Vec::new();
        for (_, path) in backups.into_iter().skip(max_keep) {
            match std::fs::remove_file(&path) {
                Ok(()) => removed.push(path),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove old backup"),
            }
        }
        tracing::info!(removed = removed.len(), "pruned old backups");
        Ok(removed)
    }

    /// Recursive size of everything under the root.
    pub fn disk_usage(&self) -> DiskUsage {
        let mut usage = DiskUsage::default();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.filter_map(Result::ok) {
                let Ok(meta) = entry.metadata() else { continue };
                if meta.is_dir() {
                    stack.push(entry.path());
                } else if meta.is_file() {
                    usage.file_count += 1;
                    usage.total_bytes += meta.len();
                }
            }
        }
        usage
    }

    pub fn verify(&self, filename: &str) -> IntegrityReport {
        integrity::check_file(&self.path_for(filename), &self.policy)
    }

    /// [`verify`](Self::verify) every document from [`list_documents`](Self::list_documents).
    pub fn verify_all(&self) -> Vec<IntegrityReport> {
        self.list_documents().iter().map(|n| self.verify(n)).collect()
    }

    fn claim(&self, filename: &str) {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conflict::conflict_key(filename));
    }

    fn existing_names(&self) -> HashSet<String> {
        self.list_documents()
            .iter()
            .map(|n| conflict::conflict_key(n))
            .collect()
    }

    fn lock_for(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.vaultsync.tmp"))
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use std::fs;
    use tempfile::TempDir;

    fn writer(dir: &TempDir) -> AtomicFileWriter {
        AtomicFileWriter::new(dir.path(), FilePolicy::default())
    }

    fn pending(id: &str, filename: &str, body: &str) -> PendingWrite {
        PendingWrite {
            item_id: ItemId::from(id),
            document: Document::new(filename, body),
        }
    }

    #[tokio::test]
    async fn write_creates_parents_and_cleans_tmp() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);
        let path = w.write("sub/deep/note.md", "hello\r\nworld\r\n").await.unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "hello\nworld\n");
        assert!(!tmp_path_for(&path).exists(), "temp file must be renamed away");
    }

    #[tokio::test]
    async fn overwrite_replaces_whole_content() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);
        w.write("a.md", "first version, quite long").await.unwrap();
        w.write("a.md", "v2").await.unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("a.md")).unwrap(), "v2");
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn rename_failure_leaves_destination_and_cleans_tmp() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);
        // A file cannot replace a non-empty directory, whatever the privileges.
        let path = dir.path().join("occupied.md");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("keep.txt"), "original").unwrap();
        let tmp = tmp_path_for(&path);

        let err = w.write_with_tmp(&path, "new content", &tmp).await.unwrap_err();

        assert!(matches!(err, SyncError::Io { .. }));
        assert!(path.is_dir());
        assert_eq!(fs::read_to_string(path.join("keep.txt")).unwrap(), "original");
        assert!(!tmp.exists(), "temp file must be removed after a failed rename");
        assert_eq!(entries(dir.path()), vec!["occupied.md"]);
    }

    #[tokio::test]
    async fn failed_tmp_write_leaves_original_bytes() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);
        let path = dir.path().join("file.md");
        fs::write(&path, "original").unwrap();
        let tmp = dir.path().join("missing").join(".file.md.vaultsync.tmp");

        let err = w.write_with_tmp(&path, "new content", &tmp).await.unwrap_err();

        assert!(matches!(err, SyncError::Io { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "original");
        assert!(!tmp.exists());
        assert_eq!(entries(dir.path()), vec!["file.md"]);
    }

    #[tokio::test]
    async fn batch_resolves_duplicate_names() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);
        let report = w
            .write_batch(
                vec![pending("1", "Notes.md", "one"), pending("2", "Notes.md", "two")],
                true,
                true,
            )
            .await;

        assert_eq!(report.successful, 2);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts_resolved, 1);
        assert_eq!(report.writes[0].filename, "Notes.md");
        assert_eq!(report.writes[1].filename, "Notes_1.md");
        assert!(matches!(
            &report.writes[1].outcome,
            WriteOutcome::Written { renamed_from: Some(from), .. } if from == "Notes.md"
        ));
        assert_eq!(fs::read_to_string(dir.path().join("Notes_1.md")).unwrap(), "two");
        assert!(report.conflict_report.unwrap().contains("Duplicate name"));
    }

    #[tokio::test]
    async fn names_stay_claimed_across_batches_of_a_run() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);
        w.begin_run(["Reserved.md"]);

        let first = w.write_batch(vec![pending("1", "Notes.md", "one")], true, true).await;
        let second = w
            .write_batch(
                vec![pending("2", "notes.md", "two"), pending("3", "reserved.md", "three")],
                true,
                true,
            )
            .await;

        assert_eq!(first.writes[0].filename, "Notes.md");
        assert_eq!(second.writes[0].filename, "notes_1.md");
        assert_eq!(second.writes[1].filename, "reserved_1.md");
        assert_eq!(second.batch_conflicts(), 2);

        // A fresh run releases the names.
        w.begin_run(Vec::<String>::new());
        let third = w.write_batch(vec![pending("1", "Notes.md", "again")], true, true).await;
        assert_eq!(third.writes[0].filename, "Notes.md");
        assert_eq!(third.conflicts[0].kind, ConflictKind::Existing);
    }

    #[tokio::test]
    async fn existing_file_is_kept_without_overwrite() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("keep.md"), "mine").unwrap();
        let w = writer(&dir);

        let report = w.write_batch(vec![pending("1", "keep.md", "theirs")], false, true).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.successful, 0);
        assert_eq!(fs::read_to_string(dir.path().join("keep.md")).unwrap(), "mine");
    }

    #[tokio::test]
    async fn unresolved_duplicates_are_skipped() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);
        let report = w
            .write_batch(
                vec![pending("1", "x.md", "one"), pending("2", "X.md", "two")],
                true,
                false,
            )
            .await;
        assert_eq!(report.successful, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.conflicts_resolved, 0);
        assert!(matches!(report.writes[1].outcome, WriteOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn delete_and_backup() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);
        w.write("gone.md", "bye").await.unwrap();

        let backup = w.backup("gone.md", BACKUP_SUFFIX).unwrap().unwrap();
        assert_eq!(backup, dir.path().join("gone.md.backup"));
        assert!(w.delete("gone.md").await.unwrap());
        assert!(!w.delete("gone.md").await.unwrap());
        assert_eq!(fs::read_to_string(backup).unwrap(), "bye");
        assert!(w.backup("gone.md", BACKUP_SUFFIX).unwrap().is_none());
    }

    #[test]
    fn cleanup_keeps_most_recent_backups() {
        let dir = TempDir::new().unwrap();
        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            let path = dir.path().join(format!("{name}.md.backup"));
            fs::write(&path, name).unwrap();
            set_file_mtime(&path, FileTime::from_unix_time(1_700_000_000 + i as i64 * 60, 0)).unwrap();
        }
        fs::write(dir.path().join("note.md"), "not a backup").unwrap();

        let removed = writer(&dir).cleanup_old_backups(2).unwrap();
        let mut removed: Vec<_> = removed
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        removed.sort();
        assert_eq!(removed, vec!["a.md.backup", "b.md.backup"]);
        assert!(dir.path().join("d.md.backup").exists());
        assert!(dir.path().join("note.md").exists());
    }

    #[test]
    fn validate_destination_creates_root_and_warns_without_vault_marker() {
        let dir = TempDir::new().unwrap();
        let w = AtomicFileWriter::new(dir.path().join("vault/notes"), FilePolicy::default());
        let warnings = w.validate_destination().unwrap();
        assert!(dir.path().join("vault/notes").is_dir());
        assert_eq!(warnings.len(), 1);

        fs::create_dir_all(dir.path().join("vault/.obsidian")).unwrap();
        assert!(w.validate_destination().unwrap().is_empty());
    }

    #[test]
    fn validate_destination_rejects_a_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, "").unwrap();
        let err = AtomicFileWriter::new(&file, FilePolicy::default())
            .validate_destination()
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation { .. }));
    }

    #[tokio::test]
    async fn listing_usage_and_verification() {
        let dir = TempDir::new().unwrap();
        let w = writer(&dir);
        w.write("b.md", "---\na: 1\n---\n\nbody\n").await.unwrap();
        w.write("a.md", "plain\n").await.unwrap();
        fs::write(dir.path().join("c.txt"), "x").unwrap();

        assert_eq!(w.list_documents(), vec!["a.md", "b.md"]);
        assert_eq!(w.disk_usage().file_count, 3);
        let reports = w.verify_all();
        assert!(reports.iter().all(IntegrityReport::is_valid));
        assert!(reports[1].has_frontmatter);
        assert_eq!(w.read_document("b.md").unwrap().body, "body\n");
    }
}
