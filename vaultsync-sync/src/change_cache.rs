//! Change cache: fingerprints of previously synced items.
//!
//! Persists a [`CacheFile`] JSON document, by default at
//! `<home>/.vaultsync/cache/<database_id>.json`. Writes use the atomic
//! `.tmp` + rename pattern. A missing or unreadable file never fails a run:
//! the cache starts empty and the problem is reported through
//! [`ChangeCache::load_warning`].

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use vaultsync_core::types::parse_timestamp;
use vaultsync_core::{ItemId, ItemSummary, RevisionToken};

use crate::error::{io_err, SyncError};

// ---------------------------------------------------------------------------
// Fingerprints
// ---------------------------------------------------------------------------

/// SHA-256 hex digest of rendered content, line endings normalised to LF.
pub fn content_hash(content: &str) -> String {
    let normalized = content.replace("\r\n", "\n");
    let mut h = Sha256::new();
    h.update(normalized.as_bytes());
    hex::encode(h.finalize())
}

/// SHA-256 hex digest of a JSON value serialised with sorted keys.
pub fn properties_hash(properties: &Value) -> String {
    // serde_json's default map is a BTreeMap, so keys serialise sorted.
    let mut h = Sha256::new();
    h.update(properties.to_string().as_bytes());
    hex::encode(h.finalize())
}

// ---------------------------------------------------------------------------
// On-disk format
// ---------------------------------------------------------------------------

/// One cached item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub item_id: ItemId,
    pub title: String,
    pub revision_token: RevisionToken,
    pub content_hash: String,
    #[serde(default)]
    pub properties_hash: Option<String>,
    pub file_path: String,
    /// RFC 3339; kept as text so a damaged value only expires its entry.
    pub cached_at: String,
    #[serde(default)]
    pub block_count: usize,
}

impl CacheEntry {
    pub fn cached_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.cached_at)
    }

    /// File name component of `file_path`.
    pub fn file_name(&self) -> Option<String> {
        Path::new(&self.file_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheFile {
    pub saved_at: DateTime<Utc>,
    pub entries: BTreeMap<String, CacheEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CacheCompat {
    Structured(CacheStructuredCompat),
    Legacy(BTreeMap<String, CacheEntry>),
}

#[derive(Debug, Deserialize)]
struct CacheStructuredCompat {
    #[allow(dead_code)]
    saved_at: Option<DateTime<Utc>>,
    entries: BTreeMap<String, CacheEntry>,
}

/// Path to the cache JSON for `name`, rooted at `home`.
///
/// `~/.vaultsync/cache/<name>.json`
pub fn store_path_at(home: &Path, name: &str) -> PathBuf {
    home.join(".vaultsync")
        .join("cache")
        .join(format!("{name}.json"))
}

// ---------------------------------------------------------------------------
// Change classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    New,
    Modified,
    Unchanged,
}

/// Candidates split by how they compare to the cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub new: Vec<ItemSummary>,
    pub modified: Vec<ItemSummary>,
    pub unchanged: Vec<ItemSummary>,
    /// Cached ids that no longer appear among the candidates.
    pub deleted: Vec<ItemId>,
}

impl ChangeSet {
    pub fn changed_count(&self) -> usize {
        self.new.len() + self.modified.len()
    }
}

/// Summary for status output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub size_bytes: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub path: PathBuf,
}

// ---------------------------------------------------------------------------
// ChangeCache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ChangeCache {
    path: PathBuf,
    entries: BTreeMap<String, CacheEntry>,
    load_warning: Option<String>,
}

impl ChangeCache {
    /// Empty cache that will save to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
            load_warning: None,
        }
    }

    /// Load from `path`; missing or corrupt files yield an empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut cache = Self::new(path.clone());
        if !path.exists() {
            return cache;
        }
        let parsed = std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str::<CacheCompat>(&raw).map_err(|e| e.to_string()));
        match parsed {
            Ok(CacheCompat::Structured(file)) => cache.entries = file.entries,
            Ok(CacheCompat::Legacy(entries)) => cache.entries = entries,
            Err(e) => {
                let warning = format!(
                    "change cache at {} is unreadable ({e}); starting with an empty cache",
                    path.display()
                );
                tracing::warn!("{warning}");
                cache.load_warning = Some(warning);
            }
        }
        cache
    }

    /// Save atomically: writes `<path>.tmp` then renames to `<path>`.
    pub fn save(&self) -> Result<(), SyncError> {
        let Some(dir) = self.path.parent() else {
            return Err(io_err(
                &self.path,
                std::io::Error::other("invalid cache path"),
            ));
        };
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

        let file = CacheFile {
            saved_at: Utc::now(),
            entries: self.entries.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&self.path, e));
        }
        tracing::debug!(path = %self.path.display(), entries = self.entries.len(), "saved change cache");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_warning(&self) -> Option<&str> {
        self.load_warning.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &ItemId) -> Option<&CacheEntry> {
        self.entries.get(&id.0)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    /// Record a successful sync of `id`.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        id: &ItemId,
        title: &str,
        revision: &RevisionToken,
        content: &str,
        file_path: &Path,
        properties: Option<&Value>,
        block_count: usize,
    ) {
        let entry = CacheEntry {
            item_id: id.clone(),
            title: title.to_string(),
            revision_token: revision.clone(),
            content_hash: content_hash(content),
            properties_hash: properties.map(properties_hash),
            file_path: file_path.to_string_lossy().into_owned(),
            cached_at: Utc::now().to_rfc3339(),
            block_count,
        };
        self.entries.insert(id.0.clone(), entry);
    }

    /// Missing entry, or any supplied fingerprint differs.
    pub fn is_changed(
        &self,
        id: &ItemId,
        revision: &RevisionToken,
        content: Option<&str>,
        properties: Option<&Value>,
    ) -> bool {
        let Some(entry) = self.entries.get(&id.0) else {
            return true;
        };
        if &entry.revision_token != revision {
            return true;
        }
        if let Some(content) = content {
            if entry.content_hash != content_hash(content) {
                return true;
            }
        }
        if let Some(properties) = properties {
            if entry.properties_hash.as_deref() != Some(properties_hash(properties).as_str()) {
                return true;
            }
        }
        false
    }

    /// Ids of candidates whose revision differs from (or is absent in) the
    /// cache. Listing only exposes revisions, so content is not compared.
    pub fn get_changed(&self, candidates: &[ItemSummary]) -> Vec<ItemId> {
        candidates
            .iter()
            .filter(|c| self.is_changed(&c.id, &c.revision, None, None))
            .map(|c| c.id.clone())
            .collect()
    }

    pub fn classify(&self, item: &ItemSummary) -> ChangeKind {
        match self.entries.get(&item.id.0) {
            None => ChangeKind::New,
            Some(e) if e.revision_token != item.revision => ChangeKind::Modified,
            Some(_) => ChangeKind::Unchanged,
        }
    }

    pub fn detect_changes(&self, candidates: &[ItemSummary]) -> ChangeSet {
        let mut set = ChangeSet::default();
        let mut seen = HashSet::new();
        for item in candidates {
            seen.insert(item.id.0.as_str());
            match self.classify(item) {
                ChangeKind::New => set.new.push(item.clone()),
                ChangeKind::Modified => set.modified.push(item.clone()),
                ChangeKind::Unchanged => set.unchanged.push(item.clone()),
            }
        }
        set.deleted = self
            .entries
            .keys()
            .filter(|k| !seen.contains(k.as_str()))
            .map(|k| ItemId::from(k.as_str()))
            .collect();
        set
    }

    /// Candidates ordered new, then modified, then unchanged; oldest edit
    /// first within each group. Ties keep their listing order.
    pub fn prioritize(&self, candidates: &[ItemSummary]) -> Vec<ItemSummary> {
        let mut ordered: Vec<(ChangeKind, &ItemSummary)> =
            candidates.iter().map(|c| (self.classify(c), c)).collect();
        ordered.sort_by(|(ka, a), (kb, b)| {
            ka.cmp(kb)
                .then_with(|| a.last_edited_time.cmp(&b.last_edited_time))
        });
        ordered.into_iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn remove(&mut self, id: &ItemId) -> Option<CacheEntry> {
        self.entries.remove(&id.0)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop entries cached more than `max_age` ago. Unparsable timestamps
    /// count as expired. Returns the number removed.
    pub fn cleanup(&mut self, max_age: ChronoDuration) -> usize {
        let cutoff = Utc::now() - max_age;
        let before = self.entries.len();
        self.entries
            .retain(|_, e| e.cached_at().is_some_and(|t| t >= cutoff));
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::info!(removed, "pruned expired cache entries");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let times: Vec<DateTime<Utc>> = self.entries.values().filter_map(|e| e.cached_at()).collect();
        CacheStats {
            total_entries: self.entries.len(),
            size_bytes: std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0),
            oldest: times.iter().min().copied(),
            newest: times.iter().max().copied(),
            path: self.path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;
    use tempfile::TempDir;

    fn item(id: &str, rev: &str) -> ItemSummary {
        ItemSummary::from_api(&json!({
            "id": id,
            "created_time": "2024-01-01T00:00:00Z",
            "last_edited_time": rev,
            "properties": {}
        }))
        .unwrap()
    }

    fn cached(id: &str, rev: &str) -> ChangeCache {
        let mut cache = ChangeCache::new("/unused/cache.json");
        cache.update(
            &ItemId::from(id),
            "T",
            &RevisionToken::from(rev),
            "body",
            Path::new("/vault/T.md"),
            Some(&json!({"b": 1, "a": 2})),
            3,
        );
        cache
    }

    #[test]
    fn empty_cache_reports_everything_changed_then_nothing() {
        let mut cache = ChangeCache::new("/unused/cache.json");
        let items = vec![
            item("a", "2024-01-01T00:00:00Z"),
            item("b", "2024-01-02T00:00:00Z"),
            item("c", "2024-01-03T00:00:00Z"),
        ];
        assert_eq!(cache.get_changed(&items).len(), 3);

        for i in &items {
            cache.update(&i.id, &i.title, &i.revision, "x", Path::new("/v/x.md"), None, 0);
        }
        assert!(cache.get_changed(&items).is_empty());
    }

    #[rstest]
    #[case::same("r1", None, None, false)]
    #[case::revision("r2", None, None, true)]
    #[case::content("r1", Some("other body"), None, true)]
    #[case::content_crlf_equivalent("r1", Some("body"), None, false)]
    #[case::properties("r1", None, Some(json!({"a": 2, "b": 9})), true)]
    #[case::properties_reordered("r1", None, Some(json!({"a": 2, "b": 1})), false)]
    fn change_detection(
        #[case] rev: &str,
        #[case] content: Option<&str>,
        #[case] props: Option<Value>,
        #[case] changed: bool,
    ) {
        let cache = cached("x", "r1");
        assert_eq!(
            cache.is_changed(
                &ItemId::from("x"),
                &RevisionToken::from(rev),
                content,
                props.as_ref()
            ),
            changed
        );
    }

    #[test]
    fn missing_entry_is_changed() {
        let cache = cached("x", "r1");
        assert!(cache.is_changed(&ItemId::from("y"), &RevisionToken::from("r1"), None, None));
    }

    #[test]
    fn crlf_content_hashes_like_lf() {
        assert_eq!(content_hash("a\r\nb\r\n"), content_hash("a\nb\n"));
    }

    #[test]
    fn detect_changes_reports_deleted_ids() {
        let cache = cached("gone", "r1");
        let set = cache.detect_changes(&[item("fresh", "2024-01-01T00:00:00Z")]);
        assert_eq!(set.new.len(), 1);
        assert_eq!(set.deleted, vec![ItemId::from("gone")]);
        assert_eq!(set.changed_count(), 1);
    }

    #[test]
    fn prioritize_orders_new_modified_unchanged() {
        let mut cache = ChangeCache::new("/unused/cache.json");
        let unchanged = item("u", "2024-03-01T00:00:00Z");
        let modified = item("m", "2024-02-01T00:00:00Z");
        for i in [&unchanged, &modified] {
            cache.update(&i.id, "", &i.revision, "", Path::new("/v"), None, 0);
        }
        let modified_now = item("m", "2024-02-02T00:00:00Z");
        let new = item("n", "2024-01-01T00:00:00Z");

        let ordered = cache.prioritize(&[unchanged.clone(), modified_now, new]);
        let ids: Vec<_> = ordered.iter().map(|i| i.id.0.as_str()).collect();
        assert_eq!(ids, vec!["n", "m", "u"]);
    }

    #[test]
    fn prioritize_puts_older_edits_first_within_a_group() {
        let cache = ChangeCache::new("/unused/cache.json");
        let ordered = cache.prioritize(&[
            item("late", "2024-03-01T00:00:00Z"),
            item("early", "2024-01-01T00:00:00Z"),
            item("tie", "2024-01-01T00:00:00Z"),
        ]);
        let ids: Vec<_> = ordered.iter().map(|i| i.id.0.as_str()).collect();
        assert_eq!(ids, vec!["early", "tie", "late"]);
    }

    #[test]
    fn cleanup_prunes_old_and_unparsable_entries() {
        let mut cache = cached("fresh", "r1");
        let mut old = cache.get(&ItemId::from("fresh")).unwrap().clone();
        old.item_id = ItemId::from("old");
        old.cached_at = (Utc::now() - ChronoDuration::days(45)).to_rfc3339();
        cache.entries.insert("old".into(), old.clone());
        let mut broken = old;
        broken.item_id = ItemId::from("broken");
        broken.cached_at = "last tuesday".into();
        cache.entries.insert("broken".into(), broken);

        assert_eq!(cache.cleanup(ChronoDuration::days(30)), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&ItemId::from("fresh")).is_some());
    }

    #[test]
    fn roundtrip_save_load() {
        let tmp = TempDir::new().unwrap();
        let path = store_path_at(tmp.path(), "db");
        let mut cache = cached("x", "r1");
        cache.path = path.clone();
        cache.save().unwrap();

        let loaded = ChangeCache::load(&path);
        assert!(loaded.load_warning().is_none());
        assert_eq!(loaded.get(&ItemId::from("x")), cache.get(&ItemId::from("x")));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_file_degrades_to_empty_cache() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache.json");
        std::fs::write(&path, "{ not json").unwrap();

        let cache = ChangeCache::load(&path);
        assert!(cache.is_empty());
        assert!(cache.load_warning().unwrap().contains("unreadable"));
    }

    #[test]
    fn legacy_flat_map_is_accepted() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache.json");
        let entry = cached("x", "r1").get(&ItemId::from("x")).unwrap().clone();
        let legacy = serde_json::to_string(&BTreeMap::from([("x".to_string(), entry)])).unwrap();
        std::fs::write(&path, legacy).unwrap();

        let cache = ChangeCache::load(&path);
        assert_eq!(cache.len(), 1);
        assert!(cache.load_warning().is_none());
    }

    #[test]
    fn stats_report_bounds() {
        let cache = cached("x", "r1");
        let stats = cache.stats();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.oldest, stats.newest);
        assert!(stats.oldest.is_some());
    }
}
