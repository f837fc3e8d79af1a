use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use vaultsync_core::{Block, BlockKind, ContentTree, ConversionOutput, ItemId, ItemSummary, RichText};
use vaultsync_render::{ConvertOptions, LinkReport, MarkdownConverter};
use vaultsync_sync::{
    async_trait, ChangeCache, ConvertError, Converter, Fetcher, ItemPage, ListQuery,
    RetryPolicy, SyncOptions, SyncOrchestrator, SyncResult, SyncState, UpstreamError,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

fn item(id: &str, title: &str, edited: &str) -> ItemSummary {
    ItemSummary::from_api(&json!({
        "id": id,
        "created_time": "2024-01-01T00:00:00Z",
        "last_edited_time": edited,
        "properties": {
            "Name": { "type": "title", "title": [{ "plain_text": title }] }
        }
    }))
    .unwrap()
}

#[derive(Default)]
struct FakeSource {
    items: Mutex<Vec<ItemSummary>>,
    list_error: Option<UpstreamError>,
    content_calls: AtomicUsize,
    /// id → (label, href) appended to the item's body.
    links: Mutex<HashMap<String, (String, String)>>,
}

impl FakeSource {
    fn with_items(items: Vec<ItemSummary>) -> Self {
        Self {
            items: Mutex::new(items),
            ..Self::default()
        }
    }

    fn numbered(n: usize) -> Self {
        Self::with_items(
            (1..=n)
                .map(|i| item(&format!("p{i}"), &format!("Page {i}"), "2024-02-01T00:00:00Z"))
                .collect(),
        )
    }

    fn link(&self, from: &str, label: &str, href: &str) {
        self.links
            .lock()
            .unwrap()
            .insert(from.to_string(), (label.to_string(), href.to_string()));
    }

    fn edit(&self, id: &str, edited: &str) {
        let mut items = self.items.lock().unwrap();
        let pos = items.iter().position(|i| i.id.0 == id).unwrap();
        let title = items[pos].title.clone();
        items[pos] = item(id, &title, edited);
    }
}

#[async_trait]
impl Fetcher for FakeSource {
    async fn test_connection(&self) -> Result<(), UpstreamError> {
        Ok(())
    }

    async fn list_items(&self, query: &ListQuery) -> Result<ItemPage, UpstreamError> {
        if let Some(e) = &self.list_error {
            return Err(e.clone());
        }
        let items = self.items.lock().unwrap().clone();
        let start: usize = query.cursor.as_deref().map_or(0, |c| c.parse().unwrap());
        let end = (start + query.page_size).min(items.len());
        Ok(ItemPage {
            items: items[start..end].to_vec(),
            next_cursor: (end < items.len()).then(|| end.to_string()),
            has_more: end < items.len(),
        })
    }

    async fn get_item_content(&self, id: &ItemId) -> Result<ContentTree, UpstreamError> {
        self.content_calls.fetch_add(1, Ordering::SeqCst);
        let item = self
            .items
            .lock()
            .unwrap()
            .iter()
            .find(|i| &i.id == id)
            .cloned()
            .ok_or_else(|| UpstreamError::NotFound(id.0.clone()))?;
        let mut text = vec![RichText::plain(format!("body of {}", item.title))];
        if let Some((label, href)) = self.links.lock().unwrap().get(&id.0) {
            text.push(RichText::plain(" see "));
            text.push(RichText {
                href: Some(href.clone()),
                ..RichText::plain(label.as_str())
            });
        }
        let body = Block::new(BlockKind::Paragraph { text });
        Ok(ContentTree::new(item, vec![body]))
    }
}

/// Markdown conversion that fails for selected ids.
struct SelectiveConverter {
    inner: MarkdownConverter,
    failing: HashSet<String>,
}

impl SelectiveConverter {
    fn failing(ids: &[&str]) -> Self {
        Self {
            inner: MarkdownConverter::new(ConvertOptions::default()).unwrap(),
            failing: ids.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Converter for SelectiveConverter {
    fn convert(&self, tree: &ContentTree) -> Result<ConversionOutput, ConvertError> {
        if self.failing.contains(&tree.item.id.0) {
            return Err(ConvertError(format!("cannot convert {}", tree.item.id)));
        }
        Ok(self.inner.convert(tree)?)
    }

    fn filename_for(&self, item: &ItemSummary) -> String {
        self.inner.filename_for(item)
    }

    fn begin_run(&self) {
        Converter::begin_run(&self.inner);
    }

    fn register_page(&self, id: &ItemId, title: &str, filename: &str) {
        self.inner.register_page(id, title, filename);
    }

    fn link_report(&self) -> Option<LinkReport> {
        Converter::link_report(&self.inner)
    }
}

struct Env {
    _tmp: TempDir,
    vault: std::path::PathBuf,
    cache_path: std::path::PathBuf,
}

impl Env {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let vault = tmp.path().join("vault");
        fs::create_dir_all(vault.join(".obsidian")).unwrap();
        let cache_path = tmp.path().join("cache.json");
        Self {
            _tmp: tmp,
            vault,
            cache_path,
        }
    }

    fn options(&self) -> SyncOptions {
        let mut opts = SyncOptions::new(&self.vault);
        opts.batch_size = 2;
        opts.max_concurrency = 3;
        opts.requests_per_second = 1000.0;
        opts.burst = 100;
        opts.retry = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        opts
    }

    fn orchestrator(
        &self,
        source: &Arc<FakeSource>,
        failing: &[&str],
    ) -> SyncOrchestrator<FakeSource, SelectiveConverter> {
        self.orchestrator_with(source, failing, self.options())
    }

    fn orchestrator_with(
        &self,
        source: &Arc<FakeSource>,
        failing: &[&str],
        options: SyncOptions,
    ) -> SyncOrchestrator<FakeSource, SelectiveConverter> {
        SyncOrchestrator::new(
            Arc::clone(source),
            Arc::new(SelectiveConverter::failing(failing)),
            ChangeCache::load(&self.cache_path),
            options,
        )
    }

    fn documents(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.vault)
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".md"))
            .collect();
        names.sort();
        names
    }
}

fn mtime(path: &Path) -> std::time::SystemTime {
    fs::metadata(path).unwrap().modified().unwrap()
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn one_conversion_failure_is_isolated() {
    let env = Env::new();
    let source = Arc::new(FakeSource::numbered(5));
    let mut orch = env.orchestrator(&source, &["p3"]);

    let result = orch.sync_all(false).await;

    assert_eq!(result.state(), SyncState::Completed);
    assert_eq!(result.total(), 5);
    assert_eq!(result.successful(), 4);
    assert_eq!(result.failed(), 1);
    assert_eq!(result.error_count(), 1);
    assert_eq!(result.exit_code(), 1);
    assert_eq!(result.failed_item_ids(), vec![ItemId::from("p3")]);
    assert_eq!(
        env.documents(),
        vec!["Page 1.md", "Page 2.md", "Page 4.md", "Page 5.md"]
    );
    assert_eq!(orch.state(), SyncState::Completed);
}

#[tokio::test]
async fn unchanged_items_are_skipped_on_the_next_run() {
    let env = Env::new();
    let source = Arc::new(FakeSource::numbered(5));

    let first = env.orchestrator(&source, &[]).sync_all(false).await;
    assert_eq!(first.successful(), 5);
    assert_eq!(first.exit_code(), 0);
    let calls = source.content_calls.load(Ordering::SeqCst);
    let page1 = env.vault.join("Page 1.md");
    let before = mtime(&page1);

    let second = env.orchestrator(&source, &[]).sync_all(false).await;
    assert_eq!(second.skipped(), 5);
    assert_eq!(second.successful(), 0);
    assert_eq!(source.content_calls.load(Ordering::SeqCst), calls);
    assert_eq!(mtime(&page1), before);

    source.edit("p2", "2024-03-01T00:00:00Z");
    let third = env.orchestrator(&source, &[]).sync_all(false).await;
    assert_eq!(third.successful(), 1);
    assert_eq!(third.skipped(), 4);
    assert_eq!(third.items().last().unwrap().filename.as_deref(), Some("Page 2.md"));
}

#[tokio::test]
async fn force_rewrites_everything() {
    let env = Env::new();
    let source = Arc::new(FakeSource::numbered(3));
    env.orchestrator(&source, &[]).sync_all(false).await;

    let forced = env.orchestrator(&source, &[]).sync_all(true).await;
    assert_eq!(forced.successful(), 3);
    assert_eq!(forced.skipped(), 0);
    // Each item keeps its own file instead of being renamed.
    assert_eq!(env.documents(), vec!["Page 1.md", "Page 2.md", "Page 3.md"]);
}

#[tokio::test]
async fn same_titles_across_batches_get_distinct_files() {
    let env = Env::new();
    let source = Arc::new(FakeSource::with_items(vec![
        item("a", "Notes", "2024-01-03T00:00:00Z"),
        item("b", "notes", "2024-01-02T00:00:00Z"),
        item("c", "Notes", "2024-01-01T00:00:00Z"),
    ]));

    let result = env.orchestrator(&source, &[]).sync_all(false).await;

    assert_eq!(result.successful(), 3);
    assert_eq!(env.documents(), vec!["Notes.md", "Notes_2.md", "notes_1.md"]);
    assert!(result.warnings().iter().any(|w| w.contains("conflict")));
    assert_eq!(result.conflict_reports().len(), 2);
    // The oldest edit claims the base name.
    let file_of = |id: &str| {
        result
            .items()
            .iter()
            .find(|o| o.item_id.0 == id)
            .and_then(|o| o.filename.clone())
    };
    assert_eq!(file_of("c").as_deref(), Some("Notes.md"));
    assert_eq!(file_of("b").as_deref(), Some("notes_1.md"));
    assert_eq!(file_of("a").as_deref(), Some("Notes_2.md"));
}

#[tokio::test]
async fn fatal_listing_error_fails_the_run() {
    let env = Env::new();
    let source = Arc::new(FakeSource {
        list_error: Some(UpstreamError::Auth("401".into())),
        ..FakeSource::numbered(2)
    });
    let mut orch = env.orchestrator(&source, &[]);

    let result = orch.sync_all(false).await;

    assert_eq!(result.state(), SyncState::Failed);
    assert_eq!(result.successful() + result.failed(), 0);
    assert!(result.error_count() >= 1);
    assert!(env.documents().is_empty());
    assert_eq!(source.content_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn too_many_projected_conflicts_fail_before_fetching() {
    let env = Env::new();
    let source = Arc::new(FakeSource::with_items(vec![
        item("a", "Plan", "2024-01-01T00:00:00Z"),
        item("b", "plan", "2024-01-01T00:00:00Z"),
        item("c", "Log", "2024-01-01T00:00:00Z"),
        item("d", "LOG", "2024-01-01T00:00:00Z"),
    ]));
    let mut options = env.options();
    options.max_conflicts = 1;
    let mut orch = env.orchestrator_with(&source, &[], options);

    let result = orch.sync_all(false).await;

    assert_eq!(result.state(), SyncState::Failed);
    assert!(result.errors().iter().any(|e| e.contains("filename conflicts")));
    assert_eq!(source.content_calls.load(Ordering::SeqCst), 0);
    assert!(env.documents().is_empty());
}

#[tokio::test]
async fn destination_that_is_a_file_fails_before_fetching() {
    let env = Env::new();
    let source = Arc::new(FakeSource::numbered(2));
    let blocker = env.vault.join("not-a-folder");
    fs::write(&blocker, "plain file").unwrap();
    let mut options = env.options();
    options.destination = blocker.clone();
    let mut orch = env.orchestrator_with(&source, &[], options);

    let result = orch.sync_all(false).await;

    assert_eq!(result.state(), SyncState::Failed);
    assert!(result.errors().iter().any(|e| e.contains("not a directory")));
    assert_eq!(source.content_calls.load(Ordering::SeqCst), 0);
    assert_eq!(fs::read_to_string(&blocker).unwrap(), "plain file");
    assert!(env.documents().is_empty());
}

#[tokio::test]
async fn repeated_listing_entries_sync_once() {
    let env = Env::new();
    let source = Arc::new(FakeSource::with_items(vec![
        item("a", "Alpha", "2024-01-01T00:00:00Z"),
        item("b", "Beta", "2024-01-01T00:00:00Z"),
        item("a", "Alpha", "2024-01-02T00:00:00Z"),
    ]));

    let result = env.orchestrator(&source, &[]).sync_all(false).await;

    assert_eq!(result.total(), 2);
    assert_eq!(result.successful(), 2);
    assert_eq!(source.content_calls.load(Ordering::SeqCst), 2);
    assert_eq!(env.documents(), vec!["Alpha.md", "Beta.md"]);
}

#[tokio::test]
async fn links_between_synced_pages_become_wiki_links() {
    const PLAN: &str = "11111111111111111111111111111111";
    const ROADMAP: &str = "22222222-2222-2222-2222-222222222222";
    let env = Env::new();
    let source = Arc::new(FakeSource::with_items(vec![
        item(PLAN, "Plan", "2024-01-01T00:00:00Z"),
        item(ROADMAP, "Roadmap", "2024-01-02T00:00:00Z"),
    ]));
    source.link(PLAN, "roadmap", "/22222222222222222222222222222222");
    source.link(
        ROADMAP,
        "old plan",
        "https://www.notion.so/Old-Plan-33333333333333333333333333333333",
    );

    let result = env.orchestrator(&source, &[]).sync_all(false).await;

    assert_eq!(result.successful(), 2);
    let plan = fs::read_to_string(env.vault.join("Plan.md")).unwrap();
    assert!(plan.contains("body of Plan see [[Roadmap|roadmap]]"), "{plan}");
    let roadmap = fs::read_to_string(env.vault.join("Roadmap.md")).unwrap();
    assert!(roadmap.contains("see ~~old plan~~ (broken link)"), "{roadmap}");

    let links = result.links().unwrap();
    assert_eq!((links.total, links.valid, links.broken), (2, 1, 1));
    assert_eq!(links.registered_pages, 2);
    assert!(result.warnings().iter().any(|w| w.contains("outside the vault")));
    let report = vaultsync_sync::report::render_sync_report(&result);
    assert!(report.contains("## Links\n- resolved: 2 (1 valid, 1 broken)\n"));
}

#[tokio::test]
async fn unknown_item_is_a_per_item_failure() {
    let env = Env::new();
    let source = Arc::new(FakeSource::numbered(1));
    let result = env
        .orchestrator(&source, &[])
        .sync_item(ItemId::from("missing"))
        .await;

    assert_eq!(result.state(), SyncState::Completed);
    assert_eq!(result.failed(), 1);
    assert!(result.errors()[0].contains("not found"));
}

#[tokio::test]
async fn cancellation_stops_between_batches_and_flushes() {
    let env = Env::new();
    let source = Arc::new(FakeSource::numbered(5));
    let orch = env.orchestrator(&source, &[]);
    let trigger = orch.cancellation_token();
    let mut orch = orch.with_progress(Arc::new(move |done: usize, _total: usize| {
        if done >= 2 {
            trigger.cancel();
        }
    }));

    let result = orch.sync_all(false).await;

    let interruption = result.interruption().expect("interruption report");
    assert_eq!(interruption.processed, 2);
    assert_eq!(interruption.remaining, 3);
    assert_eq!(interruption.flushed, 2);
    assert!(interruption.corrupted_files.is_empty());
    assert_eq!(result.successful(), 2);
    assert_eq!(result.state(), SyncState::Completed);
    assert_eq!(env.documents().len(), 2);

    // Written items are cached, so a fresh run picks up only the rest.
    let rest = env.orchestrator(&source, &[]).sync_all(false).await;
    assert_eq!(rest.successful(), 3);
    assert_eq!(rest.skipped(), 2);
}

#[tokio::test]
async fn recovery_replays_failed_items() {
    let env = Env::new();
    let source = Arc::new(FakeSource::numbered(4));
    let prior: SyncResult = env.orchestrator(&source, &["p2", "p4"]).sync_all(false).await;
    assert_eq!(prior.failed(), 2);

    let calls = source.content_calls.load(Ordering::SeqCst);
    let recovered = env
        .orchestrator(&source, &[])
        .recover_from_failed_sync(&prior)
        .await;

    assert_eq!(recovered.total(), 2);
    assert_eq!(recovered.successful(), 2);
    assert_eq!(source.content_calls.load(Ordering::SeqCst), calls + 2);
    assert_eq!(env.documents().len(), 4);
}

#[tokio::test]
async fn cleanup_backs_up_and_removes_unreadable_files() {
    let env = Env::new();
    let source = Arc::new(FakeSource::numbered(1));
    let orch = env.orchestrator(&source, &[]);
    fs::write(env.vault.join("broken.md"), [0x66, 0x6f, 0xff, 0xfe]).unwrap();
    fs::write(env.vault.join("fine.md"), "ok\n").unwrap();

    let report = orch.cleanup_failed_files().await;

    assert_eq!(report.checked, 2);
    assert_eq!(report.corrupted, vec!["broken.md"]);
    assert_eq!(report.backups, vec!["broken.md.corrupted"]);
    assert_eq!(report.deleted, vec!["broken.md"]);
    assert!(report.integrity.contains("- unreadable: 1"));
    assert!(report.integrity.contains("- broken.md:"));
    assert!(!env.vault.join("broken.md").exists());
    assert!(env.vault.join("broken.md.corrupted").exists());
    assert!(env.vault.join("fine.md").exists());
}

#[tokio::test]
async fn preview_classifies_without_writing() {
    let env = Env::new();
    let source = Arc::new(FakeSource::numbered(3));
    env.orchestrator(&source, &[]).sync_all(false).await;
    source.edit("p1", "2024-05-01T00:00:00Z");
    source.items.lock().unwrap().push(item("p9", "Page 1", "2024-01-01T00:00:00Z"));
    let calls = source.content_calls.load(Ordering::SeqCst);

    let preview = env.orchestrator(&source, &[]).preview(10).await.unwrap();

    let changes: Vec<_> = preview.items.iter().map(|i| (i.id.0.as_str(), i.change)).collect();
    use vaultsync_sync::change_cache::ChangeKind::*;
    assert_eq!(
        changes,
        vec![("p1", Modified), ("p2", Unchanged), ("p3", Unchanged), ("p9", New)]
    );
    assert_eq!(preview.estimated_files()[3], "Page 1.md");
    assert_eq!(preview.warnings.len(), 1);
    assert_eq!(source.content_calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn statistics_compare_source_and_vault() {
    let env = Env::new();
    let source = Arc::new(FakeSource::numbered(4));
    env.orchestrator(&source, &["p4"]).sync_all(false).await;

    let stats = env.orchestrator(&source, &[]).statistics().await.unwrap();
    assert_eq!(stats.source_items, 4);
    assert_eq!(stats.local_documents, 3);
    assert_eq!(stats.missing_documents, 1);
    assert_eq!(stats.coverage_percent, 75.0);
    assert_eq!(stats.cache.total_entries, 3);
}
