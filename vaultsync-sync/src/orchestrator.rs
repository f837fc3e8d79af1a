//! Sync orchestrator: drives one run through the pipeline stages.
//!
//! ```text
//! Idle → Validating → Fetching → Converting ⇄ Writing → Reporting → Completed
//!             │            │
//!             └────────────┴──────────────────────────────────────→ Failed
//! ```
//!
//! `Failed` means nothing was processed: pre-flight validation failed or the
//! candidate listing hit a fatal upstream error. Per-item failures never fail
//! the run; they are recorded and the run ends `Completed`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use vaultsync_core::{Document, ItemId, ItemSummary};

use crate::change_cache::{CacheStats, ChangeCache, ChangeKind};
use crate::conflict::{self, Conflict, ConflictKind};
use crate::error::{SyncError, UpstreamError};
use crate::executor::{ConcurrentExecutor, ProgressFn};
use crate::integrity;
use crate::pipeline::{SyncOptions, SyncScope};
use crate::rate_limit::RateLimiter;
use crate::result::{InterruptionReport, SyncResult, SyncState};
use crate::retry::retry_with_backoff;
use crate::source::{Converter, Fetcher, ListQuery};
use crate::writer::{AtomicFileWriter, DiskUsage, PendingWrite, WriteOutcome, CORRUPTED_SUFFIX};

/// Candidates examined by pre-flight conflict projection.
const VALIDATION_SAMPLE: usize = 10;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Result of [`SyncOrchestrator::test_connection`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionReport {
    pub upstream_reachable: bool,
    pub destination_writable: bool,
    /// An `.obsidian` folder was found at or above the destination.
    pub vault_detected: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ConnectionReport {
    pub fn ok(&self) -> bool {
        self.upstream_reachable && self.destination_writable && self.errors.is_empty()
    }
}

/// Result of pre-flight validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// In-batch collisions among the sampled candidates.
    pub projected_conflicts: usize,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewItem {
    pub id: ItemId,
    pub title: String,
    pub last_edited_time: DateTime<Utc>,
    pub filename: String,
    pub change: ChangeKind,
}

/// What a run would do, without fetching content or writing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncPreview {
    pub items: Vec<PreviewItem>,
    /// More candidates exist beyond the previewed page.
    pub has_more: bool,
    #[serde(skip)]
    pub potential_conflicts: Vec<Conflict>,
    pub warnings: Vec<String>,
}

impl SyncPreview {
    pub fn estimated_files(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.filename.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatistics {
    pub source_items: usize,
    pub local_documents: usize,
    pub disk_usage: DiskUsage,
    pub valid_documents: usize,
    pub invalid_documents: usize,
    /// Local documents as a percentage of source items.
    pub coverage_percent: f64,
    pub missing_documents: usize,
    pub extra_documents: usize,
    pub cache: CacheStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub checked: usize,
    pub corrupted: Vec<String>,
    pub backups: Vec<String>,
    pub deleted: Vec<String>,
    /// Readable documents over the size or line-length policy.
    pub oversized: Vec<String>,
    pub pruned_backups: usize,
    pub errors: Vec<String>,
    /// Markdown integrity summary taken before anything was removed.
    pub integrity: String,
}

/// A successfully fetched and converted item.
#[derive(Debug)]
struct Converted {
    item: ItemSummary,
    document: Document,
    warnings: Vec<String>,
    unsupported: Vec<String>,
    block_count: usize,
}

/// Cache fields of a written document, applied at `Reporting`.
struct CacheUpdate {
    item: ItemSummary,
    content: String,
    path: std::path::PathBuf,
    block_count: usize,
}

// ---------------------------------------------------------------------------
// SyncOrchestrator
// ---------------------------------------------------------------------------

pub struct SyncOrchestrator<F, C> {
    fetcher: Arc<F>,
    converter: Arc<C>,
    writer: AtomicFileWriter,
    executor: ConcurrentExecutor,
    cache: ChangeCache,
    options: SyncOptions,
    cancel: CancellationToken,
    progress: Option<Arc<ProgressFn<'static>>>,
    state: SyncState,
}

impl<F, C> SyncOrchestrator<F, C>
where
    F: Fetcher,
    C: Converter,
{
    pub fn new(fetcher: Arc<F>, converter: Arc<C>, cache: ChangeCache, options: SyncOptions) -> Self {
        let limiter = Arc::new(RateLimiter::new(options.requests_per_second, options.burst));
        Self {
            fetcher,
            converter,
            writer: AtomicFileWriter::new(options.destination.clone(), options.file_policy),
            executor: ConcurrentExecutor::new(limiter, options.max_concurrency),
            cache,
            options,
            cancel: CancellationToken::new(),
            progress: None,
            state: SyncState::Idle,
        }
    }

    /// Share a cancellation token with the caller (e.g. a Ctrl-C handler).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// `(completed, total)` across the whole run.
    pub fn with_progress(mut self, progress: Arc<ProgressFn<'static>>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn cache(&self) -> &ChangeCache {
        &self.cache
    }

    pub fn writer(&self) -> &AtomicFileWriter {
        &self.writer
    }

    pub fn executor(&self) -> &ConcurrentExecutor {
        &self.executor
    }

    // -- checks -----------------------------------------------------------

    /// Reachability of the source and writability of the destination.
    pub async fn test_connection(&self) -> ConnectionReport {
        let mut report = ConnectionReport::default();
        let fetcher = self.fetcher.as_ref();
        match retry_with_backoff(&self.options.retry, "test_connection", || {
            fetcher.test_connection()
        })
        .await
        {
            Ok(()) => report.upstream_reachable = true,
            Err(e) => report.errors.push(format!("cannot reach the source: {e}")),
        }
        match self.writer.validate_destination() {
            Ok(warnings) => {
                report.destination_writable = true;
                report.vault_detected = warnings.is_empty();
                report.warnings.extend(warnings);
            }
            Err(e) => report.errors.push(validation_messages(e).join("; ")),
        }
        tracing::info!(
            upstream = report.upstream_reachable,
            destination = report.destination_writable,
            "connection test finished"
        );
        report
    }

    /// Pre-flight checks run before any content is fetched.
    pub async fn validate(&self) -> ValidationReport {
        let connection = self.test_connection().await;
        let mut report = ValidationReport {
            errors: connection.errors,
            warnings: connection.warnings,
            projected_conflicts: 0,
        };
        if !connection.upstream_reachable {
            return report;
        }

        let query = ListQuery {
            page_size: VALIDATION_SAMPLE.min(self.options.page_size),
            ..ListQuery::default()
        };
        match self.list_page(&query).await {
            Ok(page) => {
                let names: Vec<String> = page
                    .items
                    .iter()
                    .map(|i| self.converter.filename_for(i))
                    .collect();
                report.projected_conflicts = conflict::check_conflicts(&names, &HashSet::new())
                    .iter()
                    .filter(|c| c.kind == ConflictKind::Batch)
                    .count();
                if report.projected_conflicts > self.options.max_conflicts {
                    report.errors.push(format!(
                        "{} filename conflicts projected among the first {} items (limit {})",
                        report.projected_conflicts,
                        names.len(),
                        self.options.max_conflicts
                    ));
                }
            }
            Err(e) => report.errors.push(format!("cannot list items: {e}")),
        }
        report
    }

    /// Classify the first `max_items` candidates without fetching content.
    pub async fn preview(&self, max_items: usize) -> Result<SyncPreview, SyncError> {
        let query = ListQuery {
            page_size: max_items.clamp(1, self.options.page_size.max(1)),
            ..ListQuery::default()
        };
        let page = self.list_page(&query).await?;
        let items: Vec<PreviewItem> = page
            .items
            .iter()
            .take(max_items)
            .map(|i| PreviewItem {
                id: i.id.clone(),
                title: i.title.clone(),
                last_edited_time: i.last_edited_time,
                filename: self.converter.filename_for(i),
                change: self.cache.classify(i),
            })
            .collect();

        let names: Vec<String> = items.iter().map(|i| i.filename.clone()).collect();
        let existing: HashSet<String> = self
            .writer
            .list_documents()
            .iter()
            .map(|n| conflict::conflict_key(n))
            .collect();
        let potential_conflicts = conflict::check_conflicts(&names, &existing);
        let batch = potential_conflicts
            .iter()
            .filter(|c| c.kind == ConflictKind::Batch)
            .count();
        let mut warnings = Vec::new();
        if batch > 0 {
            warnings.push(format!("{batch} filename conflict(s) expected"));
        }
        Ok(SyncPreview {
            items,
            has_more: page.has_more,
            potential_conflicts,
            warnings,
        })
    }

    // -- runs -------------------------------------------------------------

    pub async fn sync_all(&mut self, force: bool) -> SyncResult {
        self.run(SyncScope::All, force).await
    }

    pub async fn sync_filtered(&mut self, filter: serde_json::Value, force: bool) -> SyncResult {
        self.run(SyncScope::Filter(filter), force).await
    }

    pub async fn sync_modified_since(&mut self, since: DateTime<Utc>, force: bool) -> SyncResult {
        self.run(SyncScope::ModifiedSince(since), force).await
    }

    /// Explicitly requested items are always re-synced.
    pub async fn sync_item(&mut self, id: ItemId) -> SyncResult {
        self.run(SyncScope::Items(vec![id]), true).await
    }

    pub async fn sync_items(&mut self, ids: Vec<ItemId>) -> SyncResult {
        self.run(SyncScope::Items(ids), true).await
    }

    /// Retry what a previous run left behind. Replays the failed item ids it
    /// recorded; without any, re-syncs items changed since the start of that
    /// run's day.
    pub async fn recover_from_failed_sync(&mut self, prior: &SyncResult) -> SyncResult {
        let failed = prior.failed_item_ids();
        let mut result = if failed.is_empty() {
            let day_start = prior
                .start_time()
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|t| t.and_utc())
                .unwrap_or_else(|| prior.start_time());
            tracing::info!(since = %day_start, "no failed items recorded; re-syncing recent changes");
            self.execute(SyncScope::ModifiedSince(day_start), false).await
        } else {
            tracing::info!(count = failed.len(), "replaying failed items");
            self.execute(SyncScope::Items(failed), true).await
        };
        if !result.is_complete() && result.successful() == 0 {
            result.add_warning("no items were recovered");
        }
        self.finish(result)
    }

    /// One full pass over `scope`. Unchanged items are skipped unless
    /// `force` is set.
    pub async fn run(&mut self, scope: SyncScope, force: bool) -> SyncResult {
        let result = self.execute(scope, force).await;
        self.finish(result)
    }

    fn finish(&mut self, mut result: SyncResult) -> SyncResult {
        result.complete(SyncState::Completed);
        self.state = result.state();
        tracing::info!(
            state = %result.state(),
            total = result.total(),
            successful = result.successful(),
            failed = result.failed(),
            skipped = result.skipped(),
            errors = result.error_count(),
            "sync finished"
        );
        result
    }

    fn transition(&mut self, result: &mut SyncResult, state: SyncState) {
        self.state = state;
        result.set_state(state);
    }

    fn fail(&mut self, result: &mut SyncResult) {
        result.complete(SyncState::Failed);
        self.state = SyncState::Failed;
    }

    /// Everything up to and including `Reporting`; the caller completes
    /// the result. Returns an already completed result on `Failed`.
    async fn execute(&mut self, scope: SyncScope, force: bool) -> SyncResult {
        let mut result = SyncResult::new();
        tracing::info!(scope = %scope.describe(), force, "sync started");
        self.converter.begin_run();
        if let Some(warning) = self.cache.load_warning() {
            result.add_warning(warning.to_string());
        }

        // Validating
        self.transition(&mut result, SyncState::Validating);
        let validation = self.validate().await;
        for w in &validation.warnings {
            result.add_warning(w.clone());
        }
        if !validation.is_valid() {
            for e in validation.errors {
                result.add_error(e);
            }
            self.fail(&mut result);
            return result;
        }

        // Fetching
        self.transition(&mut result, SyncState::Fetching);
        let (queue, titles) = match self.candidates(&scope, force, &mut result).await {
            Ok(found) => found,
            Err(e) => {
                result.add_error(format!("listing failed: {e}"));
                self.fail(&mut result);
                return result;
            }
        };

        let queued: HashSet<&str> = queue.iter().map(|id| id.0.as_str()).collect();
        let reserved: Vec<String> = self
            .cache
            .entries()
            .filter(|e| !queued.contains(e.item_id.0.as_str()))
            .filter_map(|e| e.file_name())
            .collect();
        self.writer.begin_run(reserved);

        // Converting / Writing, one batch at a time.
        let total = queue.len();
        let mut updates: Vec<CacheUpdate> = Vec::new();
        let mut written_files: Vec<String> = Vec::new();
        let mut processed = 0usize;
        let mut last_flushed = 0usize;
        for batch in queue.chunks(self.options.batch_size.max(1)) {
            if self.cancel.is_cancelled() {
                self.interrupt(&mut result, processed, total - processed, last_flushed, &written_files);
                break;
            }
            let before = written_files.len();
            self.transition(&mut result, SyncState::Converting);
            let converted = self.convert_batch(batch.to_vec(), processed, total, &titles, &mut result).await;

            self.transition(&mut result, SyncState::Writing);
            self.write_converted(converted, &mut result, &mut updates, &mut written_files)
                .await;
            processed += batch.len();
            last_flushed = written_files.len() - before;
        }
        if self.cancel.is_cancelled() && result.interruption().is_none() && processed < total {
            self.interrupt(&mut result, processed, total - processed, last_flushed, &written_files);
        }

        // Reporting
        self.transition(&mut result, SyncState::Reporting);
        for u in &updates {
            self.cache.update(
                &u.item.id,
                &u.item.title,
                &u.item.revision,
                &u.content,
                &u.path,
                Some(&u.item.properties_json()),
                u.block_count,
            );
        }
        if !updates.is_empty() {
            if let Err(e) = self.cache.save() {
                tracing::warn!(error = %e, "could not save change cache");
                result.add_warning(format!("change cache not saved: {e}"));
            }
        }
        if let Some(links) = self.converter.link_report() {
            if links.broken > 0 {
                tracing::warn!(broken = links.broken, total = links.total, "broken links found");
                result.add_warning(format!(
                    "{} link(s) point at pages outside the vault",
                    links.broken
                ));
            }
            result.set_links(links);
        }
        result
    }

    /// Tell the converter which pages will exist in the vault. Cached
    /// entries come first so listed items override them with their
    /// current filenames.
    fn register_link_targets(&self, listed: &[ItemSummary]) {
        for entry in self.cache.entries() {
            if let Some(file) = entry.file_name() {
                self.converter.register_page(&entry.item_id, &entry.title, &file);
            }
        }
        for item in listed {
            self.converter
                .register_page(&item.id, &item.title, &self.converter.filename_for(item));
        }
    }

    /// Items to process in priority order, plus known titles for reporting.
    async fn candidates(
        &self,
        scope: &SyncScope,
        force: bool,
        result: &mut SyncResult,
    ) -> Result<(Vec<ItemId>, HashMap<ItemId, String>), UpstreamError> {
        if let SyncScope::Items(ids) = scope {
            let mut seen = HashSet::new();
            let ids: Vec<ItemId> = ids.iter().filter(|id| seen.insert(*id)).cloned().collect();
            result.set_total(ids.len());
            self.register_link_targets(&[]);
            let titles = ids
                .iter()
                .filter_map(|id| self.cache.get(id).map(|e| (id.clone(), e.title.clone())))
                .collect();
            return Ok((ids, titles));
        }

        let mut listed = self.list_all(scope.query_filter()).await?;
        self.register_link_targets(&listed);
        if let SyncScope::ModifiedSince(since) = scope {
            listed.retain(|i| i.last_edited_time >= *since);
        }
        result.set_total(listed.len());
        let titles = listed.iter().map(|i| (i.id.clone(), i.title.clone())).collect();

        let queue = if force {
            listed
        } else {
            let changes = self.cache.detect_changes(&listed);
            for item in &changes.unchanged {
                result.record_skipped(item.id.clone(), &item.title, "unchanged");
            }
            tracing::info!(
                new = changes.new.len(),
                modified = changes.modified.len(),
                unchanged = changes.unchanged.len(),
                "change detection finished"
            );
            let mut pending = changes.new;
            pending.extend(changes.modified);
            self.cache.prioritize(&pending)
        };
        Ok((queue.into_iter().map(|i| i.id).collect(), titles))
    }

    async fn convert_batch(
        &self,
        batch: Vec<ItemId>,
        offset: usize,
        total: usize,
        titles: &HashMap<ItemId, String>,
        result: &mut SyncResult,
    ) -> Vec<Converted> {
        let order: HashMap<ItemId, usize> =
            batch.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();
        let fetcher = self.fetcher.as_ref();
        let converter = self.converter.as_ref();
        let retry = self.options.retry;
        let processor = move |id: ItemId| async move {
            let tree = retry_with_backoff(&retry, "get_item_content", || fetcher.get_item_content(&id))
                .await
                .map_err(|e| e.to_string())?;
            let output = converter.convert(&tree).map_err(|e| e.to_string())?;
            Ok::<_, String>(Converted {
                block_count: tree.block_count(),
                item: tree.item,
                document: output.document,
                warnings: output.warnings,
                unsupported: output.unsupported,
            })
        };

        let progress = self.progress.clone();
        let report: &ProgressFn<'_> = &move |done: usize, _batch_total: usize| {
            if let Some(cb) = &progress {
                cb(offset + done, total);
            }
        };
        let results = self.executor.run(batch, processor, Some(report)).await;

        let mut converted = Vec::with_capacity(results.len());
        for r in results {
            let title = titles.get(&r.item_id).map(String::as_str).unwrap_or(&r.item_id.0);
            match r.outcome {
                Ok(c) => {
                    for w in &c.warnings {
                        result.add_warning(format!("{}: {w}", c.item.title));
                    }
                    result.record_unsupported(c.unsupported.iter().cloned());
                    converted.push(c);
                }
                Err(e) => result.record_failed(r.item_id.clone(), title, &e),
            }
        }
        // Higher-priority items claim the base filename first.
        converted.sort_by_key(|c| order.get(&c.item.id).copied().unwrap_or(usize::MAX));
        converted
    }

    async fn write_converted(
        &self,
        converted: Vec<Converted>,
        result: &mut SyncResult,
        updates: &mut Vec<CacheUpdate>,
        written_files: &mut Vec<String>,
    ) {
        if converted.is_empty() {
            return;
        }
        let mut by_id: HashMap<ItemId, Converted> = HashMap::with_capacity(converted.len());
        let mut pending = Vec::with_capacity(converted.len());
        for c in converted {
            pending.push(PendingWrite {
                item_id: c.item.id.clone(),
                document: c.document.clone(),
            });
            by_id.insert(c.item.id.clone(), c);
        }

        let report = self
            .writer
            .write_batch(pending, self.options.overwrite_existing, true)
            .await;
        if report.conflicts_resolved > 0 {
            result.add_warning(format!(
                "{} filename conflict(s) resolved by renaming",
                report.conflicts_resolved
            ));
        }
        if let Some(text) = report.conflict_report {
            result.record_conflict_report(text);
        }

        for w in report.writes {
            let Some(c) = by_id.remove(&w.item_id) else {
                continue;
            };
            match w.outcome {
                WriteOutcome::Written { path, .. } => {
                    result.record_written(w.item_id, &c.item.title, &w.filename);
                    written_files.push(w.filename.clone());
                    let mut document = c.document;
                    document.filename = w.filename;
                    updates.push(CacheUpdate {
                        content: document.to_markdown(),
                        item: c.item,
                        path,
                        block_count: c.block_count,
                    });
                }
                WriteOutcome::Skipped { reason, .. } => {
                    result.record_skipped(w.item_id, &c.item.title, &reason);
                }
                WriteOutcome::Failed { error, .. } => {
                    result.record_failed(w.item_id, &c.item.title, &error);
                }
            }
        }
    }

    fn interrupt(
        &self,
        result: &mut SyncResult,
        processed: usize,
        remaining: usize,
        flushed: usize,
        written_files: &[String],
    ) {
        tracing::warn!(processed, remaining, "sync interrupted");
        let corrupted_files: Vec<String> = written_files
            .iter()
            .filter(|name| self.writer.verify(name).is_corrupted())
            .cloned()
            .collect();
        if !corrupted_files.is_empty() {
            tracing::warn!(count = corrupted_files.len(), "corrupted files after interruption");
        }
        result.add_warning(format!("sync interrupted; {remaining} item(s) not processed"));
        result.set_interruption(InterruptionReport {
            interrupted_at: Utc::now(),
            processed,
            remaining,
            flushed,
            corrupted_files,
        });
    }

    // -- maintenance ------------------------------------------------------

    /// Source and destination totals.
    pub async fn statistics(&self) -> Result<SyncStatistics, SyncError> {
        let source_items = self.list_all(None).await?.len();
        let integrity = self.writer.verify_all();
        let local_documents = integrity.len();
        let valid_documents = integrity.iter().filter(|r| r.is_valid()).count();
        let coverage_percent = if source_items == 0 {
            0.0
        } else {
            local_documents as f64 / source_items as f64 * 100.0
        };
        Ok(SyncStatistics {
            source_items,
            local_documents,
            disk_usage: self.writer.disk_usage(),
            valid_documents,
            invalid_documents: local_documents - valid_documents,
            coverage_percent,
            missing_documents: source_items.saturating_sub(local_documents),
            extra_documents: local_documents.saturating_sub(source_items),
            cache: self.cache.stats(),
        })
    }

    /// Back up and delete unreadable documents, flag oversized ones, and
    /// prune old backups.
    pub async fn cleanup_failed_files(&self) -> CleanupReport {
        let integrity = self.writer.verify_all();
        let mut report = CleanupReport {
            checked: integrity.len(),
            integrity: integrity::integrity_report(&integrity),
            ..CleanupReport::default()
        };
        for r in integrity {
            if !r.exists {
                continue;
            }
            if r.is_corrupted() {
                report.corrupted.push(r.filename.clone());
                match self.writer.backup(&r.filename, CORRUPTED_SUFFIX) {
                    Ok(Some(_)) => report.backups.push(format!("{}{CORRUPTED_SUFFIX}", r.filename)),
                    Ok(None) => {}
                    Err(e) => {
                        report.errors.push(format!("backup of {} failed: {e}", r.filename));
                        continue;
                    }
                }
                match self.writer.delete(&r.filename).await {
                    Ok(true) => {
                        tracing::info!(file = %r.filename, "removed corrupted document");
                        report.deleted.push(r.filename);
                    }
                    Ok(false) => {}
                    Err(e) => report.errors.push(format!("delete of {} failed: {e}", r.filename)),
                }
            } else if r
                .warnings
                .iter()
                .any(|w| w.starts_with("file is large") || w.contains("is very long"))
            {
                tracing::warn!(file = %r.filename, "document exceeds size policy");
                report.oversized.push(r.filename);
            }
        }
        match self.writer.cleanup_old_backups(self.options.backup_retention) {
            Ok(removed) => report.pruned_backups = removed.len(),
            Err(e) => report.errors.push(format!("backup pruning failed: {e}")),
        }
        tracing::info!(
            checked = report.checked,
            deleted = report.deleted.len(),
            "cleanup finished"
        );
        report
    }

    /// Drop cache entries older than `max_age` (the configured age when
    /// `None`) and save. Returns the number removed.
    pub fn prune_cache(&mut self, max_age: Option<ChronoDuration>) -> Result<usize, SyncError> {
        let removed = self.cache.cleanup(max_age.unwrap_or(self.options.cache_max_age));
        if removed > 0 {
            self.cache.save()?;
        }
        Ok(removed)
    }

    // -- listing ----------------------------------------------------------

    async fn list_page(&self, query: &ListQuery) -> Result<crate::source::ItemPage, UpstreamError> {
        let fetcher = self.fetcher.as_ref();
        retry_with_backoff(&self.options.retry, "list_items", || fetcher.list_items(query)).await
    }

    /// Follow cursors until the source reports no more pages.
    async fn list_all(&self, filter: Option<serde_json::Value>) -> Result<Vec<ItemSummary>, UpstreamError> {
        let mut query = ListQuery {
            filter,
            page_size: self.options.page_size.max(1),
            ..ListQuery::default()
        };
        let mut items = Vec::new();
        loop {
            let page = self.list_page(&query).await?;
            items.extend(page.items);
            match page.next_cursor {
                Some(cursor) if page.has_more => query.cursor = Some(cursor),
                _ => break,
            }
        }
        let listed = items.len();
        let items = dedupe_by_id(items);
        if items.len() < listed {
            tracing::warn!(duplicates = listed - items.len(), "listing repeated items");
        }
        tracing::debug!(count = items.len(), "listed candidates");
        Ok(items)
    }
}

/// One entry per id, at its first position, holding the most recently
/// edited copy. Cursor pagination can repeat items edited mid-listing.
fn dedupe_by_id(items: Vec<ItemSummary>) -> Vec<ItemSummary> {
    let mut index: HashMap<ItemId, usize> = HashMap::with_capacity(items.len());
    let mut unique: Vec<ItemSummary> = Vec::with_capacity(items.len());
    for item in items {
        match index.get(&item.id) {
            Some(&i) => {
                if item.last_edited_time > unique[i].last_edited_time {
                    unique[i] = item;
                }
            }
            None => {
                index.insert(item.id.clone(), unique.len());
                unique.push(item);
            }
        }
    }
    unique
}


fn validation_messages(e: SyncError) -> Vec<String> {
    match e {
        SyncError::Validation { errors } => errors,
        other => vec![other.to_string()],
    }
}
