//! Run outcome: state machine position, counters, per-item results.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vaultsync_core::ItemId;
use vaultsync_render::LinkReport;

/// Orchestrator state. Runs move forward through the list and end in
/// `Completed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Validating,
    Fetching,
    Converting,
    Writing,
    Reporting,
    Completed,
    Failed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Fetching => "fetching",
            Self::Converting => "converting",
            Self::Writing => "writing",
            Self::Reporting => "reporting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Written,
    Skipped,
    Failed,
}

/// What happened to one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub item_id: ItemId,
    pub title: String,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Error for failures, reason for skips.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Filled in when a run is cancelled between batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptionReport {
    pub interrupted_at: DateTime<Utc>,
    /// Items written or failed before the stop.
    pub processed: usize,
    /// Items never started.
    pub remaining: usize,
    /// Documents written while flushing the in-flight batch.
    pub flushed: usize,
    /// Documents from this run that failed the integrity pass.
    pub corrupted_files: Vec<String>,
}

impl InterruptionReport {
    pub fn can_resume(&self) -> bool {
        self.remaining > 0
    }
}

/// Accumulated outcome of one run.
///
/// The orchestrator is the only writer. After [`complete`](Self::complete)
/// every mutator is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    state: SyncState,
    total: usize,
    successful: usize,
    failed: usize,
    skipped: usize,
    errors: Vec<String>,
    warnings: Vec<String>,
    items: Vec<ItemOutcome>,
    /// Unsupported content kind → occurrences.
    unsupported: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    interruption: Option<InterruptionReport>,
    /// Markdown conflict summaries, one per batch that had conflicts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    conflict_reports: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    links: Option<LinkReport>,
}

impl Default for SyncResult {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncResult {
    pub fn new() -> Self {
        Self {
            start_time: Utc::now(),
            end_time: None,
            state: SyncState::Idle,
            total: 0,
            successful: 0,
            failed: 0,
            skipped: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            items: Vec::new(),
            unsupported: BTreeMap::new(),
            interruption: None,
            conflict_reports: Vec::new(),
            links: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.end_time.is_some()
    }

    // -- mutators ---------------------------------------------------------

    pub fn set_state(&mut self, state: SyncState) {
        if self.is_complete() {
            return;
        }
        tracing::debug!(from = %self.state, to = %state, "sync state");
        self.state = state;
    }

    /// Raise the candidate count; it never decreases.
    pub fn set_total(&mut self, total: usize) {
        if !self.is_complete() {
            self.total = self.total.max(total);
        }
    }

    pub fn record_written(&mut self, item_id: ItemId, title: &str, filename: &str) {
        if self.is_complete() {
            return;
        }
        self.successful += 1;
        self.items.push(ItemOutcome {
            item_id,
            title: title.to_string(),
            status: ItemStatus::Written,
            filename: Some(filename.to_string()),
            detail: None,
        });
    }

    pub fn record_skipped(&mut self, item_id: ItemId, title: &str, reason: &str) {
        if self.is_complete() {
            return;
        }
        self.skipped += 1;
        self.items.push(ItemOutcome {
            item_id,
            title: title.to_string(),
            status: ItemStatus::Skipped,
            filename: None,
            detail: Some(reason.to_string()),
        });
    }

    /// Count a failure and add it to the error list.
    pub fn record_failed(&mut self, item_id: ItemId, title: &str, error: &str) {
        if self.is_complete() {
            return;
        }
        self.failed += 1;
        self.errors.push(format!("{title} ({item_id}): {error}"));
        self.items.push(ItemOutcome {
            item_id,
            title: title.to_string(),
            status: ItemStatus::Failed,
            filename: None,
            detail: Some(error.to_string()),
        });
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        if !self.is_complete() {
            self.errors.push(error.into());
        }
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        if !self.is_complete() {
            self.warnings.push(warning.into());
        }
    }

    pub fn record_unsupported<I, S>(&mut self, kinds: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.is_complete() {
            return;
        }
        for kind in kinds {
            *self.unsupported.entry(kind.into()).or_default() += 1;
        }
    }

    pub fn record_conflict_report(&mut self, report: impl Into<String>) {
        if !self.is_complete() {
            self.conflict_reports.push(report.into());
        }
    }

    pub fn set_links(&mut self, report: LinkReport) {
        if !self.is_complete() {
            self.links = Some(report);
        }
    }

    pub fn set_interruption(&mut self, report: InterruptionReport) {
        if !self.is_complete() {
            self.interruption = Some(report);
        }
    }

    /// Freeze the result in `state` (normally `Completed` or `Failed`).
    pub fn complete(&mut self, state: SyncState) {
        if self.is_complete() {
            return;
        }
        self.state = state;
        self.end_time = Some(Utc::now());
    }

    // -- queries ----------------------------------------------------------

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn successful(&self) -> usize {
        self.successful
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn items(&self) -> &[ItemOutcome] {
        &self.items
    }

    pub fn unsupported(&self) -> &BTreeMap<String, usize> {
        &self.unsupported
    }

    pub fn conflict_reports(&self) -> &[String] {
        &self.conflict_reports
    }

    pub fn links(&self) -> Option<&LinkReport> {
        self.links.as_ref()
    }

    pub fn interruption(&self) -> Option<&InterruptionReport> {
        self.interruption.as_ref()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    /// Zero until [`complete`](Self::complete) is called.
    pub fn duration(&self) -> Duration {
        self.end_time
            .and_then(|end| (end - self.start_time).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    /// `successful / total`, 0.0 when there were no candidates.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 / self.total as f64
        }
    }

    /// Ids of items that failed, in the order they were recorded.
    pub fn failed_item_ids(&self) -> Vec<ItemId> {
        self.items
            .iter()
            .filter(|i| i.status == ItemStatus::Failed)
            .map(|i| i.item_id.clone())
            .collect()
    }

    /// Process exit status for this run: non-zero whenever errors were
    /// recorded.
    pub fn exit_code(&self) -> u8 {
        u8::from(!self.errors.is_empty())
    }
}
