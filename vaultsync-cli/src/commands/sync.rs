//! `vaultsync sync`: fetch changed items and write them into the vault.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use vaultsync_core::config::base_dir_at;
use vaultsync_core::ItemId;
use vaultsync_sync::report::{load_last_run_at, save_last_run_at, write_report_at};
use vaultsync_sync::result::ItemStatus;
use vaultsync_sync::{SyncResult, SyncState};

use super::preview::print_preview;
use super::Session;
use crate::GlobalArgs;

/// Exit status after a Ctrl-C interruption.
const INTERRUPTED_EXIT: u8 = 130;

/// Arguments for `vaultsync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Sync only this item id; repeatable. Always re-syncs.
    #[arg(long = "item", value_name = "ID", conflicts_with_all = ["since", "filter", "recover"])]
    pub items: Vec<String>,

    /// Only items edited on or after this date (YYYY-MM-DD or RFC 3339).
    #[arg(long, value_name = "DATE")]
    pub since: Option<String>,

    /// Database query filter as JSON, passed through to the API.
    #[arg(long, value_name = "JSON", conflicts_with = "since")]
    pub filter: Option<String>,

    /// Re-sync items even when the cache says they are unchanged.
    #[arg(long)]
    pub force: bool,

    /// Retry the items that failed in the previous run.
    #[arg(long, conflicts_with_all = ["since", "filter", "force"])]
    pub recover: bool,

    /// Show what would be synced without writing any files.
    #[arg(long)]
    pub dry_run: bool,

    /// Do not print a progress counter.
    #[arg(long)]
    pub no_progress: bool,

    /// Where to write the Markdown run report (default: ~/.vaultsync/reports).
    #[arg(long, value_name = "DIR")]
    pub report_dir: Option<PathBuf>,
}

impl SyncArgs {
    pub async fn run(self, global: &GlobalArgs) -> Result<ExitCode> {
        let session = Session::load(global)?;
        let orchestrator = session.orchestrator()?;

        if self.dry_run {
            let preview = orchestrator
                .preview(session.config.source.page_size)
                .await
                .context("preview failed")?;
            print_preview(&preview, true);
            return Ok(ExitCode::SUCCESS);
        }

        let cancel = CancellationToken::new();
        spawn_interrupt_handler(cancel.clone());
        let mut orchestrator = orchestrator.with_cancellation(cancel);
        if !self.no_progress {
            orchestrator = orchestrator.with_progress(Arc::new(|done: usize, total: usize| {
                eprint!("\r  {done}/{total} items");
                let _ = std::io::stderr().flush();
                if done == total {
                    eprintln!();
                }
            }));
        }

        let result = if self.recover {
            let prior = load_last_run_at(&session.home)
                .context("failed to read the previous run")?
                .context("no previous run recorded; run `vaultsync sync` first")?;
            orchestrator.recover_from_failed_sync(&prior).await
        } else if !self.items.is_empty() {
            let ids = self.items.iter().map(|id| ItemId::from(id.as_str())).collect();
            orchestrator.sync_items(ids).await
        } else if let Some(raw) = &self.since {
            orchestrator.sync_modified_since(parse_since(raw)?, self.force).await
        } else if let Some(raw) = &self.filter {
            let filter = serde_json::from_str(raw).context("--filter is not valid JSON")?;
            orchestrator.sync_filtered(filter, self.force).await
        } else {
            orchestrator.sync_all(self.force).await
        };

        if let Err(e) = save_last_run_at(&session.home, &result) {
            tracing::warn!(error = %e, "could not save the run result");
        }
        let report_dir = self
            .report_dir
            .unwrap_or_else(|| base_dir_at(&session.home).join("reports"));
        match write_report_at(&report_dir, &result) {
            Ok(path) => tracing::info!(path = %path.display(), "report written"),
            Err(e) => tracing::warn!(error = %e, "could not write the run report"),
        }

        print_result(&result);
        if result.interruption().is_some() {
            return Ok(ExitCode::from(INTERRUPTED_EXIT));
        }
        Ok(ExitCode::from(result.exit_code()))
    }
}

/// First Ctrl-C cancels between batches; the in-flight batch still lands.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupt received; finishing the current batch");
            cancel.cancel();
        }
    });
}

/// `YYYY-MM-DD` (midnight UTC) or a full RFC 3339 timestamp.
fn parse_since(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        if let Some(start) = date.and_hms_opt(0, 0, 0) {
            return Ok(start.and_utc());
        }
    }
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(ts) => Ok(ts.with_timezone(&Utc)),
        Err(_) => bail!("--since expects YYYY-MM-DD or an RFC 3339 timestamp, got '{raw}'"),
    }
}

fn print_result(result: &SyncResult) {
    let headline = format!(
        "{} written, {} skipped, {} failed of {} in {:.1}s",
        result.successful(),
        result.skipped(),
        result.failed(),
        result.total(),
        result.duration().as_secs_f64()
    );
    if result.error_count() == 0 {
        println!("{} sync {}: {headline}", "✓".green(), result.state());
    } else {
        println!("{} sync {}: {headline}", "✗".red(), result.state());
    }

    for item in result.items() {
        match item.status {
            ItemStatus::Written => println!(
                "  ✎  {}",
                item.filename.as_deref().unwrap_or(&item.title)
            ),
            ItemStatus::Failed => println!(
                "  {}  {}: {}",
                "✗".red(),
                item.title,
                item.detail.as_deref().unwrap_or("failed")
            ),
            ItemStatus::Skipped => {}
        }
    }

    if let Some(i) = result.interruption() {
        println!(
            "{} interrupted: {} processed, {} remaining",
            "!".yellow(),
            i.processed,
            i.remaining
        );
        for f in &i.corrupted_files {
            println!("  {} {f} failed verification", "!".yellow());
        }
    }
    if let Some(links) = result.links().filter(|l| l.broken > 0) {
        println!(
            "{} {} of {} link(s) point outside the vault",
            "!".yellow(),
            links.broken,
            links.total
        );
    }
    if result.state() == SyncState::Failed {
        for e in result.errors() {
            println!("  {} {e}", "✗".red());
        }
    }
    if result.warning_count() > 0 {
        println!("{} warning(s); see the run report", result.warning_count());
    }
    if result.failed() > 0 {
        println!("Run 'vaultsync sync --recover' to retry failed items.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn since_accepts_dates_and_timestamps() {
        assert_eq!(
            parse_since("2024-05-01").unwrap().to_rfc3339(),
            "2024-05-01T00:00:00+00:00"
        );
        assert_eq!(
            parse_since("2024-05-01T10:30:00+02:00").unwrap().to_rfc3339(),
            "2024-05-01T08:30:00+00:00"
        );
        assert!(parse_since("last week").is_err());
    }
}
