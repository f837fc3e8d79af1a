//! `vaultsync status`: database versus vault, cache and last run.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use vaultsync_sync::report::{format_datetime_age, load_last_run_at};
use vaultsync_sync::{SyncResult, SyncStatistics};

use super::Session;
use crate::GlobalArgs;

/// Arguments for `vaultsync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Include disk usage and cache details.
    #[arg(long)]
    pub detailed: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub async fn run(self, global: &GlobalArgs) -> Result<ExitCode> {
        let session = Session::load(global)?;
        let stats = session
            .orchestrator()?
            .statistics()
            .await
            .context("failed to collect statistics")?;
        let last_run = match load_last_run_at(&session.home) {
            Ok(run) => run,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable last run");
                None
            }
        };

        if self.json {
            let payload = StatusJson {
                statistics: &stats,
                last_run: last_run.as_ref().map(LastRunJson::from),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
            );
        } else {
            print_table(&stats, last_run.as_ref(), self.detailed);
        }
        Ok(ExitCode::SUCCESS)
    }
}

#[derive(Serialize)]
struct StatusJson<'a> {
    statistics: &'a SyncStatistics,
    last_run: Option<LastRunJson>,
}

#[derive(Serialize)]
struct LastRunJson {
    state: String,
    finished_at: Option<String>,
    total: usize,
    successful: usize,
    failed: usize,
    skipped: usize,
    errors: usize,
}

impl From<&SyncResult> for LastRunJson {
    fn from(r: &SyncResult) -> Self {
        Self {
            state: r.state().to_string(),
            finished_at: r.end_time().map(|t| t.to_rfc3339()),
            total: r.total(),
            successful: r.successful(),
            failed: r.failed(),
            skipped: r.skipped(),
            errors: r.error_count(),
        }
    }
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "metric")]
    metric: &'static str,
    #[tabled(rename = "value")]
    value: String,
}

fn row(metric: &'static str, value: impl ToString) -> StatusRow {
    StatusRow {
        metric,
        value: value.to_string(),
    }
}

fn print_table(stats: &SyncStatistics, last_run: Option<&SyncResult>, detailed: bool) {
    println!(
        "vaultsync v{} | {} items in Notion | {} documents in vault | {:.1}% coverage",
        env!("CARGO_PKG_VERSION"),
        stats.source_items,
        stats.local_documents,
        stats.coverage_percent,
    );

    let mut rows = vec![
        row("missing documents", stats.missing_documents),
        row("extra documents", stats.extra_documents),
        row("valid documents", stats.valid_documents),
        row("invalid documents", stats.invalid_documents),
        row("cached items", stats.cache.total_entries),
    ];
    if detailed {
        rows.push(row("disk usage", format!("{:.2} MB", stats.disk_usage.total_mb())));
        rows.push(row("average size", format!("{} bytes", stats.disk_usage.average_bytes())));
        rows.push(row("cache file", stats.cache.path.display()));
        rows.push(row("cache size", format!("{} bytes", stats.cache.size_bytes)));
        if let Some(oldest) = stats.cache.oldest {
            rows.push(row("oldest cache entry", format!("{} ago", format_datetime_age(oldest))));
        }
    }
    match last_run {
        Some(run) => {
            let age = run
                .end_time()
                .map(|t| format!("{} ago", format_datetime_age(t)))
                .unwrap_or_else(|| "unfinished".to_string());
            rows.push(row("last sync", age));
            rows.push(row(
                "last result",
                format!(
                    "{} ({} written, {} failed, {} skipped)",
                    run.state(),
                    run.successful(),
                    run.failed(),
                    run.skipped()
                ),
            ));
        }
        None => rows.push(row("last sync", "never")),
    }

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if stats.invalid_documents > 0 {
        println!(
            "{} {} invalid document(s); run 'vaultsync cleanup'",
            "!".yellow(),
            stats.invalid_documents
        );
    }
    if stats.missing_documents > 0 {
        println!("Run 'vaultsync sync' to fetch missing items.");
    }
}
