//! `vaultsync preview`: classify upcoming items without fetching content.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use vaultsync_sync::change_cache::ChangeKind;
use vaultsync_sync::conflict::{conflict_report, ConflictKind};
use vaultsync_sync::report::format_datetime_age;
use vaultsync_sync::SyncPreview;

use super::Session;
use crate::GlobalArgs;

/// Arguments for `vaultsync preview`.
#[derive(Args, Debug)]
pub struct PreviewArgs {
    /// How many items to preview.
    #[arg(long, default_value_t = 10, value_name = "N")]
    pub max_items: usize,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl PreviewArgs {
    pub async fn run(self, global: &GlobalArgs) -> Result<ExitCode> {
        let session = Session::load(global)?;
        let preview = session
            .orchestrator()?
            .preview(self.max_items.max(1))
            .await
            .context("preview failed")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&preview).context("failed to serialize preview JSON")?
            );
        } else {
            print_preview(&preview, false);
        }
        Ok(ExitCode::SUCCESS)
    }
}

#[derive(Tabled)]
struct PreviewRow {
    #[tabled(rename = "title")]
    title: String,
    #[tabled(rename = "file")]
    file: String,
    #[tabled(rename = "change")]
    change: String,
    #[tabled(rename = "edited")]
    edited: String,
}

pub fn print_preview(preview: &SyncPreview, dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    if preview.items.is_empty() {
        println!("{prefix}No items found.");
        return;
    }

    let pending = preview
        .items
        .iter()
        .filter(|i| i.change != ChangeKind::Unchanged)
        .count();
    println!(
        "{prefix}{} item(s) previewed, {pending} would be written{}",
        preview.items.len(),
        if preview.has_more { " (more not shown)" } else { "" }
    );

    let rows: Vec<PreviewRow> = preview
        .items
        .iter()
        .map(|i| PreviewRow {
            title: i.title.clone(),
            file: i.filename.clone(),
            change: change_label(i.change),
            edited: format!("{} ago", format_datetime_age(i.last_edited_time)),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    let batch: Vec<_> = preview
        .potential_conflicts
        .iter()
        .filter(|c| c.kind == ConflictKind::Batch)
        .cloned()
        .collect();
    if !batch.is_empty() {
        println!("{}", conflict_report(&batch).trim_end());
        println!("Conflicting names get a numeric suffix (_1, _2, ...) when written.");
    }
    for w in &preview.warnings {
        println!("{} {w}", "!".yellow());
    }
}

fn change_label(change: ChangeKind) -> String {
    match change {
        ChangeKind::New => "new".green().to_string(),
        ChangeKind::Modified => "modified".yellow().to_string(),
        ChangeKind::Unchanged => "unchanged".bright_black().to_string(),
    }
}
