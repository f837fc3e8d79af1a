//! `vaultsync cleanup`: remove unreadable documents and prune backups.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use super::Session;
use crate::GlobalArgs;

/// Arguments for `vaultsync cleanup`.
#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Do not ask for confirmation.
    #[arg(long)]
    pub force: bool,

    /// Print the integrity report taken before cleanup.
    #[arg(long)]
    pub report: bool,
}

impl CleanupArgs {
    pub async fn run(self, global: &GlobalArgs) -> Result<ExitCode> {
        let session = Session::load(global)?;
        let mut orchestrator = session.orchestrator()?;
        let destination = orchestrator.options().destination.clone();

        if !self.force && !confirm(&format!(
            "Delete unreadable documents under {} (a .corrupted backup is kept)?",
            destination.display()
        ))? {
            println!("Cleanup cancelled.");
            return Ok(ExitCode::SUCCESS);
        }

        let report = orchestrator.cleanup_failed_files().await;
        if self.report {
            println!("{}", report.integrity);
        }
        let pruned = orchestrator
            .prune_cache(None)
            .context("failed to prune the change cache")?;

        println!(
            "{} checked {} document(s): {} removed, {} oversized",
            "✓".green(),
            report.checked,
            report.deleted.len(),
            report.oversized.len()
        );
        for name in &report.deleted {
            println!("  ✗  {name} (backup: {name}.corrupted)");
        }
        for name in &report.oversized {
            println!("  {}  {name} exceeds the size policy", "!".yellow());
        }
        if report.pruned_backups > 0 {
            println!("  removed {} old backup(s)", report.pruned_backups);
        }
        if pruned > 0 {
            println!("  dropped {pruned} expired cache entries");
        }
        for e in &report.errors {
            println!("  {} {e}", "✗".red());
        }

        Ok(if report.errors.is_empty() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        })
    }
}

fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush().context("failed to flush stdout")?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
