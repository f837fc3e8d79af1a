//! Run reports and last-run persistence.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{io_err, SyncError};
use crate::result::SyncResult;

/// Markdown report for a finished run.
pub fn render_sync_report(result: &SyncResult) -> String {
    let mut out = String::from("# Sync report\n\n## Summary\n");
    out.push_str(&format!("- state: {}\n", result.state()));
    out.push_str(&format!("- started: {}\n", result.start_time().to_rfc3339()));
    match result.end_time() {
        Some(end) => out.push_str(&format!("- finished: {}\n", end.to_rfc3339())),
        None => out.push_str("- finished: -\n"),
    }
    out.push_str(&format!("- duration: {:.2}s\n", result.duration().as_secs_f64()));
    out.push_str(&format!("- items: {}\n", result.total()));
    out.push_str(&format!("- written: {}\n", result.successful()));
    out.push_str(&format!("- failed: {}\n", result.failed()));
    out.push_str(&format!("- skipped: {}\n", result.skipped()));
    out.push_str(&format!("- success rate: {:.1}%\n", result.success_rate() * 100.0));

    if let Some(i) = result.interruption() {
        out.push_str("\n## Interruption\n");
        out.push_str(&format!("- at: {}\n", i.interrupted_at.to_rfc3339()));
        out.push_str(&format!("- processed: {}\n", i.processed));
        out.push_str(&format!("- remaining: {}\n", i.remaining));
        out.push_str(&format!("- flushed: {}\n", i.flushed));
        for f in &i.corrupted_files {
            out.push_str(&format!("- corrupted: {f}\n"));
        }
    }

    if !result.errors().is_empty() {
        out.push_str("\n## Errors\n");
        for (n, e) in result.errors().iter().enumerate() {
            out.push_str(&format!("{}. {e}\n", n + 1));
        }
    }
    if !result.warnings().is_empty() {
        out.push_str("\n## Warnings\n");
        for (n, w) in result.warnings().iter().enumerate() {
            out.push_str(&format!("{}. {w}\n", n + 1));
        }
    }

    if !result.conflict_reports().is_empty() {
        out.push_str("\n## Filename conflicts\n");
        for report in result.conflict_reports() {
            for line in report.lines().filter(|l| !l.is_empty() && !l.starts_with("# ")) {
                match line.strip_prefix("## ") {
                    Some(heading) => out.push_str(&format!("### {heading}\n")),
                    None => {
                        out.push_str(line);
                        out.push('\n');
                    }
                }
            }
        }
    }

    if let Some(links) = result.links().filter(|l| l.total > 0) {
        out.push_str("\n## Links\n");
        out.push_str(&format!(
            "- resolved: {} ({} valid, {} broken)\n",
            links.total, links.valid, links.broken
        ));
        for (url, reason) in &links.broken_links {
            out.push_str(&format!("- broken: {url} ({reason})\n"));
        }
    }

    if !result.unsupported().is_empty() {
        out.push_str("\n## Unsupported content\n");
        let mut kinds: Vec<(&String, &usize)> = result.unsupported().iter().collect();
        kinds.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (kind, count) in kinds {
            out.push_str(&format!("- {kind}: {count}\n"));
        }
    }

    out.push_str("\n## Recommended actions\n");
    let actions = recommended_actions(result);
    for a in &actions {
        out.push_str(&format!("- {a}\n"));
    }
    out
}

fn recommended_actions(result: &SyncResult) -> Vec<&'static str> {
    let mut actions = Vec::new();
    if result.total() > 0 && result.success_rate() < 0.5 && result.failed() > 0 {
        actions.push("success rate is low; check the configuration and network connection");
    }
    if result.error_count() > 0 {
        actions.push("errors occurred; review them and run `vaultsync sync --recover`");
    }
    if result.warning_count() > 10 {
        actions.push("many warnings were raised; consider reviewing the sync settings");
    }
    if result.interruption().is_some() {
        actions.push("the run was interrupted; run the sync again to finish");
    }
    if result.links().is_some_and(|l| l.broken > 0) {
        actions.push("some links point at pages outside the vault; share or sync those pages");
    }
    if actions.is_empty() {
        actions.push("sync completed without problems");
    }
    actions
}

/// Write the report to `<dir>/sync_report_<YYYYmmdd_HHMMSS>.md`.
pub fn write_report_at(dir: &Path, result: &SyncResult) -> Result<PathBuf, SyncError> {
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    let stamp = result.end_time().unwrap_or_else(Utc::now).format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("sync_report_{stamp}.md"));
    std::fs::write(&path, render_sync_report(result)).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

/// `~/.vaultsync/runs/last_run.json`
pub fn last_run_path_at(home: &Path) -> PathBuf {
    home.join(".vaultsync").join("runs").join("last_run.json")
}

/// Persist `result` for a later `--recover`. Atomic `.tmp` + rename.
pub fn save_last_run_at(home: &Path, result: &SyncResult) -> Result<(), SyncError> {
    let path = last_run_path_at(home);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let json = serde_json::to_string_pretty(result)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    Ok(())
}

/// The last persisted run, `None` if there is none.
pub fn load_last_run_at(home: &Path) -> Result<Option<SyncResult>, SyncError> {
    let path = last_run_path_at(home);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(Some(serde_json::from_str(&raw)?))
}

/// Compact age such as `42s`, `5m`, `3h`, `2d`.
pub fn format_datetime_age(timestamp: DateTime<Utc>) -> String {
    let age = Utc::now().signed_duration_since(timestamp).num_seconds().max(0) as u64;
    format_seconds(age)
}

fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}
