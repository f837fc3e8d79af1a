//! Tracing setup for the binary, with size-based rotation of the log file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Log file size that triggers rotation (10 MiB).
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Rotated copies kept next to the live log.
pub const MAX_ROTATED_FILES: usize = 5;

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `level`, or `debug` with `verbose`.
/// With `log_file`, output goes to that file (rotated first if oversized)
/// instead of stderr.
pub fn init_tracing(level: &str, verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let default = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    match log_file {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)
                    .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            }
            if let Err(e) = rotate_if_needed(path, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
                eprintln!("warning: log rotation failed for {}: {e}", path.display());
            }
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            let _ = fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(io::stderr)
                .try_init();
        }
    }
    Ok(())
}

/// Rotate `log_path` when it is at least `max_bytes`:
/// `<name>.<n>` → `<name>.<n+1>`, `<name>` → `<name>.1`, the oldest copy is
/// dropped. Returns whether a rotation happened.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes || max_files == 0 {
        return Ok(false);
    }

    let oldest = numbered_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..max_files).rev() {
        let src = numbered_path(log_path, n);
        if src.exists() {
            fs::rename(&src, numbered_path(log_path, n + 1))?;
        }
    }
    fs::rename(log_path, numbered_path(log_path, 1))?;
    Ok(true)
}

fn numbered_path(path: &Path, n: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}
