//! Log-file helpers for the client binary.
//!
//! Resolves the default log path, rotates oversized logs, and maps the
//! configured level to a `tracing` filter directive.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nitrate_config::LogLevel;

/// Maximum size of a single log file before rotation (10 MB).
pub const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum number of rotated log files to retain.
pub const DEFAULT_MAX_LOG_FILES: u32 = 5;

const LOG_FILE_NAME: &str = "nitrate-client.log";

/// Return the default log file path.
///
/// Uses the platform's local data directory, e.g.
/// `$HOME/.local/share/nitrate/nitrate-client.log` on Linux, and falls
/// back to `/tmp/nitrate/nitrate-client.log`.
pub fn default_log_file_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("nitrate").join(LOG_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from("/tmp/nitrate").join(LOG_FILE_NAME))
}

/// Ensure the parent directory of a log file exists.
pub fn ensure_log_dir(log_path: &Path) -> io::Result<()> {
    if let Some(parent) = log_path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Rotate `log_path` once it reaches `max_size` bytes.
///
/// ```text
///   client.log   -> client.log.1
///   client.log.1 -> client.log.2
///   client.log.<max_files> is deleted
/// ```
pub fn rotate_log_files(log_path: &Path, max_size: u64, max_files: u32) -> io::Result<()> {
    if !log_path.exists() || fs::metadata(log_path)?.len() < max_size {
        return Ok(());
    }

    let oldest = rotated_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for i in (1..max_files).rev() {
        let from = rotated_path(log_path, i);
        if from.exists() {
            fs::rename(&from, rotated_path(log_path, i + 1))?;
        }
    }
    fs::rename(log_path, rotated_path(log_path, 1))
}

/// The log file the server was told to write via `--log`, if any.
pub fn server_log_file(args: &[String]) -> Option<PathBuf> {
    args.iter()
        .position(|arg| arg == "--log")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
}

/// The `tracing` filter directive for a configured level.
pub fn log_level_to_filter(level: &LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

fn rotated_path(base: &Path, index: u32) -> PathBuf {
    let name = base.file_name().unwrap_or_default().to_string_lossy();
    let parent = base.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{}.{}", name, index))
}
