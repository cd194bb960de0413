//! Logging configuration for PharmaDB.
//!
//! Log lines go to stderr so they never mix with table or JSON output on
//! stdout. `--log-file` redirects them to a file in the platform state
//! directory instead.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initializes logging to a file.
///
/// Location: `~/.local/state/pharmadb/pharmadb.log` on Linux (XDG state
/// directory), or the platform-appropriate state/config directory elsewhere.
/// Falls back to stderr when the file cannot be opened.
pub fn init_file_logging() {
    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            eprintln!("Warning: Could not create log directory: {e}");
            init_stderr_logging();
            return;
        }
    }

    // Appends, since every CLI invocation is short-lived.
    let log_file = match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file: {e}");
            init_stderr_logging();
            return;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(log_file)
        .with_ansi(false)
        .init();
}

/// Initializes logging to stderr.
pub fn init_stderr_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

/// Returns the path for the log file.
pub fn get_log_path() -> PathBuf {
    if let Some(state_dir) = dirs::state_dir() {
        return state_dir.join("pharmadb").join("pharmadb.log");
    }

    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("pharmadb").join("pharmadb.log");
    }

    std::env::temp_dir().join("pharmadb.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_path_is_absolute() {
        assert!(get_log_path().is_absolute());
    }

    #[test]
    fn test_log_path_ends_with_pharmadb_log() {
        assert!(get_log_path().ends_with("pharmadb.log"));
    }
}
