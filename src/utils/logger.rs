//! Logging initialization and configuration.
//!
//! With a log directory, logs go to a fresh timestamped file per run so they
//! never mix with command output on stdout. Without one, they go to stderr.
//!
//! # Configuration
//!
//! The log level can be controlled via the `RUST_LOG` environment variable:
//! - `RUST_LOG=debug` - Show every dispatched batch and parsed sentinel
//! - `RUST_LOG=info` - Show session start/close
//! - `RUST_LOG=warn` - Show startup failures and loop I/O errors (default)
//! - `RUST_LOG=error` - Show errors only

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "warn";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Path of this run's log file, e.g. `logs/rusty-shell.2024-12-06-14-30-25.log`.
pub fn log_file_path(log_dir: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y-%m-%d-%H-%M-%S");
    log_dir.join(format!("rusty-shell.{}.log", timestamp))
}

/// Initialize the logging system.
///
/// Keep the returned guard alive for the whole program: dropping it flushes
/// and stops the background writer. It is `None` when logging to stderr.
pub fn init_logging(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let Some(log_dir) = log_dir else {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()
            .context("Failed to install stderr logger")?;
        return Ok(None);
    };

    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let log_path = log_file_path(log_dir);
    let log_file = fs::File::create(&log_path)
        .with_context(|| format!("Failed to create log file {}", log_path.display()))?;

    // Use non-blocking writer so the shell threads never wait on disk
    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false) // No ANSI colors in log files
        .with_target(true) // Include module path
        .with_thread_names(true) // shell-input-<pid> / shell-output-<pid>
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(file_layer)
        .try_init()
        .context("Failed to install file logger")?;

    tracing::info!("Logging initialized - writing to {}", log_path.display());
    Ok(Some(guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_path_is_timestamped() {
        let path = log_file_path(Path::new("logs"));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("rusty-shell."));
        assert!(name.ends_with(".log"));
        assert_eq!(path.parent(), Some(Path::new("logs")));
    }
}
