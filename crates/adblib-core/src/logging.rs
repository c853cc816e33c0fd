//! Logging configuration using tracing
//!
//! The library itself only emits events through the `tracing` macros. Binaries
//! and test harnesses that want the events persisted call [`init`] once.

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Environment variable holding the `EnvFilter` directives
pub const LOG_ENV_VAR: &str = "ADBLIB_LOG";

const DEFAULT_FILTER: &str = "adblib=info,warn";
const LOG_FILE_NAME: &str = "adblib.log";

/// Initialize the logging subsystem
///
/// Logs are written to `~/.local/share/adblib/logs/` (daily rotation).
/// Log level is controlled by the `ADBLIB_LOG` environment variable.
///
/// # Examples
/// ```bash
/// ADBLIB_LOG=debug cargo run
/// ADBLIB_LOG=adblib_client::tracker=trace cargo run
/// ```
pub fn init() -> Result<()> {
    let log_dir = get_log_directory()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_NAME);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .try_init()
        .map_err(|e| crate::Error::config(format!("Failed to install log subscriber: {}", e)))?;

    tracing::info!("adblib logging started, directory: {}", log_dir.display());

    Ok(())
}

/// Build the filter from `ADBLIB_LOG`, falling back to the default directives
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Get the log directory path
fn get_log_directory() -> Result<PathBuf> {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    Ok(base.join("adblib").join("logs"))
}

/// Get the log file path for the current day
pub fn get_current_log_file() -> Result<PathBuf> {
    let dir = get_log_directory()?;
    Ok(dir.join(LOG_FILE_NAME))
}
