//! Logging setup.
//!
//! The console gets human-readable events, filtered by `RUST_LOG` when it is
//! set. Files get JSON events through a rolling, non-blocking appender.
//! Settings come from the `logging` section of [`AppConfig`].
//!
//! [`AppConfig`]: crate::config::AppConfig

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE_PREFIX: &str = "soundboard";

/// The `logging` section of the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log file directory. Defaults to [`default_log_directory`].
    pub directory: Option<PathBuf>,
    /// Level for this crate on the console ("info", "debug", ...).
    pub console_level: String,
    /// Level for this crate in the log files.
    pub file_level: String,
    /// How often a new log file is started.
    pub rotation: LogRotation,
    /// Rotated files kept on disk; 0 keeps all of them.
    pub keep_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            console_level: "info".to_string(),
            file_level: "debug".to_string(),
            rotation: LogRotation::Daily,
            keep_files: 7,
        }
    }
}

/// Log file rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// A new file every hour.
    Hourly,
    /// A new file every day.
    Daily,
    /// One file forever.
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => Self::HOURLY,
            LogRotation::Daily => Self::DAILY,
            LogRotation::Never => Self::NEVER,
        }
    }
}

impl LoggingConfig {
    /// Where log files go.
    #[must_use]
    pub fn log_directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(default_log_directory)
    }

    /// Filter for the file layer: other crates at warn, ours at `file_level`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFilter` if `file_level` is not a level name.
    pub fn file_filter(&self) -> Result<EnvFilter, LoggingError> {
        crate_filter(&self.file_level)
    }

    /// Filter for the console layer. `RUST_LOG` wins when set.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFilter` if `console_level` is not a level name.
    pub fn console_filter(&self) -> Result<EnvFilter, LoggingError> {
        EnvFilter::try_from_default_env().or_else(|_| crate_filter(&self.console_level))
    }
}

/// Flushes buffered file entries when dropped.
#[must_use = "file logging stops when the guard is dropped"]
pub struct LoggingGuard {
    _file: WorkerGuard,
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails if the log directory or file cannot be created, a level name is
/// invalid, or a subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    let directory = config.log_directory();
    std::fs::create_dir_all(&directory).map_err(|e| LoggingError::Directory {
        path: directory.clone(),
        reason: e.to_string(),
    })?;

    let mut builder = RollingFileAppender::builder()
        .rotation(config.rotation.into())
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log");
    if config.keep_files > 0 {
        builder = builder.max_log_files(config.keep_files);
    }
    let appender = builder
        .build(&directory)
        .map_err(|e| LoggingError::Appender(e.to_string()))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let console = fmt::layer()
        .with_target(false)
        .with_filter(config.console_filter()?);
    let file = fmt::layer()
        .json()
        .with_writer(writer)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_filter(config.file_filter()?);

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    tracing::debug!("Logging to {}", directory.display());
    Ok(LoggingGuard { _file: guard })
}

/// `<data_local_dir>/soundboard/logs`.
#[must_use]
pub fn default_log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("soundboard")
        .join("logs")
}

fn crate_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    let directives = format!("warn,soundboard_core={}", level.trim().to_ascii_lowercase());
    EnvFilter::try_new(&directives).map_err(|e| LoggingError::InvalidFilter {
        directives,
        reason: e.to_string(),
    })
}

/// Errors raised while installing the logger.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to create log directory {path}: {reason}")]
    Directory { path: PathBuf, reason: String },

    #[error("Failed to open log file: {0}")]
    Appender(String),

    #[error("Invalid log filter '{directives}': {reason}")]
    InvalidFilter { directives: String, reason: String },

    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_section_defaults() {
        let config: LoggingConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, LoggingConfig::default());
        assert_eq!(config.rotation, LogRotation::Daily);
        assert!(config.log_directory().ends_with("soundboard/logs"));
    }

    #[test]
    fn test_section_parses_rotation_and_directory() {
        let config: LoggingConfig =
            serde_json::from_str(r#"{"directory": "/tmp/board-logs", "rotation": "hourly", "keep_files": 0}"#)
                .unwrap();
        assert_eq!(config.rotation, LogRotation::Hourly);
        assert_eq!(config.keep_files, 0);
        assert_eq!(config.log_directory(), PathBuf::from("/tmp/board-logs"));
    }

    #[test]
    fn test_file_filter_targets_this_crate() {
        let config = LoggingConfig {
            file_level: "TRACE".to_string(),
            ..LoggingConfig::default()
        };
        let rendered = config.file_filter().unwrap().to_string();
        assert!(rendered.contains("soundboard_core=trace"));
    }

    #[test]
    fn test_bad_level_is_rejected() {
        let config = LoggingConfig {
            file_level: "loud!".to_string(),
            ..LoggingConfig::default()
        };
        assert!(matches!(
            config.file_filter(),
            Err(LoggingError::InvalidFilter { .. })
        ));
    }
}
