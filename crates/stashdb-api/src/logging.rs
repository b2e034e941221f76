//! Logging configuration for StashDB
//!
//! The store reports through the `tracing` framework: `info!` for open and
//! close, `warn!` for map growth and recoverable close failures, `error!` for
//! an exhausted map or a failing final flush, `debug!` for flushes and
//! commits. Nothing is printed unless the application installs a subscriber;
//! [`LogConfig`] installs a ready-made one.

use std::path::{Path, PathBuf};

use stashdb_core::{Error, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILE: &str = "stashdb.log";

/// Log output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    /// Output to stdout
    Stdout,
    /// Output to a daily-rotated file
    File(PathBuf),
    /// Output to both stdout and a daily-rotated file
    Both(PathBuf),
}

impl LogOutput {
    fn stdout(&self) -> bool {
        matches!(self, LogOutput::Stdout | LogOutput::Both(_))
    }

    fn file(&self) -> Option<&Path> {
        match self {
            LogOutput::Stdout => None,
            LogOutput::File(path) | LogOutput::Both(path) => Some(path),
        }
    }
}

/// Log format style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line format (default)
    Pretty,
    /// Compact single-line format
    Compact,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `stashdb=debug`; `RUST_LOG` wins if set
    pub level: String,
    /// Output destination
    pub output: LogOutput,
    /// Format style
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Stdout,
            format: LogFormat::Pretty,
        }
    }
}

impl LogConfig {
    /// Info level to stdout
    pub fn info() -> Self {
        Self::default()
    }

    /// Debug level; shows every flush and commit
    pub fn debug() -> Self {
        Self::default().with_level("debug")
    }

    /// Warn level; only growth and close problems
    pub fn warn() -> Self {
        Self::default().with_level("warn")
    }

    /// Log to a file instead of stdout
    pub fn with_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = LogOutput::File(path.into());
        self
    }

    /// Log to stdout and a file
    pub fn with_both<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = LogOutput::Both(path.into());
        self
    }

    /// Set log format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the filter directive
    pub fn with_level<S: Into<String>>(mut self, level: S) -> Self {
        self.level = level.into();
        self
    }

    /// Install this configuration as the global subscriber.
    ///
    /// When logging to a file, the returned guard must be kept alive; log
    /// lines still queued are written out when it is dropped. Fails with
    /// [`Error::Config`] for an invalid filter or if a global subscriber is
    /// already installed.
    ///
    /// ```rust,no_run
    /// use stashdb::logging::LogConfig;
    ///
    /// let _guard = LogConfig::debug().with_file("./logs/stashdb.log").init()?;
    /// # Ok::<(), stashdb::Error>(())
    /// ```
    pub fn init(self) -> Result<Option<WorkerGuard>> {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .map_err(|e| Error::Config(format!("invalid log filter '{}': {}", self.level, e)))?;

        let format = self.format;
        let stdout = self.output.stdout().then(|| match format {
            LogFormat::Pretty => fmt::layer().pretty().boxed(),
            LogFormat::Compact => fmt::layer().compact().boxed(),
        });

        let (file, guard) = match self.output.file() {
            Some(path) => {
                let (dir, name) = split_log_path(path);
                let appender = tracing_appender::rolling::daily(dir, name);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer().with_writer(writer).with_ansi(false);
                let layer = match format {
                    LogFormat::Pretty => layer.pretty().boxed(),
                    LogFormat::Compact => layer.compact().boxed(),
                };
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(stdout)
            .with(file)
            .try_init()
            .map_err(|e| Error::Config(format!("failed to install log subscriber: {}", e)))?;
        Ok(guard)
    }
}

/// Directory and file name prefix for the rolling appender.
fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, name)
}
