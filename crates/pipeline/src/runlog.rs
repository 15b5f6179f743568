//! Durable run log.
//!
//! Two append-only files in the working directory: one receives every event,
//! the other only errors. Every line is also emitted through `tracing` so the
//! console sees the same events.

use batch_mp4_config::LoggingConfig;
use chrono::{DateTime, Local};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{error, info, warn};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Error opening one of the log files.
#[derive(Debug, Error)]
#[error("failed to open log file {}: {source}", .path.display())]
pub struct LogOpenError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Severity of a run log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Formats one log line: `[YYYY-MM-DD HH:MM:SS] LEVEL message`.
pub fn format_line(at: DateTime<Local>, level: LogLevel, message: &str) -> String {
    format!("[{}] {} {}", at.format(TIMESTAMP_FORMAT), level, message)
}

/// Handle to the run's log files. Files are closed when the log is dropped.
#[derive(Debug)]
pub struct RunLog {
    all: Option<Mutex<File>>,
    errors: Option<Mutex<File>>,
}

impl RunLog {
    /// Opens (creating if needed) both log files inside `dir` for appending.
    pub fn open(dir: &Path, cfg: &LoggingConfig) -> Result<Self, LogOpenError> {
        Ok(Self {
            all: Some(Mutex::new(open_append(&dir.join(&cfg.all_events))?)),
            errors: Some(Mutex::new(open_append(&dir.join(&cfg.errors))?)),
        })
    }

    /// Log that only reaches the console. Used for dry runs and tests.
    pub fn console_only() -> Self {
        Self {
            all: None,
            errors: None,
        }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!("{}", message);
        self.write(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        warn!("{}", message);
        self.write(LogLevel::Warn, message);
    }

    /// Logs to the console, the all-events file and the error file.
    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        error!("{}", message);
        self.write(LogLevel::Error, message);
    }

    fn write(&self, level: LogLevel, message: &str) {
        let line = format_line(Local::now(), level, message);

        append_line(self.all.as_ref(), &line);
        if level == LogLevel::Error {
            append_line(self.errors.as_ref(), &line);
        }
    }
}

fn open_append(path: &Path) -> Result<File, LogOpenError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LogOpenError {
            path: path.to_path_buf(),
            source,
        })
}

fn append_line(file: Option<&Mutex<File>>, line: &str) {
    let Some(file) = file else {
        return;
    };
    // A poisoned lock only means another writer panicked mid-line
    let mut file = match file.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Err(e) = writeln!(file, "{}", line) {
        warn!("failed to write run log: {}", e);
    }
}
