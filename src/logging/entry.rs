//! Log entry model and line format

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Information,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "Trace",
            LogLevel::Debug => "Debug",
            LogLevel::Information => "Information",
            LogLevel::Warning => "Warning",
            LogLevel::Error => "Error",
            LogLevel::Critical => "Critical",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => LogLevel::Trace,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Information,
            tracing::Level::WARN => LogLevel::Warning,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

/// One queued log record. Immutable once built.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub timestamp: DateTime<Local>,
    pub category: String,
    /// First and last scope open at the time of the call
    pub scopes: Vec<String>,
    pub message: String,
    /// Error messages, outermost cause first
    pub error_chain: Vec<String>,
}

impl LogEntry {
    /// Render the entry as one line of the log file, newline included.
    pub fn format_line(&self) -> String {
        let context = if self.scopes.is_empty() {
            format!("[{}]", self.category)
        } else {
            format!("[{} - {}]", self.scopes.join(" - "), self.category)
        };

        format!(
            "[{}]\t{}\t{}\tMessage: {}\tException: {}\n",
            self.level,
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            context,
            single_line(&self.message),
            single_line(&self.error_chain.join(" | ")),
        )
    }
}

// One entry per line: embedded line breaks are escaped.
fn single_line(text: &str) -> String {
    text.replace('\r', "").replace('\n', "\\n")
}
