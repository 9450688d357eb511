//! Batched file log sink
//!
//! `log` only pushes onto a lock-free queue. A background task drains the
//! queue on a fixed delay, formats everything pending into one buffer and
//! appends it to the day's log file in a single write. The next tick is
//! scheduled only after the previous flush finished, so two flushes never
//! overlap. Entries are only taken off the queue once the file is open,
//! and a failed write puts them back for the next tick.

use super::entry::{LogEntry, LogLevel};
use super::scope::{ScopeGuard, ScopeStack};
use crate::config::Settings;
use chrono::Local;
use crossbeam::queue::SegQueue;
use std::collections::VecDeque;
use std::error::Error as StdError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Where and how often a [`LogSink`] writes
#[derive(Debug, Clone)]
pub struct LogSinkConfig {
    /// Parent directory, the platform temp dir by default
    pub root_dir: PathBuf,
    /// Folder created under `root_dir`
    pub app_name: String,
    pub flush_interval: Duration,
    /// Overrides the build-profile level policy when set
    pub verbose: Option<bool>,
}

impl Default for LogSinkConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for LogSinkConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            root_dir: settings.log_dir.clone(),
            app_name: settings.log_app_name.clone(),
            flush_interval: settings.log_flush_interval,
            verbose: settings.log_verbose,
        }
    }
}

pub struct LogSink {
    config: LogSinkConfig,
    queue: SegQueue<LogEntry>,
    /// Entries from a failed write, older than anything in `queue`
    carry: parking_lot::Mutex<VecDeque<LogEntry>>,
    scopes: Arc<ScopeStack>,
    write_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl LogSink {
    /// Create a sink without a flush task. Call [`LogSink::start`] from
    /// inside a tokio runtime to begin periodic flushing.
    pub fn new(config: LogSinkConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            queue: SegQueue::new(),
            carry: parking_lot::Mutex::new(VecDeque::new()),
            scopes: Arc::new(ScopeStack::new()),
            write_lock: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
            task: parking_lot::Mutex::new(None),
        })
    }

    /// Spawn the flush task. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let weak = Arc::downgrade(self);
        let interval = self.config.flush_interval;
        let shutdown = self.shutdown.clone();
        *task = Some(tokio::spawn(flush_loop(weak, interval, shutdown)));
    }

    /// Whether entries of `level` reach the queue at all
    pub fn is_enabled(&self, level: LogLevel) -> bool {
        let verbose = self.config.verbose.unwrap_or(cfg!(debug_assertions));
        verbose || level >= LogLevel::Information
    }

    /// Queue one entry. Never blocks on I/O and never fails.
    pub fn log(
        &self,
        level: LogLevel,
        category: &str,
        message: impl Into<String>,
        error: Option<&(dyn StdError + 'static)>,
    ) {
        let error_chain = error.map(crate::utils::error_chain).unwrap_or_default();
        self.log_with_chain(level, category, message.into(), error_chain);
    }

    /// Queue an entry whose error chain was already collected
    pub fn log_with_chain(
        &self,
        level: LogLevel,
        category: &str,
        message: String,
        error_chain: Vec<String>,
    ) {
        if !self.is_enabled(level) {
            return;
        }

        self.queue.push(LogEntry {
            level,
            timestamp: Local::now(),
            category: category.to_string(),
            scopes: self.scopes.snapshot(),
            message,
            error_chain,
        });
    }

    /// Open a named scope shared by every caller of this sink
    pub fn begin_scope(&self, name: impl Into<String>) -> ScopeGuard {
        ScopeGuard::open(self.scopes.clone(), name)
    }

    /// Category-bound handle for convenience
    pub fn logger(self: &Arc<Self>, category: impl Into<String>) -> Logger {
        Logger {
            sink: self.clone(),
            category: category.into(),
        }
    }

    /// Entries waiting for the next flush
    pub fn pending(&self) -> usize {
        self.carry.lock().len() + self.queue.len()
    }

    /// Log file for the current calendar day
    pub fn log_path(&self) -> PathBuf {
        self.config
            .root_dir
            .join(&self.config.app_name)
            .join(format!("LogFile_{}.log", Local::now().format("%Y-%m-%d")))
    }

    /// Write everything queued so far. Returns the number of entries
    /// written; on failure nothing is dropped and 0 is returned.
    pub async fn flush_now(&self) -> usize {
        let _guard = self.write_lock.lock().await;

        // Only what was queued before the drain started; later entries wait
        // for the next flush.
        let pending = self.queue.len();
        if pending == 0 && self.carry.lock().is_empty() {
            return 0;
        }

        let path = self.log_path();
        let mut file = match self.open_log(&path).await {
            Ok(file) => file,
            Err(e) => {
                eprintln!("Error opening log file {}: {}", path.display(), e);
                return 0;
            }
        };

        let mut batch: Vec<LogEntry> = self.carry.lock().drain(..).collect();
        for _ in 0..pending {
            match self.queue.pop() {
                Some(entry) => batch.push(entry),
                None => break,
            }
        }

        let buffer: String = batch.iter().map(LogEntry::format_line).collect();
        let written = async {
            file.write_all(buffer.as_bytes()).await?;
            file.flush().await
        }
        .await;

        match written {
            Ok(()) => batch.len(),
            Err(e) => {
                eprintln!("Error writing log entry: {}", e);
                let mut carry = self.carry.lock();
                for entry in batch.into_iter().rev() {
                    carry.push_front(entry);
                }
                0
            }
        }
    }

    /// Stop the flush task after a final flush
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.flush_now().await;
    }

    async fn open_log(&self, path: &Path) -> std::io::Result<tokio::fs::File> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let created = !tokio::fs::try_exists(path).await.unwrap_or(false);
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        if created {
            if let Err(e) = set_shared_permissions(path).await {
                self.permission_warning(path, &e);
            }
        }
        Ok(file)
    }

    fn permission_warning(&self, path: &Path, error: &std::io::Error) {
        self.log(
            LogLevel::Warning,
            "LogSink",
            format!("Could not set permissions on {}", path.display()),
            Some(error),
        );
    }

    fn flush_blocking(&self) {
        let mut buffer: String = self.carry.lock().drain(..).map(|e| e.format_line()).collect();
        while let Some(entry) = self.queue.pop() {
            buffer.push_str(&entry.format_line());
        }
        if buffer.is_empty() {
            return;
        }

        let path = self.log_path();
        let result = (|| -> std::io::Result<()> {
            use std::io::Write;
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            file.write_all(buffer.as_bytes())
        })();

        if let Err(e) = result {
            eprintln!("Error writing log entry: {}", e);
        }
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.flush_blocking();
    }
}

async fn flush_loop(sink: Weak<LogSink>, interval: Duration, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match sink.upgrade() {
            Some(sink) => {
                sink.flush_now().await;
            }
            None => break,
        }
    }
}

#[cfg(unix)]
async fn set_shared_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o775)).await
}

#[cfg(not(unix))]
async fn set_shared_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// A [`LogSink`] handle bound to one category
#[derive(Clone)]
pub struct Logger {
    sink: Arc<LogSink>,
    category: String,
}

impl Logger {
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(level, &self.category, message, None);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Information, message);
    }

    pub fn error(&self, message: impl Into<String>, error: &(dyn StdError + 'static)) {
        self.sink.log(LogLevel::Error, &self.category, message, Some(error));
    }
}
