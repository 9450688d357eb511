//! `tracing` bridge
//!
//! Forwards every tracing event into a [`LogSink`]: the event target becomes
//! the category, the `message` field the message, and an error recorded on
//! any field (`error = &err as &(dyn Error + 'static)`) the error chain.

use super::entry::LogLevel;
use super::sink::LogSink;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

pub struct LogSinkLayer {
    sink: Arc<LogSink>,
}

impl LogSinkLayer {
    pub fn new(sink: Arc<LogSink>) -> Self {
        Self { sink }
    }
}

impl<S: Subscriber> Layer<S> for LogSinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = LogLevel::from(metadata.level());
        if !self.sink.is_enabled(level) {
            return;
        }

        let mut visitor = EntryVisitor::default();
        event.record(&mut visitor);
        let (message, errors) = visitor.finish();
        self.sink
            .log_with_chain(level, metadata.target(), message, errors);
    }
}

#[derive(Default)]
struct EntryVisitor {
    message: String,
    fields: Vec<String>,
    errors: Vec<String>,
}

impl EntryVisitor {
    fn finish(self) -> (String, Vec<String>) {
        let message = if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.join(" ")
        } else {
            format!("{} {}", self.message, self.fields.join(" "))
        };
        (message, self.errors)
    }
}

impl Visit for EntryVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_error(&mut self, _field: &Field, value: &(dyn StdError + 'static)) {
        self.errors = crate::utils::error_chain(value);
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogSinkConfig;
    use std::time::Duration;
    use tempfile::tempdir;
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Debug, thiserror::Error)]
    #[error("stream uri request failed")]
    struct UriError(#[source] std::io::Error);

    #[tokio::test]
    async fn test_events_reach_the_sink() {
        let dir = tempdir().unwrap();
        let sink = LogSink::new(LogSinkConfig {
            root_dir: dir.path().to_path_buf(),
            app_name: "OnvifRecorder".to_string(),
            flush_interval: Duration::from_secs(3600),
            verbose: Some(true),
        });

        let subscriber = tracing_subscriber::registry().with(LogSinkLayer::new(sink.clone()));
        tracing::subscriber::with_default(subscriber, || {
            let _scope = sink.begin_scope("segment");
            tracing::info!(target: "recorder", segment = 3, "Segment started");
            let err = UriError(std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out"));
            tracing::warn!(target: "recorder", error = &err as &(dyn StdError + 'static), "Attempt failed");
        });

        assert_eq!(sink.flush_now().await, 2);
        let content = tokio::fs::read_to_string(sink.log_path()).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert!(lines[0].starts_with("[Information]\t"));
        assert!(lines[0].contains("\t[segment - recorder]\tMessage: Segment started segment=3\t"));
        assert!(lines[1].starts_with("[Warning]\t"));
        assert!(lines[1].ends_with("Exception: stream uri request failed | timed out"));
    }

    #[tokio::test]
    async fn test_filtered_levels_are_skipped() {
        let dir = tempdir().unwrap();
        let sink = LogSink::new(LogSinkConfig {
            root_dir: dir.path().to_path_buf(),
            app_name: "OnvifRecorder".to_string(),
            flush_interval: Duration::from_secs(3600),
            verbose: Some(false),
        });

        let subscriber = tracing_subscriber::registry().with(LogSinkLayer::new(sink.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("noise");
            tracing::error!("signal");
        });

        assert_eq!(sink.pending(), 1);
    }
}
