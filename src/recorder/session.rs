//! A single recording segment
//!
//! Resolves the stream URI, starts the player on the segment path, forwards
//! player diagnostics to the log sink and stops the player exactly once when
//! the segment token is cancelled or the player ends on its own.

use super::state::RecordingParameters;
use super::traits::{PlaybackSink, StreamSource};
use crate::logging::LogSink;
use crate::onvif::SourceError;
use crate::playback::PlaybackError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failure that ends an attempt before recording starts
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("stream URI resolution failed")]
    Resolution(#[source] SourceError),

    #[error("playback failed to start")]
    PlaybackStart(#[source] PlaybackError),

    #[error("cannot prepare segment directory {}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Progress reported while a session runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Resolving,
    Recording { uri: String },
    Stopping,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The segment token was cancelled while recording
    Cancelled,
    /// The player ended before the token was cancelled
    SinkExited,
    /// The token was cancelled before the player started
    NotStarted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub uri: Option<String>,
    pub end: SessionEnd,
}

/// Runs one segment against the configured source and sink
#[derive(Clone)]
pub struct RecordingSession {
    source: Arc<dyn StreamSource>,
    sink: Arc<dyn PlaybackSink>,
    log: Arc<LogSink>,
}

impl RecordingSession {
    pub fn new(source: Arc<dyn StreamSource>, sink: Arc<dyn PlaybackSink>, log: Arc<LogSink>) -> Self {
        Self { source, sink, log }
    }

    /// Record one segment to `output` until `cancel` fires.
    ///
    /// Once the player has started it is stopped before this returns, on
    /// every path. If the future is dropped mid-recording the handle is
    /// dropped with it, which releases the player.
    pub async fn execute<F>(
        &self,
        params: &RecordingParameters,
        output: &Path,
        cancel: &CancellationToken,
        on_phase: F,
    ) -> Result<SessionOutcome, SessionError>
    where
        F: Fn(SessionPhase) + Send + Sync,
    {
        on_phase(SessionPhase::Resolving);

        let resolved = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.source.resolve(
                &params.target_address,
                &params.profile_token,
                params.stream_type,
                params.transport,
            ) => Some(result),
        };
        let uri = match resolved {
            Some(result) => result.map_err(SessionError::Resolution)?,
            None => {
                return Ok(SessionOutcome {
                    uri: None,
                    end: SessionEnd::NotStarted,
                })
            }
        };

        tracing::debug!("Resolved stream URI {}", uri);

        let mut handle = self
            .sink
            .start(&uri, output)
            .await
            .map_err(SessionError::PlaybackStart)?;

        tracing::info!("Recording {} to {:?}", uri, output);
        on_phase(SessionPhase::Recording { uri: uri.clone() });

        let end = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break SessionEnd::Cancelled,
                event = handle.next_event() => match event {
                    Some(event) => {
                        self.log.log(event.level, &event.module, event.message, None);
                    }
                    None => break SessionEnd::SinkExited,
                },
            }
        };

        on_phase(SessionPhase::Stopping);
        handle.stop().await;

        Ok(SessionOutcome { uri: Some(uri), end })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogLevel, LogSinkConfig};
    use crate::onvif::{StreamType, TransportProtocol};
    use crate::recorder::traits::{PlaybackEvent, PlaybackHandle};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct StaticSource(Result<String, ()>);

    #[async_trait]
    impl StreamSource for StaticSource {
        async fn resolve(
            &self,
            _address: &str,
            _profile_token: &str,
            _stream_type: StreamType,
            _transport: TransportProtocol,
        ) -> Result<String, SourceError> {
            self.0
                .clone()
                .map_err(|_| SourceError::Http("connection refused".to_string()))
        }
    }

    #[derive(Default)]
    struct ScriptedSink {
        stops: Arc<Mutex<u32>>,
        events: Mutex<Option<mpsc::Receiver<PlaybackEvent>>>,
    }

    struct ScriptedHandle {
        stops: Arc<Mutex<u32>>,
        events: Option<mpsc::Receiver<PlaybackEvent>>,
    }

    #[async_trait]
    impl PlaybackSink for ScriptedSink {
        async fn start(&self, _uri: &str, _output: &Path) -> Result<Box<dyn PlaybackHandle>, PlaybackError> {
            Ok(Box::new(ScriptedHandle {
                stops: self.stops.clone(),
                events: self.events.lock().take(),
            }))
        }
    }

    #[async_trait]
    impl PlaybackHandle for ScriptedHandle {
        async fn next_event(&mut self) -> Option<PlaybackEvent> {
            match self.events.as_mut() {
                Some(rx) => rx.recv().await,
                None => std::future::pending().await,
            }
        }

        async fn stop(self: Box<Self>) {
            *self.stops.lock() += 1;
        }
    }

    fn params() -> RecordingParameters {
        RecordingParameters {
            target_address: "10.0.0.5".to_string(),
            profile_token: "Profile_1".to_string(),
            stream_type: StreamType::Unicast,
            transport: TransportProtocol::Rtsp,
            output_root: PathBuf::from("/rec"),
        }
    }

    fn log_sink(dir: &TempDir) -> Arc<LogSink> {
        LogSink::new(LogSinkConfig {
            root_dir: dir.path().to_path_buf(),
            app_name: "SessionTest".to_string(),
            flush_interval: Duration::from_secs(3600),
            verbose: Some(true),
        })
    }

    #[tokio::test]
    async fn test_cancel_stops_player_once() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(ScriptedSink::default());
        let session = RecordingSession::new(
            Arc::new(StaticSource(Ok("rtsp://cam/stream".to_string()))),
            sink.clone(),
            log_sink(&dir),
        );
        let cancel = CancellationToken::new();
        let phases = Mutex::new(Vec::new());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = session
            .execute(&params(), Path::new("/rec/a.mp4"), &cancel, |p| phases.lock().push(p))
            .await
            .unwrap();

        assert_eq!(outcome.end, SessionEnd::Cancelled);
        assert_eq!(outcome.uri.as_deref(), Some("rtsp://cam/stream"));
        assert_eq!(*sink.stops.lock(), 1);
        assert_eq!(
            *phases.lock(),
            vec![
                SessionPhase::Resolving,
                SessionPhase::Recording {
                    uri: "rtsp://cam/stream".to_string()
                },
                SessionPhase::Stopping,
            ]
        );
    }

    #[tokio::test]
    async fn test_player_exit_forwards_events_then_stops() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel(8);
        let sink = Arc::new(ScriptedSink {
            stops: Arc::default(),
            events: Mutex::new(Some(rx)),
        });
        let log = log_sink(&dir);
        let session = RecordingSession::new(
            Arc::new(StaticSource(Ok("rtsp://cam/stream".to_string()))),
            sink.clone(),
            log.clone(),
        );

        tx.send(PlaybackEvent {
            level: LogLevel::Warning,
            module: "ffmpeg".to_string(),
            message: "non-monotonic DTS".to_string(),
        })
        .await
        .unwrap();
        drop(tx);

        let outcome = session
            .execute(&params(), Path::new("/rec/a.mp4"), &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert_eq!(outcome.end, SessionEnd::SinkExited);
        assert_eq!(*sink.stops.lock(), 1);
        assert_eq!(log.pending(), 1);

        log.flush_now().await;
        let contents = std::fs::read_to_string(log.log_path()).unwrap();
        assert!(contents.contains("[Warning]"));
        assert!(contents.contains("ffmpeg"));
        assert!(contents.contains("non-monotonic DTS"));
    }

    #[tokio::test]
    async fn test_resolution_failure_never_starts_player() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(ScriptedSink::default());
        let session = RecordingSession::new(Arc::new(StaticSource(Err(()))), sink.clone(), log_sink(&dir));

        let err = session
            .execute(&params(), Path::new("/rec/a.mp4"), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Resolution(_)));
        assert_eq!(*sink.stops.lock(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(ScriptedSink::default());
        let session = RecordingSession::new(
            Arc::new(StaticSource(Ok("rtsp://cam/stream".to_string()))),
            sink.clone(),
            log_sink(&dir),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = session
            .execute(&params(), Path::new("/rec/a.mp4"), &cancel, |_| {})
            .await
            .unwrap();

        assert_eq!(outcome.end, SessionEnd::NotStarted);
        assert_eq!(*sink.stops.lock(), 0);
    }
}
