//! Recording orchestrator
//!
//! Drives back-to-back segments until the stop token fires. Each segment gets
//! a child token that is cancelled at its rotation deadline, failed attempts
//! are retried after a fixed backoff, and only one segment is ever active.

use super::segment::{Clock, SegmentPlanner, SystemClock};
use super::session::{RecordingSession, SessionEnd, SessionError, SessionPhase};
use super::state::{RecorderState, RecordingParameters, RunSummary, SegmentEnd, SegmentRecord};
use crate::config::Settings;
use crate::logging::LogSink;
use chrono::{DateTime, Local};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Events emitted while recording
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    /// State machine moved
    StateChanged(RecorderState),
    /// A segment attempt began on this path
    SegmentStarted { index: u64, path: PathBuf },
    /// A segment was closed
    SegmentFinished(SegmentRecord),
    /// An attempt failed before recording started
    AttemptFailed { attempt: u64, reason: String },
    /// The run loop exited
    Finished(RunSummary),
}

/// Timing and naming knobs of a run
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub rotation_interval: Duration,
    pub retry_backoff: Duration,
    /// Segment file extension, without the dot
    pub extension: String,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for OrchestratorOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            rotation_interval: settings.rotation_interval,
            retry_backoff: settings.retry_backoff,
            extension: settings.segment_extension.clone(),
        }
    }
}

/// Runs the segment loop for one camera profile
pub struct RecordingOrchestrator {
    session: RecordingSession,
    options: OrchestratorOptions,
    clock: Arc<dyn Clock>,
    log: Arc<LogSink>,

    /// Current recorder state
    state: Arc<RwLock<RecorderState>>,

    /// Event broadcaster
    event_tx: broadcast::Sender<RecorderEvent>,
}

impl RecordingOrchestrator {
    pub fn new(session: RecordingSession, log: Arc<LogSink>, options: OrchestratorOptions) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            session,
            options,
            clock: Arc::new(SystemClock),
            log,
            state: Arc::new(RwLock::new(RecorderState::Idle)),
            event_tx,
        }
    }

    /// Replace the wall clock used for segment names
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> RecorderState {
        *self.state.read()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.event_tx.subscribe()
    }

    fn set_state(&self, next: RecorderState) {
        {
            let mut state = self.state.write();
            if *state == next {
                return;
            }
            *state = next;
        }
        tracing::debug!("Recorder state: {:?}", next);
        let _ = self.event_tx.send(RecorderEvent::StateChanged(next));
    }

    /// Record until `stop` is cancelled.
    ///
    /// Never fails: resolution, playback and filesystem errors are logged
    /// and retried after the backoff. Returns once the active segment has
    /// been stopped.
    pub async fn run(&self, params: &RecordingParameters, stop: &CancellationToken) -> RunSummary {
        let run_id = Uuid::new_v4();
        let _run_scope = self
            .log
            .begin_scope(format!("{}/{}", params.target_address, params.profile_token));

        tracing::info!(
            "Recording run {} started for {} profile {} into {:?}, rotating every {:?}",
            run_id,
            params.target_address,
            params.profile_token,
            params.output_root,
            self.options.rotation_interval
        );

        let mut planner = SegmentPlanner::new(
            self.clock.clone(),
            &params.output_root,
            &self.options.extension,
        );
        let mut summary = RunSummary::default();
        let mut index = 0u64;

        while !stop.is_cancelled() {
            self.set_state(RecorderState::Idle);
            let (started_at, path) = planner.next();
            let _segment_scope = self.log.begin_scope(format!("segment {}", index));

            match self.record_segment(params, stop, index, started_at, path).await {
                Ok(record) => {
                    let end = record.end;
                    if end == SegmentEnd::NotStarted {
                        continue;
                    }

                    tracing::info!(
                        "Segment {} closed after {} ms ({:?}): {:?}",
                        record.index,
                        record.duration_ms(),
                        end,
                        record.path
                    );
                    summary.segments_completed += 1;
                    index += 1;
                    let _ = self.event_tx.send(RecorderEvent::SegmentFinished(record));

                    match end {
                        SegmentEnd::Rotated => self.set_state(RecorderState::Rotating),
                        SegmentEnd::SinkExited => {
                            tracing::warn!(
                                "Player ended on its own, reconnecting in {:?}",
                                self.options.retry_backoff
                            );
                            if !self.backoff(stop).await {
                                break;
                            }
                        }
                        SegmentEnd::Stopped | SegmentEnd::NotStarted => {}
                    }
                }
                Err(err) => {
                    summary.failed_attempts += 1;
                    tracing::warn!(
                        error = &err as &(dyn std::error::Error + 'static),
                        "Attempt {} failed, retrying in {:?}",
                        summary.failed_attempts,
                        self.options.retry_backoff
                    );
                    let _ = self.event_tx.send(RecorderEvent::AttemptFailed {
                        attempt: summary.failed_attempts,
                        reason: crate::utils::error_chain(&err).join(" | "),
                    });
                    if !self.backoff(stop).await {
                        break;
                    }
                }
            }
        }

        self.set_state(RecorderState::Stopped);
        tracing::info!(
            "Recording run {} stopped: {} segments, {} failed attempts",
            run_id,
            summary.segments_completed,
            summary.failed_attempts
        );
        let _ = self.event_tx.send(RecorderEvent::Finished(summary.clone()));
        summary
    }

    /// Wait out the retry backoff. Returns `false` if `stop` fired first.
    async fn backoff(&self, stop: &CancellationToken) -> bool {
        self.set_state(RecorderState::Backoff);
        tokio::select! {
            _ = stop.cancelled() => false,
            _ = tokio::time::sleep(self.options.retry_backoff) => true,
        }
    }

    async fn record_segment(
        &self,
        params: &RecordingParameters,
        stop: &CancellationToken,
        index: u64,
        started_at: DateTime<Local>,
        path: PathBuf,
    ) -> Result<SegmentRecord, SessionError> {
        // Deadline runs from the moment the segment was named.
        let segment_token = stop.child_token();
        let _deadline_guard = segment_token.clone().drop_guard();
        tokio::spawn({
            let token = segment_token.clone();
            let interval = self.options.rotation_interval;
            async move {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => token.cancel(),
                    _ = token.cancelled() => {}
                }
            }
        });

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| SessionError::Filesystem {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        let _ = self.event_tx.send(RecorderEvent::SegmentStarted {
            index,
            path: path.clone(),
        });

        let outcome = self
            .session
            .execute(params, &path, &segment_token, |phase| match phase {
                SessionPhase::Resolving => self.set_state(RecorderState::ResolvingUri),
                SessionPhase::Recording { .. } => self.set_state(RecorderState::Recording),
                SessionPhase::Stopping => {}
            })
            .await?;

        let end = match outcome.end {
            SessionEnd::Cancelled if stop.is_cancelled() => SegmentEnd::Stopped,
            SessionEnd::Cancelled => SegmentEnd::Rotated,
            SessionEnd::SinkExited => SegmentEnd::SinkExited,
            SessionEnd::NotStarted => SegmentEnd::NotStarted,
        };

        Ok(SegmentRecord {
            index,
            path,
            uri: outcome.uri,
            started_at,
            ended_at: self.clock.now(),
            end,
        })
    }
}
