//! Recorder state management
//!
//! Defines the recorder state machine, the run parameters and per-segment
//! bookkeeping.

use crate::onvif::{StreamType, TransportProtocol};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Current state of the recording loop
///
/// `Idle → ResolvingUri → Recording → Rotating → Idle`, with `Backoff`
/// after a failed attempt. `Stopped` is terminal and only reached through
/// the stop signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecorderState {
    /// Between segments
    #[default]
    Idle,
    /// Asking the camera for a stream URI
    ResolvingUri,
    /// A player is writing the current segment
    Recording,
    /// Current segment ended, the next one is about to start
    Rotating,
    /// Waiting before retrying a failed attempt
    Backoff,
    /// Stop signal observed, loop exited
    Stopped,
}

/// What to record and where. Fixed for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingParameters {
    /// Camera address, `host` or `host:port`
    pub target_address: String,

    /// Media profile token
    pub profile_token: String,

    #[serde(default)]
    pub stream_type: StreamType,

    #[serde(default)]
    pub transport: TransportProtocol,

    /// Root of the `yyyy-MM` directory tree
    pub output_root: PathBuf,
}

/// Why a segment ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SegmentEnd {
    /// Rotation deadline reached
    Rotated,
    /// Stop signal observed while recording
    Stopped,
    /// The player ended by itself, usually a dropped stream
    SinkExited,
    /// Stop signal observed before the player started
    NotStarted,
}

/// A finished segment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRecord {
    /// Segment index within the run (0, 1, 2, ...)
    pub index: u64,

    pub path: PathBuf,

    /// Stream URI the segment was recorded from
    pub uri: Option<String>,

    pub started_at: DateTime<Local>,

    pub ended_at: DateTime<Local>,

    pub end: SegmentEnd,
}

impl SegmentRecord {
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }
}

/// Totals of one orchestrator run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Segments whose player was started and stopped
    pub segments_completed: u64,

    /// Attempts that failed before recording started
    pub failed_attempts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_default_state() {
        assert_eq!(RecorderState::default(), RecorderState::Idle);
    }

    #[test]
    fn test_segment_duration() {
        let started_at = Local::now();
        let record = SegmentRecord {
            index: 0,
            path: PathBuf::from("/rec/2024-01/x.mp4"),
            uri: None,
            started_at,
            ended_at: started_at + Duration::milliseconds(1500),
            end: SegmentEnd::Rotated,
        };
        assert_eq!(record.duration_ms(), 1500);
    }

    #[test]
    fn test_parameters_defaults_from_json() {
        let params: RecordingParameters = serde_json::from_str(
            r#"{"targetAddress": "10.0.0.5", "profileToken": "Profile_1", "outputRoot": "/rec"}"#,
        )
        .unwrap();
        assert_eq!(params.stream_type, StreamType::Unicast);
        assert_eq!(params.transport, TransportProtocol::Rtsp);
    }
}
