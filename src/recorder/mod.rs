//! Recording system module
//!
//! - `StreamSource` / `PlaybackSink` seams to the camera and the player
//! - `RecordingSession` records one segment
//! - `RecordingOrchestrator` rotates segments and retries failures

pub mod orchestrator;
pub mod segment;
pub mod session;
pub mod state;
pub mod traits;

pub use orchestrator::{OrchestratorOptions, RecorderEvent, RecordingOrchestrator};
pub use segment::{segment_path, Clock, SegmentPlanner, SystemClock};
pub use session::{RecordingSession, SessionEnd, SessionError, SessionOutcome, SessionPhase};
pub use state::{RecorderState, RecordingParameters, RunSummary, SegmentEnd, SegmentRecord};
pub use traits::{PlaybackEvent, PlaybackHandle, PlaybackSink, StreamSource};
