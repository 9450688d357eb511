//! Media playback module
//!
//! ffmpeg-backed implementations of the recorder's playback seam.

pub mod ffmpeg;
pub mod types;

pub use ffmpeg::{record_args, transcode_args, FfmpegHandle, FfmpegSink, Transcoder};
pub use types::{classify_line, PlaybackError};
