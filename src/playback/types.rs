//! Playback types
//!
//! Error type and diagnostic classification shared by the ffmpeg wrappers.

use crate::logging::LogLevel;
use thiserror::Error;

/// Playback errors
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("failed to start ffmpeg")]
    Spawn(#[source] std::io::Error),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),
}

/// Level for one ffmpeg stderr line. ffmpeg only prints warnings and errors
/// at `-loglevel warning`, so anything not mentioning an error is a warning.
pub fn classify_line(line: &str) -> LogLevel {
    if line.to_ascii_lowercase().contains("error") {
        LogLevel::Error
    } else {
        LogLevel::Warning
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_line() {
        assert_eq!(classify_line("Non-monotonous DTS in output stream"), LogLevel::Warning);
        assert_eq!(classify_line("Error while decoding stream #0:0"), LogLevel::Error);
        assert_eq!(classify_line("rtsp: connection ERROR"), LogLevel::Error);
    }
}
