//! Collaborator traits
//!
//! The recorder only talks to the camera and the media player through these
//! seams, so both can be swapped for fakes in tests.

use crate::logging::LogLevel;
use crate::onvif::{SourceError, StreamType, TransportProtocol};
use crate::playback::PlaybackError;
use async_trait::async_trait;
use std::path::Path;

/// Resolves a playable URI for a camera profile
#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn resolve(
        &self,
        address: &str,
        profile_token: &str,
        stream_type: StreamType,
        transport: TransportProtocol,
    ) -> Result<String, SourceError>;
}

/// Diagnostic emitted by a running player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackEvent {
    pub level: LogLevel,
    pub module: String,
    pub message: String,
}

/// Starts persisting a stream to a file
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Begin writing `uri` to `output`. Returns once the player is running.
    async fn start(&self, uri: &str, output: &Path) -> Result<Box<dyn PlaybackHandle>, PlaybackError>;
}

/// A running player. Dropping the handle without calling `stop` must still
/// release the player.
#[async_trait]
pub trait PlaybackHandle: Send {
    /// Next diagnostic event, or `None` once the player has ended on its own.
    async fn next_event(&mut self) -> Option<PlaybackEvent>;

    /// Stop the player and wait until the output file is closed.
    async fn stop(self: Box<Self>);
}
