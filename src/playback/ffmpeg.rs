//! FFmpeg recorder and transcoder wrappers
//!
//! `FfmpegSink` remuxes a camera stream into a segment file. `Transcoder`
//! re-encodes a stream to Ogg on stdout for the HTTP proxy.

use super::types::{classify_line, PlaybackError};
use crate::config::Settings;
use crate::logging::LogLevel;
use crate::recorder::{PlaybackEvent, PlaybackHandle, PlaybackSink};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, ReadBuf};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;

const MODULE: &str = "ffmpeg";

/// Arguments for remuxing `uri` into `output` without re-encoding
pub fn record_args(uri: &str, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "warning".into()];
    // UDP delivery drops packets on most camera networks
    if uri.starts_with("rtsp://") || uri.starts_with("rtsps://") {
        args.push("-rtsp_transport".to_string());
        args.push("tcp".to_string());
    }
    args.extend([
        "-i".to_string(),
        uri.to_string(),
        "-c".to_string(),
        "copy".to_string(),
        "-y".to_string(),
        output.to_string_lossy().into_owned(),
    ]);
    args
}

/// Arguments for the low frame rate Ogg preview stream
pub fn transcode_args(uri: &str) -> Vec<String> {
    ["-hide_banner", "-loglevel", "error", "-i", uri, "-r", "10", "-f", "ogg", "pipe:1"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Records segments by running one ffmpeg process per segment
#[derive(Debug, Clone)]
pub struct FfmpegSink {
    program: PathBuf,
    stop_grace: Duration,
}

impl FfmpegSink {
    pub fn new(program: impl Into<PathBuf>, stop_grace: Duration) -> Self {
        Self {
            program: program.into(),
            stop_grace,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.ffmpeg_path, settings.stop_grace)
    }
}

#[async_trait]
impl PlaybackSink for FfmpegSink {
    async fn start(&self, uri: &str, output: &Path) -> Result<Box<dyn PlaybackHandle>, PlaybackError> {
        let mut child = Command::new(&self.program)
            .args(record_args(uri, output))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(PlaybackError::Spawn)?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PlaybackError::Ffmpeg("Failed to capture FFmpeg stderr".to_string()))?;

        let (tx, events) = mpsc::channel(64);
        tokio::spawn(forward_stderr(stderr, tx));

        tracing::debug!("Started ffmpeg (pid {:?}) writing {:?}", child.id(), output);

        Ok(Box::new(FfmpegHandle {
            child,
            events,
            stop_grace: self.stop_grace,
        }))
    }
}

/// Turn stderr lines into events until ffmpeg closes stderr or the handle
/// goes away
async fn forward_stderr(stderr: ChildStderr, tx: mpsc::Sender<PlaybackEvent>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event = PlaybackEvent {
            level: classify_line(line),
            module: MODULE.to_string(),
            message: line.to_string(),
        };
        if tx.send(event).await.is_err() {
            break;
        }
    }
}

/// A running ffmpeg recording. Killed on drop.
pub struct FfmpegHandle {
    child: Child,
    events: mpsc::Receiver<PlaybackEvent>,
    stop_grace: Duration,
}

#[async_trait]
impl PlaybackHandle for FfmpegHandle {
    async fn next_event(&mut self) -> Option<PlaybackEvent> {
        self.events.recv().await
    }

    async fn stop(mut self: Box<Self>) {
        // `q` asks ffmpeg to finish the container and exit
        if let Some(mut stdin) = self.child.stdin.take() {
            let _ = stdin.write_all(b"q").await;
            let _ = stdin.flush().await;
        }

        let this = &mut *self;
        let exited = tokio::time::timeout(this.stop_grace, wait_draining(&mut this.child, &mut this.events)).await;
        match exited {
            Ok(Ok(status)) => tracing::debug!("ffmpeg exited with {}", status),
            Ok(Err(e)) => tracing::warn!("Failed to wait for ffmpeg: {}", e),
            Err(_) => {
                tracing::warn!("ffmpeg did not exit within {:?}, killing it", self.stop_grace);
                if let Err(e) = self.child.kill().await {
                    tracing::error!("Failed to kill ffmpeg: {}", e);
                }
            }
        }
    }
}

/// Wait for exit while still reading diagnostics, so a full stderr pipe
/// cannot stall ffmpeg while it finalizes the file
async fn wait_draining(
    child: &mut Child,
    events: &mut mpsc::Receiver<PlaybackEvent>,
) -> std::io::Result<ExitStatus> {
    loop {
        tokio::select! {
            status = child.wait() => return status,
            Some(event) = events.recv() => {
                if event.level >= LogLevel::Warning {
                    tracing::warn!("ffmpeg while stopping: {}", event.message);
                } else {
                    tracing::debug!("ffmpeg while stopping: {}", event.message);
                }
            }
        }
    }
}

/// Live transcode of a camera stream to Ogg on stdout
///
/// Reading yields the encoded bytes. Dropping the transcoder kills ffmpeg,
/// so a disconnected HTTP client ends the process.
pub struct Transcoder {
    _child: Child,
    stdout: ChildStdout,
}

impl Transcoder {
    pub fn spawn(program: &Path, uri: &str) -> Result<Self, PlaybackError> {
        let mut child = Command::new(program)
            .args(transcode_args(uri))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(PlaybackError::Spawn)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PlaybackError::Ffmpeg("Failed to capture FFmpeg stdout".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        tracing::warn!("FFmpeg transcoder: {}", line.trim());
                    }
                }
            });
        }

        tracing::info!("Transcoder started (pid {:?})", child.id());

        Ok(Self {
            _child: child,
            stdout,
        })
    }
}

impl AsyncRead for Transcoder {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().stdout).poll_read(cx, buf)
    }
}
