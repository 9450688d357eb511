//! ONVIF Recorder - unattended segmented recording from ONVIF cameras.
//!
//! This is the library crate behind the `onvif-recorder` binary. It provides
//! the camera client, the segment orchestrator, the ffmpeg playback sink,
//! the buffered file logger and the HTTP preview proxy.

pub mod config;
pub mod logging;
pub mod net;
pub mod onvif;
pub mod playback;
pub mod recorder;
pub mod server;
pub mod utils;

use logging::{LogSink, LogSinkLayer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::{EnvFilter, LevelFilter, Targets};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Install the global subscriber: `RUST_LOG` filtered output on stderr plus
/// every event forwarded into `sink`.
pub fn init_tracing(sink: Arc<LogSink>) -> Result<(), tracing_subscriber::util::TryInitError> {
    subscriber(sink).try_init()
}

// `RUST_LOG` only shapes stderr. The sink sees every level of this crate and
// applies its own level policy; dependencies reach it from Info up.
fn subscriber(sink: Arc<LogSink>) -> impl tracing::Subscriber + Send + Sync {
    let stderr_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "onvif_recorder=info".into());
    let sink_filter = Targets::new()
        .with_target("onvif_recorder", LevelFilter::TRACE)
        .with_default(LevelFilter::INFO);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(stderr_filter),
        )
        .with(LogSinkLayer::new(sink).with_filter(sink_filter))
}

/// Token cancelled on the first SIGINT or SIGTERM
pub fn stop_on_signal() -> CancellationToken {
    let stop = CancellationToken::new();
    let trigger = stop.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });
    stop
}

async fn shutdown_signal() {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => tracing::info!("Received SIGINT, shutting down..."),
                Err(e) => {
                    tracing::error!("Failed to listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to set up SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logging::{LogLevel, LogSinkConfig};
    use std::time::Duration;

    fn sink_with(verbose: bool, dir: &tempfile::TempDir) -> Arc<LogSink> {
        LogSink::new(LogSinkConfig {
            root_dir: dir.path().to_path_buf(),
            app_name: "TracingTest".to_string(),
            flush_interval: Duration::from_secs(3600),
            verbose: Some(verbose),
        })
    }

    #[test]
    fn test_verbose_sink_receives_debug_events() {
        let dir = tempfile::TempDir::new().unwrap();
        let sink = sink_with(true, &dir);
        assert!(sink.is_enabled(LogLevel::Debug));

        tracing::subscriber::with_default(subscriber(sink.clone()), || {
            tracing::debug!("Resolved stream URI");
            tracing::info!("Segment closed");
        });
        assert_eq!(sink.pending(), 2);
    }

    #[test]
    fn test_quiet_sink_drops_debug_events() {
        let dir = tempfile::TempDir::new().unwrap();
        let sink = sink_with(false, &dir);

        tracing::subscriber::with_default(subscriber(sink.clone()), || {
            tracing::debug!("Resolved stream URI");
            tracing::info!("Segment closed");
        });
        assert_eq!(sink.pending(), 1);
    }

    #[test]
    fn test_dependency_debug_events_stay_out_of_sink() {
        let dir = tempfile::TempDir::new().unwrap();
        let sink = sink_with(true, &dir);

        tracing::subscriber::with_default(subscriber(sink.clone()), || {
            tracing::debug!(target: "hyper::proto", "parsed 3 headers");
            tracing::warn!(target: "hyper::proto", "connection reset");
        });
        assert_eq!(sink.pending(), 1);
    }
}
