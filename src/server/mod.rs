//! HTTP stream proxy
//!
//! Serves a live Ogg preview of any camera profile at
//! `GET /api/stream/{ip}/{profile_token}`, plus `GET /health`.

use crate::net::available_port;
use crate::onvif::{StreamType, TransportProtocol};
use crate::playback::Transcoder;
use crate::recorder::StreamSource;
use crate::utils::{error_chain, AppError, AppResult};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::StreamExt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

/// Shared state for proxy handlers
#[derive(Clone)]
pub struct ProxyState {
    pub source: Arc<dyn StreamSource>,
    pub ffmpeg: PathBuf,
    pub stream_type: StreamType,
    pub transport: TransportProtocol,
    pub started: Instant,
    /// Ends open preview bodies so shutdown does not wait on endless streams
    shutdown: CancellationToken,
}

impl ProxyState {
    pub fn new(source: Arc<dyn StreamSource>, ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            source,
            ffmpeg: ffmpeg.into(),
            stream_type: StreamType::default(),
            transport: TransportProtocol::default(),
            started: Instant::now(),
            shutdown: CancellationToken::new(),
        }
    }
}

pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/api/stream/{ip}/{profile_token}", get(stream_profile))
        .route("/health", get(handle_health))
        .with_state(state)
}

async fn handle_health(State(state): State<ProxyState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_secs": state.started.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Transcode a camera profile to Ogg for as long as the client reads
async fn stream_profile(
    State(state): State<ProxyState>,
    Path((ip, profile_token)): Path<(String, String)>,
) -> Response {
    let uri = match state
        .source
        .resolve(&ip, &profile_token, state.stream_type, state.transport)
        .await
    {
        Ok(uri) => uri,
        Err(e) => {
            tracing::warn!(error = &e as &(dyn std::error::Error + 'static), "Cannot resolve stream for {}/{}", ip, profile_token);
            return (StatusCode::BAD_GATEWAY, error_chain(&e).join(": ")).into_response();
        }
    };

    let transcoder = match Transcoder::spawn(&state.ffmpeg, &uri) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = &e as &(dyn std::error::Error + 'static), "Cannot start transcoder for {}", uri);
            return (StatusCode::INTERNAL_SERVER_ERROR, error_chain(&e).join(": ")).into_response();
        }
    };

    tracing::info!("Streaming {}/{} from {}", ip, profile_token, uri);
    let body = ReaderStream::new(transcoder).take_until(state.shutdown.clone().cancelled_owned());

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/ogg")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .unwrap_or_else(|e| {
            tracing::error!("Failed to build response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

/// Bind the proxy listener. `auto` picks the highest free loopback port.
pub async fn bind(addr: &str) -> AppResult<TcpListener> {
    let addr = if addr.eq_ignore_ascii_case("auto") {
        SocketAddr::from((Ipv4Addr::LOCALHOST, available_port()?)).to_string()
    } else {
        addr.to_string()
    };

    TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Server(format!("Failed to bind to {}: {}", addr, e)))
}

/// Serve until `stop` is cancelled. Open preview streams end when it fires.
pub async fn serve(listener: TcpListener, mut state: ProxyState, stop: CancellationToken) -> AppResult<()> {
    state.shutdown = stop.clone();
    let local = listener.local_addr()?;
    tracing::info!("Stream proxy listening on http://{}", local);
    tracing::info!("   Stream: GET http://{}/api/stream/{{ip}}/{{profile_token}}", local);
    tracing::info!("   Health: GET http://{}/health", local);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await
        .map_err(|e| AppError::Server(e.to_string()))?;

    tracing::info!("Stream proxy stopped");
    Ok(())
}
