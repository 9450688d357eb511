//! onvif-recorder - inspect and record ONVIF cameras
//!
//! Subcommands:
//! - `onvif-recorder capabilities -i <ip>` - device capabilities as JSON
//! - `onvif-recorder profiles -i <ip>` - media profiles as JSON
//! - `onvif-recorder uri -i <ip> -p <token>` - a fresh stream URI
//! - `onvif-recorder record -i <ip> -p <token> -o <dir>` - segmented recording until Ctrl-C
//! - `onvif-recorder serve` - HTTP preview proxy

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use onvif_recorder::config::Settings;
use onvif_recorder::logging::{LogSink, LogSinkConfig};
use onvif_recorder::onvif::{OnvifClient, StreamType, TransportProtocol};
use onvif_recorder::playback::FfmpegSink;
use onvif_recorder::recorder::{OrchestratorOptions, RecordingOrchestrator, RecordingParameters, RecordingSession};
use onvif_recorder::server::{self, ProxyState};
use onvif_recorder::utils::AppResult;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "onvif-recorder")]
#[command(about = "Get info about and record video from ONVIF-compliant cameras.")]
#[command(version)]
struct Cli {
    /// Timeout for each ONVIF request, in seconds
    #[arg(long, global = true, default_value = "10")]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CameraArgs {
    /// The IP address of the ONVIF-compliant camera
    #[arg(short, long)]
    ip: String,
}

#[derive(Args)]
struct StreamArgs {
    /// The token string for a media profile, as listed by `profiles`
    #[arg(short, long)]
    profile_token: String,

    /// The stream type to request when creating a new streaming URI
    #[arg(short, long, value_enum, default_value_t = StreamType::Unicast)]
    stream_type: StreamType,

    /// The transport protocol to request when creating a new streaming URI
    #[arg(short, long, value_enum, default_value_t = TransportProtocol::Rtsp)]
    transport: TransportProtocol,
}

#[derive(Subcommand)]
enum Commands {
    /// Output the capabilities of a camera in JSON format
    Capabilities {
        #[command(flatten)]
        camera: CameraArgs,
    },

    /// Output the media profiles of a camera in JSON format
    Profiles {
        #[command(flatten)]
        camera: CameraArgs,
    },

    /// Retrieve and output a new media URI
    Uri {
        #[command(flatten)]
        camera: CameraArgs,

        #[command(flatten)]
        stream: StreamArgs,
    },

    /// Record from a streaming URI to the file system
    Record {
        #[command(flatten)]
        camera: CameraArgs,

        #[command(flatten)]
        stream: StreamArgs,

        /// The output directory where recordings will be saved, organized by date
        #[arg(short, long)]
        output_dir: PathBuf,

        /// Segment length in minutes
        #[arg(long)]
        rotation_minutes: Option<u64>,

        /// Wait between failed attempts, in seconds
        #[arg(long)]
        retry_backoff_secs: Option<u64>,
    },

    /// Serve live Ogg previews over HTTP
    Serve {
        /// Listen address, or `auto` for the highest free loopback port
        #[arg(short, long)]
        bind: Option<String>,

        /// The stream type to request for previews
        #[arg(short, long, value_enum, default_value_t = StreamType::Unicast)]
        stream_type: StreamType,

        /// The transport protocol to request for previews
        #[arg(short, long, value_enum, default_value_t = TransportProtocol::Rtsp)]
        transport: TransportProtocol,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = settings_for(&cli.command).context("Invalid configuration")?;

    let log = LogSink::new(LogSinkConfig::from(&settings));
    log.start();
    onvif_recorder::init_tracing(log.clone()).context("Failed to install tracing subscriber")?;

    tracing::info!("Starting ONVIF Recorder v{}", env!("CARGO_PKG_VERSION"));

    let client = OnvifClient::new(Duration::from_secs(cli.timeout_secs))?;
    let result = run(cli.command, &settings, client, log.clone()).await;

    if let Err(e) = &result {
        log.logger("onvif_recorder::cli")
            .error(format!("Command failed [{}]", e.code()), e);
    }
    log.shutdown().await;
    Ok(result?)
}

/// Defaults, then `ONVIF_RECORDER_*`, then the recording flags
fn settings_for(command: &Commands) -> AppResult<Settings> {
    let mut settings = Settings::from_env()?;
    if let Commands::Record {
        rotation_minutes,
        retry_backoff_secs,
        ..
    } = command
    {
        if let Some(minutes) = rotation_minutes {
            settings.rotation_interval = Duration::from_secs(minutes * 60);
        }
        if let Some(secs) = retry_backoff_secs {
            settings.retry_backoff = Duration::from_secs(*secs);
        }
        settings.validate()?;
    }
    Ok(settings)
}

async fn run(command: Commands, settings: &Settings, client: OnvifClient, log: Arc<LogSink>) -> AppResult<()> {
    match command {
        Commands::Capabilities { camera } => {
            let capabilities = client.capabilities(&camera.ip).await?;
            println!("###### Device Capabilities ######");
            println!("{}", serde_json::to_string_pretty(&capabilities)?);
            println!("#### End Device Capabilities ####");
        }
        Commands::Profiles { camera } => {
            let profiles = client.profiles(&camera.ip).await?;
            println!("###### Media Profiles ######");
            println!("{}", serde_json::to_string_pretty(&profiles)?);
            println!("#### End Media Profiles ####");
        }
        Commands::Uri { camera, stream } => {
            let media_uri = client
                .stream_uri(&camera.ip, &stream.profile_token, stream.stream_type, stream.transport)
                .await?;
            println!("###### Streaming Uri ######");
            println!("{}", media_uri.uri);
            println!("#### End Streaming Uri ####");
        }
        Commands::Record {
            camera,
            stream,
            output_dir,
            ..
        } => {
            let params = RecordingParameters {
                target_address: camera.ip,
                profile_token: stream.profile_token,
                stream_type: stream.stream_type,
                transport: stream.transport,
                output_root: output_dir,
            };
            let session = RecordingSession::new(
                Arc::new(client),
                Arc::new(FfmpegSink::from_settings(settings)),
                log.clone(),
            );
            let orchestrator = RecordingOrchestrator::new(session, log, OrchestratorOptions::from(settings));
            let stop = onvif_recorder::stop_on_signal();

            println!("###### Recording Stream ######");
            let summary = orchestrator.run(&params, &stop).await;
            println!("#### End Recording Stream ####");

            tracing::info!(
                "Recorded {} segments ({} failed attempts)",
                summary.segments_completed,
                summary.failed_attempts
            );
        }
        Commands::Serve {
            bind,
            stream_type,
            transport,
        } => {
            let bind = bind.unwrap_or_else(|| settings.http_bind.clone());
            let listener = server::bind(&bind).await?;
            let mut state = ProxyState::new(Arc::new(client), &settings.ffmpeg_path);
            state.stream_type = stream_type;
            state.transport = transport;

            server::serve(listener, state, onvif_recorder::stop_on_signal()).await?;
        }
    }

    Ok(())
}
