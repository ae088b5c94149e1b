//! Skyview MJPEG streaming server

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use skyview::capture::V4l2Opener;
use skyview::pipeline::{FrameSlot, ProducerHandle, StopOutcome, DEFAULT_STOP_TIMEOUT};
use skyview::server::{self, AppState};
use skyview::Config;

#[derive(Parser, Debug)]
#[command(author, version, about = "MJPEG streaming server with simulation fallback")]
struct Args {
    /// Optional TOML config file
    #[arg(long, env = "SKYVIEW_CONFIG")]
    config: Option<PathBuf>,
    /// Host address
    #[arg(long, env = "SKYVIEW_HOST")]
    host: Option<String>,
    /// Port to bind the MJPEG server
    #[arg(long, env = "MJPEG_PORT")]
    port: Option<u16>,
    /// Camera index
    #[arg(long, env = "SKYVIEW_CAMERA")]
    camera: Option<usize>,
    /// Capture rate for the capture/simulation loop
    #[arg(long, env = "SKYVIEW_FPS")]
    fps: Option<f64>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    /// JPEG quality (1-100)
    #[arg(long)]
    quality: Option<u8>,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(camera) = self.camera {
            config.capture.device_index = camera;
        }
        if let Some(fps) = self.fps {
            config.capture.fps = fps;
        }
        if let Some(width) = self.width {
            config.capture.width = width;
        }
        if let Some(height) = self.height {
            config.capture.height = height;
        }
        if let Some(quality) = self.quality {
            config.capture.quality = quality;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("skyview=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref()).wrap_err("Failed to load config")?;
    args.apply(&mut config);
    config.validate()?;

    info!("Skyview launching...");

    let bind = (config.server.host.as_str(), config.server.port);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .wrap_err_with(|| format!("Failed to bind to {}:{}", bind.0, bind.1))?;

    let slot = Arc::new(FrameSlot::new());
    let mut producer = ProducerHandle::start(config.capture.clone(), V4l2Opener, Arc::clone(&slot))?;

    let state = AppState::new(
        slot,
        producer.mode_probe(),
        Duration::from_millis(config.server.empty_backoff_ms),
    );

    tokio::select! {
        res = server::serve(listener, state) => res?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
    }

    let outcome = tokio::task::spawn_blocking(move || producer.stop(DEFAULT_STOP_TIMEOUT)).await?;
    if outcome != StopOutcome::Stopped {
        warn!("Producer shutdown incomplete: {:?}", outcome);
    }

    info!("Skyview shutting down");
    Ok(())
}
