//! Jumbotron HTTP + WebSocket server
//!
//! Runs on the Pi next to the LED strip. Any device on the LAN can paint
//! pixels, upload images and GIFs, manage snapshots and watch the display
//! live over a WebSocket.
//!
//! ## Architecture
//! - **Matrix** (strip lock + buffer lock): every mutation is pushed to the LEDs;
//!   readers only wait for the buffer copy, never for the push
//! - **Playback thread** (std::thread): paced video loop, one at a time
//! - **Broadcast task** (tokio): polls the matrix for stream clients
//! - **HTTP server** (tokio/axum): handlers call into the blocking pool
//!
//! ## Usage
//! ```sh
//! sudo ./target/release/jumbotron --rows 48 --columns 64 --port 5000
//! ```

use clap::Parser;
use jumbotron::broadcast::FrameBroadcaster;
use jumbotron::config::Config;
use jumbotron::matrix::Matrix;
use jumbotron::persistence::{FileStateStore, SnapshotStore};
use jumbotron::playback::{PlaybackController, SystemClock};
use jumbotron::server::{self, AppState};
use jumbotron::service::Jumbotron;
use jumbotron::setup_shutdown_signal;
use jumbotron::strip::open_strip;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(false) // Disable ANSI color codes for systemd/journald
        .compact()
        .init();

    let config = Config::parse();
    let panel = config.panel();

    tracing::info!("Jumbotron server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Panel: {} rows x {} columns", panel.rows, panel.cols);
    tracing::info!("Saves dir: {}", config.saves_dir.display());
    tracing::info!("State file: {}", config.state_file.display());
    tracing::info!("Port: {}", config.port);

    let strip = open_strip(panel, config.strip_options(), config.mock);
    let matrix = match Matrix::new(panel, strip) {
        Ok(matrix) => Arc::new(matrix),
        Err(e) => {
            tracing::error!("Cannot initialise the LED matrix: {}", e);
            std::process::exit(1);
        }
    };

    let playback = PlaybackController::new(
        matrix.clone(),
        config.video_fps,
        Arc::new(SystemClock::new()),
    );
    let broadcaster = Arc::new(FrameBroadcaster::new(
        matrix.clone(),
        config.updates_per_second,
    ));
    let jumbotron = Arc::new(Jumbotron::new(
        matrix,
        playback,
        broadcaster,
        Box::new(FileStateStore::new(&config.state_file)),
        SnapshotStore::new(&config.saves_dir),
        config.default_brightness,
    ));

    let restore = jumbotron.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || restore.restore_last_state()).await {
        tracing::warn!("Restoring last state failed: {}", e);
    }

    let shutdown = match setup_shutdown_signal() {
        Ok(notify) => Some(notify),
        Err(e) => {
            tracing::warn!("Cannot install Ctrl+C handler: {}", e);
            None
        }
    };

    let app = server::create_router(AppState {
        jumbotron: jumbotron.clone(),
    });

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Listening on http://{}", addr);
    tracing::info!("API Documentation: http://localhost:{}/docs", config.port);
    tracing::info!("Try: curl http://localhost:{}/jumbotron", config.port);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            match shutdown {
                Some(notify) => notify.notified().await,
                None => std::future::pending::<()>().await,
            }
            tracing::info!("Shutting down");
        })
        .await;
    if let Err(e) = served {
        tracing::error!("Server error: {}", e);
    }

    let _ = tokio::task::spawn_blocking(move || jumbotron.shutdown()).await;
}
