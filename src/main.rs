//! # Audio Stream Server - Main Application Entry Point
//!
//! Accepts a continuous audio stream from one authorized client at a time over
//! a WebSocket connection and appends it to a sink file.
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML file + environment variables)
//! - **error**: Protocol and sink error types
//! - **state**: Shared application state and stream metrics
//! - **stream**: The session protocol (sink, session, codec, dispatcher)
//! - **websocket**: One actor per WebSocket connection
//! - **server**: Listener setup and routing
//! - **health**: Health report endpoint
//! - **middleware**: Request logging

mod config;     // Configuration management (config.rs)
mod error;      // Error types (error.rs)
mod health;     // Health endpoint (health.rs)
mod middleware; // Custom middleware (middleware/ directory)
mod server;     // HTTP listener and routes (server.rs)
mod state;      // Application state management (state.rs)
mod stream;     // Streaming protocol (stream/ directory)
mod websocket;  // WebSocket connection actor (websocket.rs)

use anyhow::{Context, Result};
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use stream::sink::FileSink;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal, set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging**
/// 3. **Opens the audio sink**, truncating it once when configured to
/// 4. **Starts the server** and waits for it to exit or for a shutdown signal
#[actix_web::main]
async fn main() -> Result<()> {
    // It's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting audio-stream-server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.server.host,
        port = config.server.port,
        ws_path = %config.server.ws_path,
        lock_scope = ?config.stream.lock_scope,
        "Configuration loaded"
    );

    let sink = FileSink::open(&config.stream.sink_path, config.stream.truncate_on_start)
        .with_context(|| format!("Failed to open audio sink at {}", config.stream.sink_path))?;
    info!(path = %sink.path().display(), "Audio sink ready");

    let app_state = AppState::new(config, Arc::new(sink));

    setup_signal_handlers();

    let (server, addrs) = server::bind(app_state)?;
    for addr in &addrs {
        info!("WebSocket server is listening on ws://{}", addr);
    }

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Wait for either the server to finish OR a shutdown signal
    tokio::select! {
        result = server_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g. "debug", "audio_stream_server=trace")
/// - If not set, defaults to "audio_stream_server=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audio_stream_server=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Listen for SIGTERM / SIGINT and set the global shutdown flag.
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                return;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(sigint) => sigint,
            Err(e) => {
                error!("Failed to install SIGINT handler: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Wait for the shutdown signal to be set.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
