//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - Default values (built into the code)
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` environment variables (deployment platforms)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_STREAM__SINK_PATH`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys are separated by a double underscore so that snake_case field
//! names survive: `APP_STREAM__LOCK_SCOPE=server` sets `stream.lock_scope`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub connection: ConnectionConfig,
}

/// Listener settings.
///
/// ## Fields:
/// - `host`: address to bind (`0.0.0.0` accepts connections from the LAN,
///   which the capture page on another device needs)
/// - `port`: TCP port for WebSocket upgrades and `/health`
/// - `ws_path`: path the WebSocket upgrade is served on
/// - `workers`: number of actix worker threads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub ws_path: String,
    pub workers: usize,
}

/// Where the lock that gates audio lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockScope {
    /// One independent lock per connection
    Connection,
    /// One lock shared by every connection
    Server,
}

/// Audio stream settings.
///
/// ## Fields:
/// - `sink_path`: file that received audio is appended to
/// - `truncate_on_start`: empty the sink file once at startup
/// - `lock_scope`: `connection` or `server`
/// - `binary_frames_are_audio`: treat every binary frame as audio without
///   trying to parse it as a control message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub sink_path: String,
    pub truncate_on_start: bool,
    pub lock_scope: LockScope,
    pub binary_frames_are_audio: bool,
}

/// Per-connection limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Interval between WebSocket ping frames
    pub heartbeat_interval_secs: u64,
    /// Connection is dropped when nothing arrives for this long
    pub client_timeout_secs: u64,
    /// Largest accepted message, single frame or reassembled from
    /// fragments. Larger messages close the connection with code 1009.
    pub max_frame_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8001,
                ws_path: "/".to_string(),
                workers: 2,
            },
            stream: StreamConfig {
                sink_path: "tmp.webm".to_string(),
                truncate_on_start: true,
                lock_scope: LockScope::Connection,
                binary_frames_are_audio: true,
            },
            connection: ConnectionConfig {
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
                max_frame_bytes: 1024 * 1024, // 1 MiB
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from `config.toml` (optional) and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from("config")
    }

    /// Load configuration using `file` as the optional configuration file.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=9001`: Override server port
    /// - `APP_STREAM__SINK_PATH=/data/result.dat`: Override sink file
    /// - `HOST=0.0.0.0`, `PORT=9001`: Deployment platform overrides
    pub fn load_from(file: &str) -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name(file).required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if !self.server.ws_path.starts_with('/') {
            return Err(anyhow::anyhow!("WebSocket path must start with '/'"));
        }

        if self.server.workers == 0 {
            return Err(anyhow::anyhow!("Worker count must be greater than 0"));
        }

        if self.stream.sink_path.trim().is_empty() {
            return Err(anyhow::anyhow!("Sink path cannot be empty"));
        }

        if self.connection.heartbeat_interval_secs == 0 {
            return Err(anyhow::anyhow!("Heartbeat interval must be greater than 0"));
        }

        if self.connection.client_timeout_secs <= self.connection.heartbeat_interval_secs {
            return Err(anyhow::anyhow!(
                "Client timeout must be longer than the heartbeat interval"
            ));
        }

        if self.connection.max_frame_bytes == 0 {
            return Err(anyhow::anyhow!("Max frame size must be greater than 0"));
        }

        Ok(())
    }
}
