//! Server configuration loading from file and environment variables.

use chirp_emotion::SchedulerConfig;
use chirp_mq::TransportConfig;
use chirp_pipeline::PipelineConfig;
use chirp_voice::CapabilityConfig;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Queue transport settings.
    #[serde(default)]
    pub transport: TransportSettings,

    /// Voice pipeline worker counts and segmenter tuning.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Report scheduler fire times.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// External capability endpoints.
    #[serde(default)]
    pub capabilities: CapabilityConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Busy timeout for SQLite connections, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "chirp_pipeline=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Queue transport tunables, as written in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportSettings {
    /// Maximum serialized payload size accepted by publish.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    /// Delivery attempts before a message is dead-lettered.
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,

    /// Delay before a nacked message is redelivered, in milliseconds.
    #[serde(default = "default_redelivery_delay_ms")]
    pub redelivery_delay_ms: u64,
}

impl TransportSettings {
    /// Converts file-level settings into the transport's config type.
    pub fn to_transport_config(&self) -> TransportConfig {
        TransportConfig {
            max_payload_bytes: self.max_payload_bytes,
            max_delivery_attempts: self.max_delivery_attempts,
            redelivery_delay: std::time::Duration::from_millis(self.redelivery_delay_ms),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "chirp.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_payload_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_max_delivery_attempts() -> u32 {
    5
}

fn default_redelivery_delay_ms() -> u64 {
    2_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload_bytes(),
            max_delivery_attempts: default_max_delivery_attempts(),
            redelivery_delay_ms: default_redelivery_delay_ms(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `CHIRP_HOST` overrides `server.host`
/// - `CHIRP_PORT` overrides `server.port`
/// - `CHIRP_DB_PATH` overrides `database.path`
/// - `CHIRP_LOG_LEVEL` overrides `logging.level`
/// - `CHIRP_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("CHIRP_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("CHIRP_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(db_path) = std::env::var("CHIRP_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("CHIRP_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("CHIRP_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    Ok(config)
}
