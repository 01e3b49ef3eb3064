//! Mock server configuration
//!
//! Loads server, broadcast and announcer settings from a TOML file and
//! merges command line overrides on top.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Default WebSocket port
pub const DEFAULT_WS_PORT: u16 = 8081;
/// Default WebSocket endpoint path
pub const DEFAULT_WS_PATH: &str = "/ws";
/// Default UDP broadcast port
pub const DEFAULT_BROADCAST_PORT: u16 = 2505;
/// Default tick interval for a `start` request without `interval`
pub const DEFAULT_BROADCAST_INTERVAL_MS: u64 = 10_000;
/// Default template for a `start` request without `message`
pub const DEFAULT_BROADCAST_MESSAGE: &str = r#"{"url":"ws://10.100.102.67:8081/ws"}"#;
/// Default interval of the server-address announcer
pub const DEFAULT_ANNOUNCE_INTERVAL_MS: u64 = 2_000;

/// Errors that can occur during config operations
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// `[server]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Port to listen on
    #[serde(default = "default_ws_port")]
    pub port: u16,
    /// Path the WebSocket upgrade is accepted on
    #[serde(default = "default_ws_path")]
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_ws_port(),
            path: default_ws_path(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// `[broadcast]` section: fallbacks for fields a `start` request leaves null
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BroadcastDefaults {
    #[serde(default = "default_broadcast_interval")]
    pub interval_ms: u64,
    #[serde(default = "default_broadcast_port")]
    pub port: u16,
    #[serde(default = "default_broadcast_message")]
    pub message: String,
    /// Datagram destination, normally the limited broadcast address
    #[serde(default = "default_broadcast_address")]
    pub address: Ipv4Addr,
}

impl Default for BroadcastDefaults {
    fn default() -> Self {
        Self {
            interval_ms: default_broadcast_interval(),
            port: default_broadcast_port(),
            message: default_broadcast_message(),
            address: default_broadcast_address(),
        }
    }
}

/// `[announcer]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnnouncerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_broadcast_port")]
    pub port: u16,
    #[serde(default = "default_announce_interval")]
    pub interval_ms: u64,
}

impl Default for AnnouncerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_broadcast_port(),
            interval_ms: default_announce_interval(),
        }
    }
}

/// `[mock]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MockBehaviour {
    /// Answer API requests locally when no peer is connected to relay them to
    #[serde(default)]
    pub auto_reply: bool,
}

/// Root configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MockConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub broadcast: BroadcastDefaults,
    #[serde(default)]
    pub announcer: AnnouncerConfig,
    #[serde(default)]
    pub mock: MockBehaviour,
}

/// Command line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub announce: bool,
    pub auto_reply: bool,
}

impl MockConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// no path is given or the file does not exist
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        if !path.exists() {
            info!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        info!("Loading config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: MockConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command line overrides
    pub fn apply_overrides(mut self, cli: CliOverrides) -> Self {
        if let Some(bind) = cli.bind {
            self.server.bind = bind;
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if cli.announce {
            self.announcer.enabled = true;
        }
        if cli.auto_reply {
            self.mock.auto_reply = true;
        }
        self
    }

    fn validate(&self) -> ConfigResult<()> {
        if !self.server.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "server.path must start with '/', got {:?}",
                self.server.path
            )));
        }
        if self.broadcast.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "broadcast.interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.announcer.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "announcer.interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_ws_port() -> u16 {
    DEFAULT_WS_PORT
}

fn default_ws_path() -> String {
    DEFAULT_WS_PATH.to_string()
}

fn default_broadcast_interval() -> u64 {
    DEFAULT_BROADCAST_INTERVAL_MS
}

fn default_broadcast_port() -> u16 {
    DEFAULT_BROADCAST_PORT
}

fn default_broadcast_message() -> String {
    DEFAULT_BROADCAST_MESSAGE.to_string()
}

fn default_broadcast_address() -> Ipv4Addr {
    Ipv4Addr::BROADCAST
}

fn default_announce_interval() -> u64 {
    DEFAULT_ANNOUNCE_INTERVAL_MS
}
