//! TOML-based settings persistence for the guest client.
//!
//! Reads and writes [`ClientConfig`] to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\RemBraille\config.toml`
//! - Linux:    `$XDG_CONFIG_HOME/rembraille/config.toml` (or `~/.config/…`)
//! - macOS:    `~/Library/Application Support/RemBraille/config.toml`
//!
//! ```toml
//! log_level = "info"
//!
//! [connection]
//! host = "10.0.2.2"
//! port = 17635
//! auto_connect = true
//!
//! [timing]
//! ping_interval_ms = 5000
//!
//! [state.last_connected]
//! host = "10.0.2.2"
//! port = 17635
//! ```
//!
//! Every field has a serde default, so a missing file, an empty file and a
//! file written by an older version all load.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rembraille_core::protocol::messages::DEFAULT_PORT;
use rembraille_core::Endpoint;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::infrastructure::discovery::DiscoveryConfig;
use crate::infrastructure::network::NetworkConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level client settings stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub timing: TimingSettings,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub state: PersistedState,
}

/// Where and whether to connect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSettings {
    /// Fixed host address; bypasses discovery when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<IpAddr>,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connect as soon as the session starts.
    #[serde(default = "default_true")]
    pub auto_connect: bool,
    /// Full passes over the candidates before giving up; absent retries forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Name sent to the host in the handshake.
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

/// Timeouts and intervals, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimingSettings {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_pong_timeout_ms")]
    pub pong_timeout_ms: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoverySettings {
    #[serde(default = "default_ceiling_ms")]
    pub ceiling_ms: u64,
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub subnet_scan: bool,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

/// Values written back by the client itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersistedState {
    /// Endpoint of the last session that reached Connected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<Endpoint>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_true() -> bool {
    true
}
fn default_client_name() -> String {
    NetworkConfig::default().client_name
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_handshake_timeout_ms() -> u64 {
    5_000
}
fn default_ping_interval_ms() -> u64 {
    5_000
}
fn default_pong_timeout_ms() -> u64 {
    10_000
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_backoff_cap_ms() -> u64 {
    30_000
}
fn default_ceiling_ms() -> u64 {
    3_000
}
fn default_step_timeout_ms() -> u64 {
    1_000
}
fn default_probe_timeout_ms() -> u64 {
    200
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            auto_connect: default_true(),
            max_retries: None,
            client_name: default_client_name(),
        }
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            pong_timeout_ms: default_pong_timeout_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            ceiling_ms: default_ceiling_ms(),
            step_timeout_ms: default_step_timeout_ms(),
            subnet_scan: default_true(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl ClientConfig {
    /// The configured host, if discovery should be bypassed.
    pub fn host_override(&self) -> Option<Endpoint> {
        self.connection
            .host
            .map(|host| Endpoint::new(host, self.connection.port))
    }

    pub fn network_config(&self) -> NetworkConfig {
        let t = &self.timing;
        NetworkConfig {
            client_name: self.connection.client_name.clone(),
            connect_timeout: Duration::from_millis(t.connect_timeout_ms),
            handshake_timeout: Duration::from_millis(t.handshake_timeout_ms),
            ping_interval: Duration::from_millis(t.ping_interval_ms),
            pong_timeout: Duration::from_millis(t.pong_timeout_ms),
            backoff_base: Duration::from_millis(t.backoff_base_ms),
            backoff_cap: Duration::from_millis(t.backoff_cap_ms),
            max_retries: self.connection.max_retries,
            ..NetworkConfig::default()
        }
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        let d = &self.discovery;
        DiscoveryConfig {
            port: self.connection.port,
            ceiling: Duration::from_millis(d.ceiling_ms),
            step_timeout: Duration::from_millis(d.step_timeout_ms),
            subnet_scan: d.subnet_scan,
            probe_timeout: Duration::from_millis(d.probe_timeout_ms),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// A config file at a fixed path.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The store at `<platform config dir>/config.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config
    /// base directory cannot be determined from the environment.
    pub fn platform_default() -> Result<Self, ConfigError> {
        let dir = platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)?;
        Ok(Self::at(dir.join("config.toml")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the settings, returning defaults if the file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] for file-system errors other than "not found",
    /// and [`ConfigError::Parse`] if the TOML is malformed.
    pub fn load(&self) -> Result<ClientConfig, ConfigError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no config file; using defaults");
                Ok(ClientConfig::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Writes `config`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] for file-system failures or
    /// [`ConfigError::Serialize`] if serialization fails.
    pub fn save(&self, config: &ClientConfig) -> Result<(), ConfigError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(config)?;
        std::fs::write(&self.path, content).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Resolves the platform config directory including the app subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("RemBraille"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("rembraille"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("RemBraille")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
