//! TOML-based configuration for the SerialChat peer.
//!
//! Reads and writes [`AppConfig`] to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\SerialChat\config.toml`
//! - Linux:    `~/.config/serialchat/config.toml`
//! - macOS:    `~/Library/Application Support/SerialChat/config.toml`
//!
//! ```toml
//! [node]
//! display_name = "desk"
//! log_level = "info"
//!
//! [transport]
//! bind_address = "0.0.0.0"
//! port = 27100
//!
//! [permissions]
//! scan = true
//! connect = true
//!
//! [[peers]]
//! name = "laptop"
//! address = "192.168.1.20:27100"
//! ```
//!
//! Every field has a serde default, so a missing file, a missing section, or
//! a missing key all fall back to working values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serialchat_core::PeerIdentity;
use thiserror::Error;

use crate::application::permissions::{Capability, PermissionOracle};

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

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
    /// Bonded peers.  These form the paired set.
    #[serde(default)]
    pub peers: Vec<PeerEntry>,
}

/// Settings about the local node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// Name the adapter reports.  Absent means outgoing messages carry
    /// `"Unknown name"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// TCP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    /// IP address the listener binds.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Time an accepted connection has to complete the service handshake.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Connect timeout used when probing peers during discovery.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

/// Capabilities granted to the peer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PermissionsConfig {
    #[serde(default = "default_true")]
    pub scan: bool,
    #[serde(default = "default_true")]
    pub connect: bool,
}

/// A bonded peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerEntry {
    pub name: String,
    /// `host:port` of the peer's listener.
    pub address: String,
}

/// Socket timeouts must be non-zero; `0` in the file is raised to this.
pub const MIN_TIMEOUT_MS: u64 = 1;

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    27100
}
fn default_handshake_timeout_ms() -> u64 {
    2000
}
fn default_probe_timeout_ms() -> u64 {
    500
}
fn default_true() -> bool {
    true
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            display_name: None,
            log_level: default_log_level(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            scan: default_true(),
            connect: default_true(),
        }
    }
}

impl TransportConfig {
    /// `bind_address:port` of the local listener.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Handshake timeout, at least [`MIN_TIMEOUT_MS`].
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms.max(MIN_TIMEOUT_MS))
    }

    /// Probe timeout, at least [`MIN_TIMEOUT_MS`].
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.max(MIN_TIMEOUT_MS))
    }
}

impl AppConfig {
    /// The configured peers as identities.
    pub fn bonded_peers(&self) -> Vec<PeerIdentity> {
        self.peers
            .iter()
            .map(|p| PeerIdentity::new(p.name.clone(), p.address.clone()))
            .collect()
    }
}

// ── Permission oracle ─────────────────────────────────────────────────────────

/// Capability oracle backed by the `[permissions]` table.
#[derive(Debug, Clone, Copy)]
pub struct ConfigPermissions {
    granted: PermissionsConfig,
}

impl ConfigPermissions {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            granted: config.permissions,
        }
    }
}

impl PermissionOracle for ConfigPermissions {
    fn has_capability(&self, capability: Capability) -> bool {
        match capability {
            Capability::Scan => self.granted.scan,
            Capability::Connect => self.granted.connect,
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the config from the platform path.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads the config from `path`, returning `AppConfig::default()` if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to the platform path.
///
/// # Errors
///
/// See [`save_config_to`].
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &config_file_path()?)
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory including the app subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("SerialChat"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("serialchat"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("SerialChat")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
