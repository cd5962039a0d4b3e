//! Configuration types for lisp-etr
//!
//! Configuration is loaded from a JSON file and validated at startup. Every
//! section has defaults, so an empty object is a valid configuration.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::DEFAULT_SNAPLEN;
use crate::error::ConfigError;
use crate::keys::{KeySet, RlocKeys};
use crate::uplink::Uplink;

/// Standard LISP data port
pub const LISP_DATA_PORT: u16 = 4341;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Direct UDP ingress
    #[serde(default)]
    pub direct: DirectConfig,

    /// Link captures for NAT return traffic
    #[serde(default)]
    pub capture: CaptureConfig,

    /// IPC configuration
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Uplinks known at startup
    #[serde(default)]
    pub uplinks: Vec<Uplink>,

    /// Decapsulation keys known at startup
    #[serde(default)]
    pub decap_keys: Vec<RlocKeys>,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.direct.validate()?;
        self.capture.validate()?;
        self.ipc.validate()?;
        self.log.validate()?;

        let mut names: HashSet<&str> = HashSet::new();
        for uplink in &self.uplinks {
            if uplink.name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "Uplink name cannot be empty".into(),
                ));
            }
            if !names.insert(&uplink.name) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate uplink: {}",
                    uplink.name
                )));
            }
        }

        for entry in &self.decap_keys {
            KeySet::from_entries(&entry.keys).map_err(|e| {
                ConfigError::ValidationError(format!("Invalid keys for RLOC {}: {e}", entry.rloc))
            })?;
        }

        Ok(())
    }

    /// Create a minimal default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self::default()
    }
}

/// Direct UDP ingress configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DirectConfig {
    /// Run the direct listener
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Listen address
    #[serde(default = "default_direct_listen")]
    pub listen: SocketAddr,

    /// Delay before re-binding after a failure, in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl DirectConfig {
    /// Validate direct ingress configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_backoff_ms == 0 {
            return Err(ConfigError::ValidationError(
                "direct.retry_backoff_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Retry backoff as Duration
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_direct_listen(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Link capture configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    /// Source port of LISP data sent by peers
    #[serde(default = "default_tunnel_port")]
    pub tunnel_port: u16,

    /// Bytes kept per captured frame
    #[serde(default = "default_snaplen")]
    pub snaplen: u32,

    /// Ephemeral port, if already known at startup
    #[serde(default)]
    pub ephemeral_port: Option<u16>,
}

impl CaptureConfig {
    /// Validate capture configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tunnel_port == 0 {
            return Err(ConfigError::ValidationError(
                "capture.tunnel_port must be greater than 0".into(),
            ));
        }
        if self.ephemeral_port == Some(0) {
            return Err(ConfigError::ValidationError(
                "capture.ephemeral_port must be greater than 0".into(),
            ));
        }
        // Ethernet + IPv6 + UDP + LISP header
        if self.snaplen < 70 {
            return Err(ConfigError::ValidationError(format!(
                "capture.snaplen {} is too small",
                self.snaplen
            )));
        }
        Ok(())
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            tunnel_port: LISP_DATA_PORT,
            snaplen: DEFAULT_SNAPLEN,
            ephemeral_port: None,
        }
    }
}

/// IPC server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpcConfig {
    /// Path to Unix socket
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Socket file mode (octal, e.g., 0o660)
    #[serde(default = "default_socket_mode")]
    pub socket_mode: u32,

    /// Enable IPC server
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum message size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl IpcConfig {
    /// Validate IPC configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "IPC socket path cannot be empty when IPC is enabled".into(),
            ));
        }

        if self.max_message_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_message_size must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            socket_mode: default_socket_mode(),
            enabled: true,
            max_message_size: default_max_message_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl LogConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Unknown log level: {other}"
                )))
            }
        }
        match self.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(ConfigError::ValidationError(format!(
                "Unknown log format: {other}"
            ))),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: true,
        }
    }
}

const fn default_true() -> bool {
    true
}

fn default_direct_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], LISP_DATA_PORT))
}

const fn default_retry_backoff_ms() -> u64 {
    2000
}

const fn default_tunnel_port() -> u16 {
    LISP_DATA_PORT
}

const fn default_snaplen() -> u32 {
    DEFAULT_SNAPLEN
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/var/run/lisp-etr.sock")
}

const fn default_socket_mode() -> u32 {
    0o660
}

const fn default_max_message_size() -> usize {
    1024 * 1024
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}
