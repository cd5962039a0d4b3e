//! IPC Protocol definitions
//!
//! Commands mirror the control messages the LISP control plane sends to the
//! dataplane: the uplink set, the NAT ephemeral port and per-RLOC decap keys.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use crate::ingress::IngressStatsSnapshot;
use crate::keys::DecapKeyEntry;
use crate::stats::DecapStatsSnapshot;
use crate::uplink::{RegistrySnapshot, Uplink};

/// IPC command types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcCommand {
    /// Ping to check if the server is alive
    Ping,

    /// Get server status
    Status,

    /// Get decapsulation counters
    GetStats,

    /// Replace the uplink set
    SetUplinks {
        /// Full uplink set; uplinks missing here are torn down
        uplinks: Vec<Uplink>,
    },

    /// Set the ephemeral port NAT return traffic arrives on
    SetEphemeralPort {
        /// Destination port of return traffic (non-zero)
        port: u16,
    },

    /// Install or replace the decap keys for one RLOC
    SetDecapKeys {
        /// Remote RLOC the keys apply to
        rloc: IpAddr,
        /// Hex-encoded key material per key id
        keys: Vec<DecapKeyEntry>,
    },

    /// Remove the decap keys for one RLOC
    RemoveDecapKeys {
        /// Remote RLOC
        rloc: IpAddr,
    },

    /// Initiate graceful shutdown
    Shutdown,
}

/// IPC response types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Pong response to ping
    Pong,

    /// Server status
    Status(ServerStatus),

    /// Decapsulation counters
    Stats(StatsResponse),

    /// Success response (for commands that don't return data)
    Success {
        /// Optional message
        message: Option<String>,
    },

    /// Error response
    Error(IpcErrorResponse),
}

impl IpcResponse {
    /// Create a success response
    pub fn success() -> Self {
        Self::Success { message: None }
    }

    /// Create a success response with message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success {
            message: Some(msg.into()),
        }
    }

    /// Create an error response
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(IpcErrorResponse {
            code,
            message: message.into(),
        })
    }

    /// Check if this is an error response
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Server status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    /// Server version
    pub version: String,

    /// Uptime in seconds
    pub uptime_secs: u64,

    /// Link captures and the current ephemeral port
    pub registry: RegistrySnapshot,

    /// Number of RLOCs with decap keys
    pub rlocs_with_keys: usize,

    /// Preferred IPv4 source address
    pub preferred_v4: Option<Ipv4Addr>,

    /// Preferred IPv6 source address
    pub preferred_v6: Option<Ipv6Addr>,

    /// Direct listener address, if running
    pub direct_listen: Option<String>,

    /// Whether shutdown has been requested
    pub shutting_down: bool,
}

/// Counters returned by `get_stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    /// Decapsulation outcome counters
    pub decap: DecapStatsSnapshot,

    /// Direct ingress counters, if the listener runs
    pub direct: Option<IngressStatsSnapshot>,
}

/// Error response details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcErrorResponse {
    /// Error code
    pub code: ErrorCode,

    /// Error message
    pub message: String,
}

/// IPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Invalid command
    InvalidCommand,
    /// Invalid parameters
    InvalidParameters,
    /// Resource not found
    NotFound,
    /// Server is shutting down
    ShuttingDown,
    /// Internal error
    InternalError,
}

/// Message framing for IPC
///
/// Messages are length-prefixed:
/// - 4 bytes: message length (big-endian u32)
/// - N bytes: JSON message
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Encode a message with length prefix
pub fn encode_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(msg)?;
    let len = json.len() as u32;

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + json.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&json);

    Ok(buf)
}

/// Decode a message body (without the length prefix)
pub fn decode_message<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(data)
}
