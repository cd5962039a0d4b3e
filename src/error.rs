//! Error types for lisp-etr
//!
//! This module defines the error hierarchy for the decapsulation dataplane.
//! Per-packet outcomes are not errors here: they are classified by
//! [`crate::codec::DropReason`] and counted. The types below cover socket,
//! capture and control-plane failures that a controller has to act on.

use std::io;
use std::net::{Ipv6Addr, SocketAddr};

use thiserror::Error;

/// Top-level error type for lisp-etr
#[derive(Debug, Error)]
pub enum EtrError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Link-level capture errors
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Direct UDP ingress errors
    #[error("Ingress error: {0}")]
    Ingress(#[from] IngressError),

    /// Raw injection errors
    #[error("Inject error: {0}")]
    Inject(#[from] InjectError),

    /// IPC communication errors
    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl EtrError {
    /// Check if this error is recoverable (can retry operation)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Capture(e) => e.is_recoverable(),
            Self::Ingress(e) => e.is_recoverable(),
            Self::Inject(e) => e.is_recoverable(),
            Self::Ipc(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are not recoverable without operator intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

/// Link-level capture errors (`AF_PACKET` socket and BPF filter)
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Failed to create the packet socket
    #[error("Failed to create capture socket: {0}")]
    SocketCreation(String),

    /// Failed to set a socket option
    #[error("Failed to set capture socket option {option}: {reason}")]
    SocketOption { option: String, reason: String },

    /// The uplink interface does not exist
    #[error("Interface not found: {0}")]
    InterfaceNotFound(String),

    /// The filter expression could not be compiled
    #[error("Failed to compile filter '{expression}': {reason}")]
    FilterCompile { expression: String, reason: String },

    /// The handle was closed by its owner
    #[error("Capture handle closed")]
    Closed,

    /// Permission denied (`CAP_NET_RAW` required)
    #[error("Permission denied: packet capture requires CAP_NET_RAW capability")]
    PermissionDenied,

    /// I/O error on read
    #[error("Capture I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl CaptureError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::SocketCreation(_)
            | Self::SocketOption { .. }
            | Self::InterfaceNotFound(_)
            | Self::FilterCompile { .. }
            | Self::Closed
            | Self::PermissionDenied => false,
            Self::IoError(_) => true,
        }
    }

    /// Create a socket option error
    pub fn socket_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SocketOption {
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// Create a filter compile error
    pub fn filter_compile(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FilterCompile {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}

/// Direct UDP ingress errors
#[derive(Debug, Error)]
pub enum IngressError {
    /// Failed to bind the tunnel listener
    #[error("Failed to bind to {addr}: {reason}")]
    BindError { addr: SocketAddr, reason: String },

    /// Receive failed on the bound socket
    #[error("Receive error: {0}")]
    RecvError(io::Error),

    /// The injection socket could not be opened
    #[error("Injector unavailable: {0}")]
    Injector(#[from] InjectError),
}

impl IngressError {
    /// Bind and receive failures are retried by the supervisor with a backoff.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::BindError { .. } | Self::RecvError(_) => true,
            Self::Injector(e) => e.is_recoverable(),
        }
    }

    /// Create a bind error
    pub fn bind(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::BindError {
            addr,
            reason: reason.into(),
        }
    }
}

/// Raw IPv6 injection errors
#[derive(Debug, Error)]
pub enum InjectError {
    /// Failed to create the raw socket
    #[error("Failed to create raw injection socket: {0}")]
    SocketCreation(String),

    /// The send call failed
    #[error("Failed to inject packet to {dest}: {reason}")]
    SendFailed { dest: Ipv6Addr, reason: String },

    /// The socket was closed by its owner
    #[error("Injection socket closed")]
    Closed,
}

impl InjectError {
    /// Injection is per packet, a failed send may succeed for the next packet.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::SendFailed { .. })
    }

    /// Create a send failed error
    pub fn send_failed(dest: Ipv6Addr, reason: impl Into<String>) -> Self {
        Self::SendFailed {
            dest,
            reason: reason.into(),
        }
    }
}

/// IPC communication errors
#[derive(Debug, Error)]
pub enum IpcError {
    /// Failed to create Unix socket
    #[error("Failed to create IPC socket at {path}: {reason}")]
    SocketCreation { path: String, reason: String },

    /// Failed to bind Unix socket
    #[error("Failed to bind IPC socket to {path}: {reason}")]
    BindError { path: String, reason: String },

    /// Connection error
    #[error("IPC connection error: {0}")]
    ConnectionError(String),

    /// Protocol error (invalid message format)
    #[error("IPC protocol error: {0}")]
    ProtocolError(String),

    /// Serialization error
    #[error("IPC serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("IPC I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl IpcError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::SocketCreation { .. } | Self::BindError { .. } | Self::SerializationError(_) => {
                false
            }
            Self::ConnectionError(_) | Self::ProtocolError(_) => true,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),
        }
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolError(msg.into())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::SerializationError(msg.into())
    }
}

/// Type alias for Result with `EtrError`
pub type Result<T> = std::result::Result<T, EtrError>;
