//! IPC (Inter-Process Communication) module
//!
//! This module provides a Unix socket-based IPC server through which the
//! control plane feeds the dataplane at runtime: uplink set, NAT ephemeral
//! port and decapsulation keys.
//!
//! # Protocol
//!
//! Messages are length-prefixed JSON:
//! - 4 bytes: message length (big-endian u32)
//! - N bytes: JSON-encoded command or response
//!
//! # Example
//!
//! ```no_run
//! use lisp_etr::ipc::{IpcClient, IpcCommand, IpcResponse};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = IpcClient::new("/var/run/lisp-etr.sock");
//!
//! client.send(IpcCommand::SetEphemeralPort { port: 51000 }).await?;
//!
//! if let IpcResponse::Stats(stats) = client.send(IpcCommand::GetStats).await? {
//!     println!("Forwarded: {}", stats.decap.get("good-packets"));
//! }
//! # Ok(())
//! # }
//! ```

mod handler;
mod protocol;
mod server;

pub use handler::IpcHandler;
pub use protocol::{
    decode_message, encode_message, ErrorCode, IpcCommand, IpcErrorResponse, IpcResponse,
    ServerStatus, StatsResponse, LENGTH_PREFIX_SIZE, MAX_MESSAGE_SIZE,
};
pub use server::{IpcClient, IpcServer};
