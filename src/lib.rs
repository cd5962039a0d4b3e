//! lisp-etr: LISP egress tunnel router decapsulation dataplane
//!
//! This crate receives LISP-encapsulated IPv6 traffic, authenticates and
//! decrypts it with per-RLOC keys, and injects the inner IPv6 packet into the
//! local network stack.
//!
//! # Features
//!
//! - **Direct ingress**: UDP listener on the LISP data port for peers without NAT
//! - **Link capture**: per-uplink `AF_PACKET` capture with a BPF filter for
//!   return traffic that arrives on a NAT-rewritten ephemeral port
//! - **Authenticated decryption**: HMAC-SHA256-160 ICV and AES-GCM
//! - **IPC Control**: Unix socket control of uplinks, ports and keys
//!
//! # Architecture
//!
//! ```text
//! Peer ─UDP 4341─→ DirectIngress ─┐
//!                                 ├→ Dataplane (verify, decrypt) → RawInjector → IPv6 stack
//! Uplink ─AF_PACKET→ capture ─────┘
//!                       ↑
//!               UplinkRegistry ← IPC (uplinks, ephemeral port, keys)
//! ```
//!
//! # Modules
//!
//! - [`capture`]: Packet sockets, BPF filters and capture workers
//! - [`codec`]: LISP header parsing and decapsulation
//! - [`config`]: Configuration types and loading
//! - [`dataplane`]: Per-packet verification and forwarding
//! - [`error`]: Error types
//! - [`ingress`]: Direct UDP ingress
//! - [`inject`]: Raw IPv6 injection
//! - [`ipc`]: IPC server and protocol
//! - [`keys`]: Decapsulation key store
//! - [`provider`]: Socket factories
//! - [`stats`]: Decapsulation counters
//! - [`uplink`]: Uplink registry and preferred addresses

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod capture;
pub mod codec;
pub mod config;
pub mod dataplane;
pub mod error;
pub mod ingress;
pub mod inject;
pub mod ipc;
pub mod keys;
pub mod provider;
pub mod stats;
pub mod uplink;

// Re-export commonly used types at the crate root
pub use capture::{CaptureHandle, FilterCompiler, FilterProgram, PacketSocket, PortMatchCompiler};
pub use codec::{decapsulate, DecapOutcome, DropReason, LispHeader};
pub use config::Config;
pub use dataplane::Dataplane;
pub use error::{CaptureError, ConfigError, EtrError, IngressError, InjectError, IpcError};
pub use ingress::DirectIngress;
pub use inject::{PacketInjector, RawInjector};
pub use ipc::{IpcClient, IpcCommand, IpcResponse, IpcServer};
pub use keys::{DecapKey, DecapKeyStore, KeySet, KeyStore};
pub use provider::{default_socket_provider, RealSocketProvider, SocketProvider};
pub use stats::{DecapCounter, DecapStats, StatsSink};
pub use uplink::{PreferredAddrs, Uplink, UplinkRegistry};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Check if running with the capabilities needed for capture and injection
///
/// # Errors
///
/// Returns `CaptureError::PermissionDenied` without `CAP_NET_RAW`.
pub fn check_capabilities() -> Result<(), CaptureError> {
    if !capture::has_net_raw_capability() {
        return Err(CaptureError::PermissionDenied);
    }
    Ok(())
}
