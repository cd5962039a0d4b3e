//! Link-level capture of NAT return traffic
//!
//! Peers behind NAT send LISP data to a rewritten destination port that no
//! local socket is bound to. For each uplink, a promiscuous packet capture
//! with a port-match filter picks those frames up, and a worker task feeds
//! the UDP payloads to the dataplane.
//!
//! # Architecture
//!
//! ```text
//! uplink (eth0) ─→ PacketSocket + BPF ─→ capture worker ─→ Dataplane ─→ raw IPv6
//!                     ↑ set_filter()          ↑ shutdown
//!                     └──────── UplinkRegistry ┘
//! ```

mod filter;
mod frame;
mod socket;
mod worker;

use async_trait::async_trait;

pub use filter::{
    nat_port_expression, BpfInsn, FilterCompiler, FilterProgram, PortMatch, PortMatchCompiler,
    DEFAULT_SNAPLEN,
};
pub use frame::{ipv4_checksum_ok, locate_udp_payload, CapturedDatagram, FrameError};
pub use socket::{has_net_raw_capability, PacketSocket};
pub use worker::{run_capture, FRAME_BUFFER_SIZE};

use crate::error::CaptureError;

/// A live capture on one uplink.
///
/// A handle is read by exactly one worker task; the registry may replace its
/// filter or close it concurrently.
#[async_trait]
pub trait CaptureHandle: Send + Sync {
    /// Read the next frame that passed the filter into `buf`.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError::Closed` once [`close`](Self::close) has been
    /// called, or another `CaptureError` for read failures.
    async fn read_frame(&self, buf: &mut [u8]) -> Result<usize, CaptureError>;

    /// Replace the filter program without interrupting reads.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError` if the handle is closed or the attach fails.
    fn set_filter(&self, program: &FilterProgram) -> Result<(), CaptureError>;

    /// Close the handle; pending and future reads return `Closed`.
    fn close(&self);

    /// Interface this handle captures on
    fn interface(&self) -> &str;
}

#[cfg(test)]
pub(crate) use frame::tests as frame_tests;
