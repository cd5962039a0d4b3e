//! Raw IPv6 injection of decapsulated packets
//!
//! Inner packets already carry a complete IPv6 header, so they are written
//! to an `IPPROTO_RAW` socket and routed by the local stack to their inner
//! destination.

use std::net::{Ipv6Addr, SocketAddrV6};

use parking_lot::RwLock;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::debug;

use crate::error::InjectError;

/// Sends decapsulated inner packets to the local stack
pub trait PacketInjector: Send + Sync {
    /// Send one complete IPv6 packet toward `dest`.
    ///
    /// # Errors
    ///
    /// Returns `InjectError` if the socket is closed or the send fails. No
    /// retry is attempted.
    fn inject(&self, packet: &[u8], dest: Ipv6Addr) -> Result<(), InjectError>;

    /// Release the underlying socket
    fn close(&self);
}

/// Non-blocking raw IPv6 socket
#[derive(Debug)]
pub struct RawInjector {
    socket: RwLock<Option<Socket>>,
}

impl RawInjector {
    /// Open a raw IPv6 socket (`CAP_NET_RAW` required)
    ///
    /// # Errors
    ///
    /// Returns `InjectError::SocketCreation` if the socket cannot be created.
    pub fn open() -> Result<Self, InjectError> {
        let socket = Socket::new(
            Domain::IPV6,
            Type::RAW,
            Some(Protocol::from(libc::IPPROTO_RAW)),
        )
        .map_err(|e| InjectError::SocketCreation(e.to_string()))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| InjectError::SocketCreation(format!("O_NONBLOCK: {e}")))?;

        debug!("Opened raw IPv6 injection socket");
        Ok(Self {
            socket: RwLock::new(Some(socket)),
        })
    }
}

impl PacketInjector for RawInjector {
    fn inject(&self, packet: &[u8], dest: Ipv6Addr) -> Result<(), InjectError> {
        let guard = self.socket.read();
        let socket = guard.as_ref().ok_or(InjectError::Closed)?;
        let addr = SockAddr::from(SocketAddrV6::new(dest, 0, 0, 0));

        socket
            .send_to(packet, &addr)
            .map(|_| ())
            .map_err(|e| InjectError::send_failed(dest, e.to_string()))
    }

    fn close(&self) {
        if self.socket.write().take().is_some() {
            debug!("Closed raw IPv6 injection socket");
        }
    }
}
