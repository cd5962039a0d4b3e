//! `AF_PACKET` capture socket
//!
//! A raw packet socket bound to one uplink, in promiscuous mode, with a
//! classic BPF filter attached. The socket is created with protocol 0 so it
//! receives nothing until the filter is in place and it is bound to the
//! interface; frames from other links never reach the queue.
//!
//! Reads are driven by tokio through [`AsyncFd`]. [`PacketSocket::close`]
//! cancels any pending or future read, which then returns
//! [`CaptureError::Closed`].

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::unix::AsyncFd;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::filter::FilterProgram;
use super::CaptureHandle;
use crate::error::CaptureError;

/// Link-level capture socket on one interface
#[derive(Debug)]
pub struct PacketSocket {
    fd: AsyncFd<Socket>,
    interface: String,
    cancel: CancellationToken,
}

impl PacketSocket {
    /// Open a promiscuous capture on `interface` with `program` attached.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError` if:
    /// - The interface does not exist
    /// - `CAP_NET_RAW` is missing
    /// - Binding, promiscuous membership or filter attach fails
    pub fn open(interface: &str, program: &FilterProgram) -> Result<Self, CaptureError> {
        let ifindex = interface_index(interface)?;

        let socket = Socket::new(Domain::PACKET, Type::RAW, Some(Protocol::from(0)))
            .map_err(|e| match e.raw_os_error() {
                Some(libc::EPERM | libc::EACCES) => CaptureError::PermissionDenied,
                _ => CaptureError::SocketCreation(e.to_string()),
            })?;

        attach_filter(&socket, program)?;
        bind_to_interface(&socket, ifindex)?;
        set_promiscuous(&socket, ifindex)?;

        socket
            .set_nonblocking(true)
            .map_err(|e| CaptureError::socket_option("O_NONBLOCK", e.to_string()))?;

        let fd = AsyncFd::new(socket)
            .map_err(|e| CaptureError::socket_option("AsyncFd", e.to_string()))?;

        info!(
            "Opened capture on {} (ifindex {}) with filter '{}'",
            interface,
            ifindex,
            program.expression()
        );

        Ok(Self {
            fd,
            interface: interface.to_string(),
            cancel: CancellationToken::new(),
        })
    }

    /// Raw file descriptor
    #[must_use]
    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}

#[async_trait]
impl CaptureHandle for PacketSocket {
    async fn read_frame(&self, buf: &mut [u8]) -> Result<usize, CaptureError> {
        loop {
            let mut guard = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(CaptureError::Closed),
                ready = self.fd.readable() => ready?,
            };

            match guard.try_io(|inner| recv_frame(inner.get_ref().as_raw_fd(), buf)) {
                Ok(Ok(n)) => {
                    trace!("Captured {} byte frame on {}", n, self.interface);
                    return Ok(n);
                }
                Ok(Err(e)) => return Err(CaptureError::IoError(e)),
                // Spurious wakeup, readiness already cleared
                Err(_would_block) => {}
            }
        }
    }

    fn set_filter(&self, program: &FilterProgram) -> Result<(), CaptureError> {
        if self.cancel.is_cancelled() {
            return Err(CaptureError::Closed);
        }
        attach_filter(self.fd.get_ref(), program)?;
        debug!(
            "Replaced capture filter on {} with '{}'",
            self.interface,
            program.expression()
        );
        Ok(())
    }

    fn close(&self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            debug!("Closed capture on {}", self.interface);
        }
    }

    fn interface(&self) -> &str {
        &self.interface
    }
}

/// Resolve an interface name to its index
fn interface_index(interface: &str) -> Result<u32, CaptureError> {
    let name =
        CString::new(interface).map_err(|_| CaptureError::InterfaceNotFound(interface.into()))?;
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if index == 0 {
        return Err(CaptureError::InterfaceNotFound(interface.into()));
    }
    Ok(index)
}

/// Attach (or atomically replace) the socket filter
fn attach_filter(socket: &Socket, program: &FilterProgram) -> Result<(), CaptureError> {
    let filter: Vec<libc::sock_filter> = program
        .instructions()
        .iter()
        .map(|insn| libc::sock_filter {
            code: insn.code,
            jt: insn.jt,
            jf: insn.jf,
            k: insn.k,
        })
        .collect();

    socket
        .attach_filter(&filter)
        .map_err(|e| CaptureError::socket_option("SO_ATTACH_FILTER", e.to_string()))
}

/// Bind to all protocols on one interface
fn bind_to_interface(socket: &Socket, ifindex: u32) -> Result<(), CaptureError> {
    let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
    addr.sll_family = libc::AF_PACKET as libc::c_ushort;
    addr.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
    addr.sll_ifindex = ifindex as libc::c_int;

    let ret = unsafe {
        libc::bind(
            socket.as_raw_fd(),
            std::ptr::addr_of!(addr).cast::<libc::sockaddr>(),
            mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };

    if ret != 0 {
        let err = io::Error::last_os_error();
        return Err(CaptureError::socket_option("bind", err.to_string()));
    }
    Ok(())
}

/// Enable promiscuous mode through packet membership
fn set_promiscuous(socket: &Socket, ifindex: u32) -> Result<(), CaptureError> {
    let mut mreq: libc::packet_mreq = unsafe { mem::zeroed() };
    mreq.mr_ifindex = ifindex as libc::c_int;
    mreq.mr_type = libc::PACKET_MR_PROMISC as libc::c_ushort;

    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_PACKET,
            libc::PACKET_ADD_MEMBERSHIP,
            std::ptr::addr_of!(mreq).cast::<libc::c_void>(),
            mem::size_of::<libc::packet_mreq>() as libc::socklen_t,
        )
    };

    if ret != 0 {
        let err = io::Error::last_os_error();
        return Err(CaptureError::socket_option(
            "PACKET_ADD_MEMBERSHIP",
            err.to_string(),
        ));
    }
    Ok(())
}

fn recv_frame(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::recv(fd, buf.as_mut_ptr().cast::<libc::c_void>(), buf.len(), 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// Whether this process may open packet sockets (`CAP_NET_RAW`).
///
/// Probes by creating an unbound `AF_PACKET` socket.
#[must_use]
pub fn has_net_raw_capability() -> bool {
    match Socket::new(Domain::PACKET, Type::RAW, Some(Protocol::from(0))) {
        Ok(_) => true,
        Err(e) => !matches!(e.raw_os_error(), Some(libc::EPERM | libc::EACCES)),
    }
}
