//! Socket provider
//!
//! The registry and the ingress supervisor never create sockets directly.
//! They go through a [`SocketProvider`], so production code opens real
//! `AF_PACKET` and raw IPv6 sockets while tests substitute implementations
//! that need no `CAP_NET_RAW`.

use std::sync::Arc;

use crate::capture::{CaptureHandle, FilterProgram, PacketSocket};
use crate::error::{CaptureError, InjectError};
use crate::inject::{PacketInjector, RawInjector};

/// Opens capture handles and injection sockets
pub trait SocketProvider: Send + Sync {
    /// Open a capture on `interface` with `program` already attached.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError` if the capture cannot be opened.
    fn open_capture(
        &self,
        interface: &str,
        program: &FilterProgram,
    ) -> Result<Arc<dyn CaptureHandle>, CaptureError>;

    /// Open a raw IPv6 injection socket.
    ///
    /// # Errors
    ///
    /// Returns `InjectError` if the socket cannot be created.
    fn open_injector(&self) -> Result<Arc<dyn PacketInjector>, InjectError>;
}

/// Provider backed by real kernel sockets
#[derive(Debug, Clone, Default)]
pub struct RealSocketProvider;

impl RealSocketProvider {
    /// Create a new real socket provider.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl SocketProvider for RealSocketProvider {
    fn open_capture(
        &self,
        interface: &str,
        program: &FilterProgram,
    ) -> Result<Arc<dyn CaptureHandle>, CaptureError> {
        Ok(Arc::new(PacketSocket::open(interface, program)?))
    }

    fn open_injector(&self) -> Result<Arc<dyn PacketInjector>, InjectError> {
        Ok(Arc::new(RawInjector::open()?))
    }
}

/// Get the default socket provider (production implementation).
#[must_use]
pub fn default_socket_provider() -> Arc<dyn SocketProvider> {
    Arc::new(RealSocketProvider::new())
}
