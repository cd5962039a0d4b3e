//! Direct UDP ingress
//!
//! Peers that reach us without NAT port rewriting send LISP data straight to
//! UDP port 4341. One task receives those datagrams and hands them to the
//! dataplane. A receive error ends the serving loop; the supervisor in
//! [`DirectIngress::run`] re-binds after a fixed backoff until shutdown.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{error, info, trace, warn};

use crate::config::DirectConfig;
use crate::dataplane::Dataplane;
use crate::error::IngressError;
use crate::inject::PacketInjector;
use crate::provider::SocketProvider;

/// Receive buffer size (largest UDP payload)
const RECV_BUFFER_SIZE: usize = 65535;

#[derive(Debug, Default)]
struct IngressStats {
    datagrams: AtomicU64,
    bytes: AtomicU64,
    restarts: AtomicU64,
}

/// Snapshot of direct ingress counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressStatsSnapshot {
    pub datagrams: u64,
    pub bytes: u64,
    pub restarts: u64,
}

/// UDP listener for non-NAT LISP data
pub struct DirectIngress {
    listen: SocketAddr,
    retry_backoff: Duration,
    dataplane: Arc<Dataplane>,
    provider: Arc<dyn SocketProvider>,
    stats: IngressStats,
}

impl DirectIngress {
    /// Create an ingress that binds according to `config`
    pub fn new(
        config: &DirectConfig,
        dataplane: Arc<Dataplane>,
        provider: Arc<dyn SocketProvider>,
    ) -> Self {
        Self {
            listen: config.listen,
            retry_backoff: config.retry_backoff(),
            dataplane,
            provider,
            stats: IngressStats::default(),
        }
    }

    /// Configured listen address
    #[must_use]
    pub const fn listen_addr(&self) -> SocketAddr {
        self.listen
    }

    /// Bind the tunnel listener
    ///
    /// # Errors
    ///
    /// Returns `IngressError::BindError` if the address cannot be bound.
    pub async fn bind(&self) -> Result<UdpSocket, IngressError> {
        let socket = UdpSocket::bind(self.listen)
            .await
            .map_err(|e| IngressError::bind(self.listen, e.to_string()))?;
        info!("Direct ingress listening on {}", self.listen);
        Ok(socket)
    }

    /// Receive and process datagrams until a receive error.
    ///
    /// Per-packet failures are counted by the dataplane and never end the loop.
    ///
    /// # Errors
    ///
    /// Returns `IngressError::RecvError` when the socket fails.
    pub async fn serve(
        &self,
        socket: &UdpSocket,
        injector: &dyn PacketInjector,
    ) -> Result<(), IngressError> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            let (n, peer) = socket
                .recv_from(&mut buf)
                .await
                .map_err(IngressError::RecvError)?;

            self.stats.datagrams.fetch_add(1, Ordering::Relaxed);
            self.stats.bytes.fetch_add(n as u64, Ordering::Relaxed);
            trace!("Direct datagram from {} ({} bytes)", peer, n);

            self.dataplane
                .verify_and_inject(&mut buf[..n], peer.ip(), injector);
        }
    }

    /// Bind, open the injector and serve once
    async fn run_once(&self) -> Result<(), IngressError> {
        let socket = self.bind().await?;
        let injector = self.provider.open_injector()?;
        let result = self.serve(&socket, injector.as_ref()).await;
        injector.close();
        result
    }

    /// Supervise the listener until shutdown.
    ///
    /// Recoverable failures (bind, receive) are retried after the configured
    /// backoff.
    ///
    /// # Errors
    ///
    /// Returns the first unrecoverable `IngressError` (e.g. the raw injection
    /// socket cannot be created).
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), IngressError> {
        loop {
            let result = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                result = self.run_once() => result,
            };

            let err = match result {
                Ok(()) => continue,
                Err(e) => e,
            };
            if !err.is_recoverable() {
                error!("Direct ingress stopped: {}", err);
                return Err(err);
            }

            self.stats.restarts.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Direct ingress on {} failed: {}, retrying in {:?}",
                self.listen, err, self.retry_backoff
            );

            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                () = tokio::time::sleep(self.retry_backoff) => {}
            }
        }

        info!("Direct ingress on {} shut down", self.listen);
        Ok(())
    }

    /// Current counters
    #[must_use]
    pub fn stats_snapshot(&self) -> IngressStatsSnapshot {
        IngressStatsSnapshot {
            datagrams: self.stats.datagrams.load(Ordering::Relaxed),
            bytes: self.stats.bytes.load(Ordering::Relaxed),
            restarts: self.stats.restarts.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for DirectIngress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectIngress")
            .field("listen", &self.listen)
            .field("retry_backoff", &self.retry_backoff)
            .finish_non_exhaustive()
    }
}
