//! IPC Command Handler
//!
//! Applies control-plane commands to the running dataplane.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::protocol::{ErrorCode, IpcCommand, IpcResponse, ServerStatus, StatsResponse};
use crate::ingress::DirectIngress;
use crate::keys::{DecapKeyStore, RlocKeys};
use crate::stats::DecapStats;
use crate::uplink::{PreferredAddrs, Uplink, UplinkRegistry};

/// IPC command handler
pub struct IpcHandler {
    registry: Arc<UplinkRegistry>,
    keys: Arc<DecapKeyStore>,
    stats: Arc<DecapStats>,
    addrs: Arc<PreferredAddrs>,
    direct: Option<Arc<DirectIngress>>,

    /// Process-wide shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    shutting_down: AtomicBool,

    start_time: Instant,
    version: String,
}

impl IpcHandler {
    /// Create a new IPC handler
    pub fn new(
        registry: Arc<UplinkRegistry>,
        keys: Arc<DecapKeyStore>,
        stats: Arc<DecapStats>,
        addrs: Arc<PreferredAddrs>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            registry,
            keys,
            stats,
            addrs,
            direct: None,
            shutdown_tx,
            shutting_down: AtomicBool::new(false),
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Report counters of a running direct ingress
    #[must_use]
    pub fn with_direct_ingress(mut self, direct: Arc<DirectIngress>) -> Self {
        self.direct = Some(direct);
        self
    }

    /// Whether a shutdown command has been handled
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Handle an IPC command and return a response
    pub async fn handle(&self, command: IpcCommand) -> IpcResponse {
        debug!("Handling IPC command: {:?}", command);

        if self.is_shutting_down() && command.mutates() {
            return IpcResponse::error(ErrorCode::ShuttingDown, "Dataplane is shutting down");
        }

        match command {
            IpcCommand::Ping => IpcResponse::Pong,
            IpcCommand::Status => self.handle_status(),
            IpcCommand::GetStats => self.handle_get_stats(),
            IpcCommand::SetUplinks { uplinks } => self.handle_set_uplinks(&uplinks),
            IpcCommand::SetEphemeralPort { port } => self.handle_set_ephemeral_port(port),
            IpcCommand::SetDecapKeys { rloc, keys } => {
                self.handle_set_decap_keys(&RlocKeys { rloc, keys })
            }
            IpcCommand::RemoveDecapKeys { rloc } => {
                if self.keys.remove(rloc) {
                    IpcResponse::success()
                } else {
                    IpcResponse::error(ErrorCode::NotFound, format!("No decap keys for {rloc}"))
                }
            }
            IpcCommand::Shutdown => self.handle_shutdown(),
        }
    }

    fn handle_status(&self) -> IpcResponse {
        let addrs = self.addrs.get();

        IpcResponse::Status(ServerStatus {
            version: self.version.clone(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            registry: self.registry.snapshot(),
            rlocs_with_keys: self.keys.len(),
            preferred_v4: addrs.v4,
            preferred_v6: addrs.v6,
            direct_listen: self.direct.as_ref().map(|d| d.listen_addr().to_string()),
            shutting_down: self.is_shutting_down(),
        })
    }

    fn handle_get_stats(&self) -> IpcResponse {
        IpcResponse::Stats(StatsResponse {
            decap: self.stats.snapshot(),
            direct: self.direct.as_ref().map(|d| d.stats_snapshot()),
        })
    }

    fn handle_set_uplinks(&self, uplinks: &[Uplink]) -> IpcResponse {
        info!("Uplink set update: {} uplinks", uplinks.len());
        self.registry.on_uplink_set_changed(uplinks);
        IpcResponse::success_with_message(format!(
            "{} captures active",
            self.registry.active_captures()
        ))
    }

    fn handle_set_ephemeral_port(&self, port: u16) -> IpcResponse {
        if port == 0 {
            return IpcResponse::error(
                ErrorCode::InvalidParameters,
                "Ephemeral port must be non-zero",
            );
        }
        self.registry.on_ephemeral_port_changed(port);
        IpcResponse::success()
    }

    fn handle_set_decap_keys(&self, entry: &RlocKeys) -> IpcResponse {
        match self.keys.install(entry) {
            Ok(()) => IpcResponse::success(),
            Err(e) => {
                warn!("Rejected decap keys for {}: {}", entry.rloc, e);
                IpcResponse::error(ErrorCode::InvalidParameters, e.to_string())
            }
        }
    }

    fn handle_shutdown(&self) -> IpcResponse {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return IpcResponse::success_with_message("Shutdown already in progress");
        }
        info!("Shutdown requested over IPC");

        // No receivers just means nothing is waiting on the signal yet
        let _ = self.shutdown_tx.send(());
        IpcResponse::success_with_message("Shutdown initiated")
    }
}

impl IpcCommand {
    /// Whether the command changes dataplane state
    fn mutates(&self) -> bool {
        matches!(
            self,
            Self::SetUplinks { .. }
                | Self::SetEphemeralPort { .. }
                | Self::SetDecapKeys { .. }
                | Self::RemoveDecapKeys { .. }
        )
    }
}

impl std::fmt::Debug for IpcHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcHandler")
            .field("version", &self.version)
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}
