//! Uplink capture registry
//!
//! Tracks which uplinks have an active NAT-return capture and keeps that set
//! consistent with two independent event sources: uplink set changes from
//! the device network manager and ephemeral port changes from the control
//! plane.
//!
//! # Invariants
//!
//! - An uplink has an active capture iff it is valid and the ephemeral port
//!   is known (or a previous open attempt failed, in which case it is retried
//!   on the next port change).
//! - Both entry points run under one mutex, so they never interleave.
//! - A removed uplink is torn down exactly once: signal the worker, close the
//!   capture handle, close the injection socket, drop the entry.
//! - A live capture whose filter could not be swapped keeps its old filter
//!   and is retried on the next port event, even if the port is unchanged.
//! - After `shutdown` both entry points are no-ops.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::addrs::{UplinkAddrSink, UplinkAddrs};
use super::types::Uplink;
use crate::capture::{
    nat_port_expression, run_capture, CaptureHandle, FilterCompiler, FilterProgram,
};
use crate::dataplane::Dataplane;
use crate::inject::PacketInjector;
use crate::provider::SocketProvider;

/// How long shutdown waits for each capture worker to finish
const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// A running capture and everything needed to stop it
struct ActiveCapture {
    handle: Arc<dyn CaptureHandle>,
    injector: Arc<dyn PacketInjector>,
    filter: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ActiveCapture {
    /// Stop in teardown order, returning the worker for optional joining
    fn stop(mut self) -> Option<JoinHandle<()>> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.close();
        self.injector.close();
        self.task.take()
    }
}

/// Per-uplink capture state
#[derive(Default)]
struct LinkCaptureState {
    capture: Option<ActiveCapture>,
}

#[derive(Default)]
struct RegistryState {
    links: BTreeMap<String, LinkCaptureState>,
    port: Option<u16>,
    shutting_down: bool,
}

impl RegistryState {
    /// Whether any live capture still runs a filter other than `expression`
    fn has_stale_filters(&self, expression: &str) -> bool {
        self.links
            .values()
            .filter_map(|l| l.capture.as_ref())
            .any(|c| c.filter != expression)
    }
}

/// Registry lifecycle counters
#[derive(Debug, Default)]
struct RegistryStats {
    captures_started: AtomicU64,
    captures_stopped: AtomicU64,
    filter_updates: AtomicU64,
    open_failures: AtomicU64,
}

/// Capture status of one tracked uplink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UplinkStatus {
    pub name: String,
    pub capturing: bool,
    /// Filter expression on the live capture
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Point-in-time registry view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub ephemeral_port: Option<u16>,
    pub uplinks: Vec<UplinkStatus>,
    pub captures_started: u64,
    pub captures_stopped: u64,
    pub filter_updates: u64,
    pub open_failures: u64,
}

/// Owner of all link captures
pub struct UplinkRegistry {
    state: Mutex<RegistryState>,
    provider: Arc<dyn SocketProvider>,
    compiler: Arc<dyn FilterCompiler>,
    dataplane: Arc<Dataplane>,
    addr_sink: Arc<dyn UplinkAddrSink>,
    tunnel_port: u16,
    stats: RegistryStats,
}

impl UplinkRegistry {
    /// Create an empty registry.
    ///
    /// `tunnel_port` is the LISP data port peers send from (4341).
    pub fn new(
        provider: Arc<dyn SocketProvider>,
        compiler: Arc<dyn FilterCompiler>,
        dataplane: Arc<Dataplane>,
        addr_sink: Arc<dyn UplinkAddrSink>,
        tunnel_port: u16,
    ) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            provider,
            compiler,
            dataplane,
            addr_sink,
            tunnel_port,
            stats: RegistryStats::default(),
        }
    }

    /// Reconcile captures with a new uplink set and republish source addresses.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_uplink_set_changed(&self, uplinks: &[Uplink]) {
        let mut state = self.state.lock();
        if state.shutting_down {
            debug!("Ignoring uplink set change during shutdown");
            return;
        }
        let port = state.port;

        let valid: Vec<&Uplink> = uplinks.iter().filter(|u| u.is_valid()).collect();

        for uplink in &valid {
            if state.links.contains_key(&uplink.name) {
                continue;
            }
            let capture = match port {
                Some(port) => self.start_capture(&uplink.name, port),
                None => {
                    debug!(
                        "Tracking uplink {} without capture until the ephemeral port is known",
                        uplink.name
                    );
                    None
                }
            };
            state
                .links
                .insert(uplink.name.clone(), LinkCaptureState { capture });
        }

        let removed: Vec<String> = state
            .links
            .keys()
            .filter(|name| !valid.iter().any(|u| &u.name == *name))
            .cloned()
            .collect();

        for name in removed {
            if let Some(link) = state.links.get_mut(&name) {
                if let Some(active) = link.capture.take() {
                    // Worker exits on its own after the signal
                    drop(active.stop());
                    self.stats.captures_stopped.fetch_add(1, Ordering::Relaxed);
                }
            }
            state.links.remove(&name);
            info!("Removed uplink {} from capture registry", name);
        }

        let addrs = UplinkAddrs::select(uplinks);
        self.addr_sink.set_uplink_addrs(addrs.v4, addrs.v6);
    }

    /// Apply a newly learned ephemeral port.
    ///
    /// A repeated value is a no-op unless a previous filter swap failed.
    /// Otherwise missing captures are started and live ones get the new
    /// filter swapped in place.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_ephemeral_port_changed(&self, port: u16) {
        let mut state = self.state.lock();
        if state.shutting_down {
            debug!("Ignoring ephemeral port change during shutdown");
            return;
        }

        let expression = nat_port_expression(port, self.tunnel_port);
        if state.port == Some(port) {
            if !state.has_stale_filters(&expression) {
                debug!("Ephemeral port unchanged ({})", port);
                return;
            }
            info!("Retrying capture filter update for port {}", port);
        } else {
            info!("Ephemeral port changed {:?} -> {}", state.port, port);
            state.port = Some(port);
        }

        let mut program: Option<FilterProgram> = None;
        let mut compile_failed = false;

        for (name, link) in &mut state.links {
            if link.capture.is_none() {
                link.capture = self.start_capture(name, port);
                continue;
            }
            let Some(active) = link.capture.as_mut() else {
                continue;
            };
            if active.filter == expression {
                continue;
            }

            if program.is_none() && !compile_failed {
                match self.compiler.compile(&expression) {
                    Ok(p) => program = Some(p),
                    Err(e) => {
                        warn!("Cannot compile capture filter '{}': {}", expression, e);
                        compile_failed = true;
                    }
                }
            }
            let Some(program) = program.as_ref() else {
                warn!("Keeping old capture filter on {}", name);
                continue;
            };

            match active.handle.set_filter(program) {
                Ok(()) => {
                    active.filter = program.expression().to_string();
                    self.stats.filter_updates.fetch_add(1, Ordering::Relaxed);
                    info!("Changed capture filter on {} to '{}'", name, active.filter);
                }
                Err(e) => warn!("Failed to update capture filter on {}: {}", name, e),
            }
        }
    }

    /// Open a capture, its injection socket and its worker.
    ///
    /// Failures are logged and leave the uplink without a capture.
    fn start_capture(&self, name: &str, port: u16) -> Option<ActiveCapture> {
        let expression = nat_port_expression(port, self.tunnel_port);
        let program = match self.compiler.compile(&expression) {
            Ok(p) => p,
            Err(e) => {
                warn!("Not capturing on {}: {}", name, e);
                return None;
            }
        };

        let handle = match self.provider.open_capture(name, &program) {
            Ok(h) => h,
            Err(e) => {
                self.stats.open_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to open capture on {}: {}", name, e);
                return None;
            }
        };

        let injector = match self.provider.open_injector() {
            Ok(i) => i,
            Err(e) => {
                handle.close();
                self.stats.open_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to open injection socket for {}: {}", name, e);
                return None;
            }
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_capture(
            Arc::clone(&handle),
            Arc::clone(&injector),
            Arc::clone(&self.dataplane),
            shutdown_rx,
        ));

        self.stats.captures_started.fetch_add(1, Ordering::Relaxed);
        info!("Started capture on {} with filter '{}'", name, expression);

        Some(ActiveCapture {
            handle,
            injector,
            filter: expression,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Current ephemeral port
    #[must_use]
    pub fn ephemeral_port(&self) -> Option<u16> {
        self.state.lock().port
    }

    /// Number of uplinks with a live capture
    #[must_use]
    pub fn active_captures(&self) -> usize {
        self.state
            .lock()
            .links
            .values()
            .filter(|l| l.capture.is_some())
            .count()
    }

    /// Snapshot for status reporting
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.state.lock();
        RegistrySnapshot {
            ephemeral_port: state.port,
            uplinks: state
                .links
                .iter()
                .map(|(name, link)| UplinkStatus {
                    name: name.clone(),
                    capturing: link.capture.is_some(),
                    filter: link.capture.as_ref().map(|c| c.filter.clone()),
                })
                .collect(),
            captures_started: self.stats.captures_started.load(Ordering::Relaxed),
            captures_stopped: self.stats.captures_stopped.load(Ordering::Relaxed),
            filter_updates: self.stats.filter_updates.load(Ordering::Relaxed),
            open_failures: self.stats.open_failures.load(Ordering::Relaxed),
        }
    }

    /// Tear down every capture and wait for the workers to exit
    pub async fn shutdown(&self) {
        let workers: Vec<(String, JoinHandle<()>)> = {
            let mut state = self.state.lock();
            state.shutting_down = true;
            let links = std::mem::take(&mut state.links);
            links
                .into_iter()
                .filter_map(|(name, link)| {
                    let task = link.capture?.stop();
                    self.stats.captures_stopped.fetch_add(1, Ordering::Relaxed);
                    task.map(|t| (name, t))
                })
                .collect()
        };

        for (name, task) in workers {
            if tokio::time::timeout(WORKER_STOP_TIMEOUT, task).await.is_err() {
                warn!("Capture worker on {} did not stop in time", name);
            }
        }
        info!("Capture registry shut down");
    }
}

impl std::fmt::Debug for UplinkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UplinkRegistry")
            .field("tunnel_port", &self.tunnel_port)
            .finish_non_exhaustive()
    }
}
