//! lisp-etr: LISP egress tunnel router dataplane
//!
//! This is the main entry point for the decapsulation daemon.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! sudo ./lisp-etr
//!
//! # Run with custom configuration
//! sudo ./lisp-etr -c /path/to/config.json
//!
//! # Run with environment overrides
//! LISP_ETR_LOG_LEVEL=debug sudo ./lisp-etr
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lisp_etr::capture::PortMatchCompiler;
use lisp_etr::config::{load_config_with_env, Config};
use lisp_etr::dataplane::Dataplane;
use lisp_etr::ingress::DirectIngress;
use lisp_etr::ipc::{IpcHandler, IpcServer};
use lisp_etr::keys::DecapKeyStore;
use lisp_etr::provider::default_socket_provider;
use lisp_etr::stats::DecapStats;
use lisp_etr::uplink::{PreferredAddrs, UplinkRegistry};

/// Time allowed for background tasks to stop after the shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/lisp-etr/config.json");
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("lisp-etr v{}", lisp_etr::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"lisp-etr v{}

LISP egress tunnel router: decapsulates LISP data traffic and injects the
inner IPv6 packets into the local stack.

USAGE:
    lisp-etr [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/lisp-etr/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT:
    LISP_ETR_LISTEN_ADDR    Override direct ingress address
    LISP_ETR_LOG_LEVEL      Override log level (trace, debug, info, warn, error)
    LISP_ETR_IPC_SOCKET     Override IPC socket path

REQUIREMENTS:
    - Linux with AF_PACKET and raw IPv6 sockets
    - CAP_NET_RAW capability (or root)
"#,
        lisp_etr::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.level.to_lowercase()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Check system prerequisites
fn check_prerequisites() {
    if let Err(e) = lisp_etr::check_capabilities() {
        warn!("{}", e);
        warn!("Link capture and packet injection will fail until CAP_NET_RAW is granted");
    }
}

/// Install keys from the configuration file
fn install_initial_keys(config: &Config, keys: &DecapKeyStore) {
    for entry in &config.decap_keys {
        if let Err(e) = keys.install(entry) {
            warn!("Skipping decap keys for {}: {}", entry.rloc, e);
        }
    }
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    let args = Args::parse();

    if args.generate_config {
        lisp_etr::config::create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    let config = load_config_with_env(&args.config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration from {:?}: {}",
            args.config_path,
            e
        )
    })?;

    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    init_logging(&config);

    info!("lisp-etr v{}", lisp_etr::VERSION);
    info!("Configuration loaded from {:?}", args.config_path);

    check_prerequisites();

    // Shared state
    let keys = Arc::new(DecapKeyStore::new());
    install_initial_keys(&config, &keys);
    let stats = Arc::new(DecapStats::new());
    let addrs = Arc::new(PreferredAddrs::new());
    let provider = default_socket_provider();
    let dataplane = Arc::new(Dataplane::new(keys.clone(), stats.clone()));

    let registry = Arc::new(UplinkRegistry::new(
        Arc::clone(&provider),
        Arc::new(PortMatchCompiler::new(config.capture.snaplen)),
        Arc::clone(&dataplane),
        addrs.clone(),
        config.capture.tunnel_port,
    ));
    registry.on_uplink_set_changed(&config.uplinks);
    if let Some(port) = config.capture.ephemeral_port {
        registry.on_ephemeral_port_changed(port);
    }

    // Process-wide shutdown: signals, IPC, or a fatal ingress error
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(4);

    let direct = config.direct.enabled.then(|| {
        Arc::new(DirectIngress::new(
            &config.direct,
            Arc::clone(&dataplane),
            Arc::clone(&provider),
        ))
    });

    let direct_handle = direct.as_ref().map(|ingress| {
        let ingress = Arc::clone(ingress);
        let rx = shutdown_tx.subscribe();
        let fatal_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            let result = ingress.run(rx).await;
            if result.is_err() {
                let _ = fatal_tx.send(());
            }
            result
        })
    });

    let mut ipc_handler = IpcHandler::new(
        Arc::clone(&registry),
        Arc::clone(&keys),
        Arc::clone(&stats),
        Arc::clone(&addrs),
        shutdown_tx.clone(),
    );
    if let Some(ingress) = &direct {
        ipc_handler = ipc_handler.with_direct_ingress(Arc::clone(ingress));
    }

    let ipc_server = IpcServer::new(config.ipc.clone(), Arc::new(ipc_handler));
    let ipc_shutdown = ipc_server.shutdown_sender();
    let ipc_handle = tokio::spawn(async move {
        if let Err(e) = ipc_server.run().await {
            error!("IPC server error: {}", e);
        }
    });

    info!(
        "lisp-etr ready (direct: {}, uplinks: {}, ephemeral port: {:?})",
        direct
            .as_ref()
            .map_or_else(|| "disabled".to_string(), |d| d.listen_addr().to_string()),
        config.uplinks.len(),
        registry.ephemeral_port()
    );
    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, initiating shutdown...");
        }
        () = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
        }
        _ = shutdown_rx.recv() => {
            info!("Shutdown requested, initiating shutdown...");
        }
    }

    info!("Shutting down...");
    let _ = shutdown_tx.send(());
    let _ = ipc_shutdown.send(());

    let mut exit = Ok(());
    if let Some(handle) = direct_handle {
        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(Ok(Err(e))) => exit = Err(anyhow::anyhow!("Direct ingress failed: {}", e)),
            Ok(Err(e)) => error!("Direct ingress task panicked: {}", e),
            Err(_) => warn!("Direct ingress did not stop in time"),
            Ok(Ok(Ok(()))) => {}
        }
    }

    registry.shutdown().await;
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, ipc_handle).await;

    let snapshot = stats.snapshot();
    info!(
        "Final stats: {} forwarded, {} control, {} dropped",
        snapshot.get("good-packets"),
        snapshot.get("control-packets"),
        snapshot.dropped()
    );
    for (name, value) in snapshot.counters.iter().filter(|(_, v)| **v > 0) {
        info!("  {}: {}", name, value);
    }
    if let Some(ingress) = &direct {
        let s = ingress.stats_snapshot();
        info!(
            "Direct ingress: {} datagrams, {} bytes, {} restarts",
            s.datagrams, s.bytes, s.restarts
        );
    }

    info!("Shutdown complete");
    exit
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
