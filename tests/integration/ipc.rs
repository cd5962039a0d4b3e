//! Control socket tests against a running IPC server

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use lisp_etr::capture::PortMatchCompiler;
use lisp_etr::config::IpcConfig;
use lisp_etr::dataplane::Dataplane;
use lisp_etr::ipc::{ErrorCode, IpcClient, IpcCommand, IpcHandler, IpcResponse, IpcServer};
use lisp_etr::keys::{DecapKeyEntry, DecapKeyStore};
use lisp_etr::stats::DecapStats;
use lisp_etr::uplink::{PreferredAddrs, Uplink, UplinkRegistry};
use tempfile::TempDir;
use tokio::sync::broadcast;

use super::{
    encrypted_lisp, inner_packet, ipv4_udp_frame, wait_until, FakeProvider, DECRYPT_KEY, ICV_KEY,
};

struct Running {
    client: IpcClient,
    server: Arc<IpcServer>,
    registry: Arc<UplinkRegistry>,
    provider: Arc<FakeProvider>,
    shutdown_rx: broadcast::Receiver<()>,
    _dir: TempDir,
}

async fn start() -> Running {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("lisp-etr.sock");

    let keys = Arc::new(DecapKeyStore::new());
    let stats = Arc::new(DecapStats::new());
    let addrs = Arc::new(PreferredAddrs::new());
    let provider = Arc::new(FakeProvider::new());
    let dataplane = Arc::new(Dataplane::new(keys.clone(), stats.clone()));
    let registry = Arc::new(UplinkRegistry::new(
        provider.clone(),
        Arc::new(PortMatchCompiler::default()),
        dataplane,
        addrs.clone(),
        4341,
    ));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handler = IpcHandler::new(Arc::clone(&registry), keys, stats, addrs, shutdown_tx);
    let config = IpcConfig {
        socket_path: socket_path.clone(),
        ..IpcConfig::default()
    };
    let server = Arc::new(IpcServer::new(config, Arc::new(handler)));
    tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.run().await }
    });
    wait_for_socket(&socket_path).await;

    Running {
        client: IpcClient::new(&socket_path),
        server,
        registry,
        provider,
        shutdown_rx,
        _dir: dir,
    }
}

async fn wait_for_socket(path: &Path) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !path.exists() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_control_plane_session() {
    let r = start().await;
    assert!(r.client.ping().await.unwrap());

    let peer: IpAddr = "198.51.100.7".parse().unwrap();
    let resp = r
        .client
        .send(IpcCommand::SetDecapKeys {
            rloc: peer,
            keys: vec![DecapKeyEntry {
                key_id: 1,
                icv_key: hex::encode(ICV_KEY),
                decrypt_key: hex::encode(DECRYPT_KEY),
            }],
        })
        .await
        .unwrap();
    assert!(!resp.is_error());

    let resp = r
        .client
        .send(IpcCommand::SetUplinks {
            uplinks: vec![Uplink::new("eth0", vec!["192.0.2.10".parse().unwrap()])],
        })
        .await
        .unwrap();
    assert!(!resp.is_error());

    let resp = r
        .client
        .send(IpcCommand::SetEphemeralPort { port: 51000 })
        .await
        .unwrap();
    assert!(!resp.is_error());
    assert_eq!(r.registry.active_captures(), 1);

    // Feed one NAT return packet through the capture
    let dest: Ipv6Addr = "fd00:1::42".parse().unwrap();
    let inner = inner_packet(dest, b"hello");
    r.provider.captures_on("eth0")[0].push_frame(ipv4_udp_frame(
        Ipv4Addr::new(198, 51, 100, 7),
        4341,
        51000,
        &encrypted_lisp(&inner, 1),
    ));
    wait_until(|| !r.provider.injected().is_empty()).await;

    match r.client.send(IpcCommand::GetStats).await.unwrap() {
        IpcResponse::Stats(stats) => {
            assert_eq!(stats.decap.get("good-packets"), 1);
            assert_eq!(stats.decap.dropped(), 0);
        }
        other => panic!("unexpected response {other:?}"),
    }

    match r.client.send(IpcCommand::Status).await.unwrap() {
        IpcResponse::Status(status) => {
            assert_eq!(status.registry.ephemeral_port, Some(51000));
            assert_eq!(status.rlocs_with_keys, 1);
            assert_eq!(status.preferred_v4, Some("192.0.2.10".parse().unwrap()));
        }
        other => panic!("unexpected response {other:?}"),
    }

    r.registry.shutdown().await;
    r.server.shutdown();
}

#[tokio::test]
async fn test_invalid_requests_rejected() {
    let r = start().await;

    let resp = r
        .client
        .send(IpcCommand::SetDecapKeys {
            rloc: "192.0.2.99".parse().unwrap(),
            keys: vec![DecapKeyEntry {
                key_id: 0,
                icv_key: String::new(),
                decrypt_key: hex::encode([0u8; 16]),
            }],
        })
        .await
        .unwrap();
    assert!(matches!(
        resp,
        IpcResponse::Error(ref e) if e.code == ErrorCode::InvalidParameters
    ));

    let resp = r
        .client
        .send(IpcCommand::RemoveDecapKeys {
            rloc: "192.0.2.99".parse().unwrap(),
        })
        .await
        .unwrap();
    assert!(matches!(resp, IpcResponse::Error(ref e) if e.code == ErrorCode::NotFound));

    r.server.shutdown();
}

#[tokio::test]
async fn test_shutdown_command_signals_process() {
    let mut r = start().await;

    let resp = r.client.send(IpcCommand::Shutdown).await.unwrap();
    assert!(!resp.is_error());
    tokio::time::timeout(Duration::from_secs(2), r.shutdown_rx.recv())
        .await
        .unwrap()
        .unwrap();

    let resp = r
        .client
        .send(IpcCommand::SetEphemeralPort { port: 51000 })
        .await
        .unwrap();
    assert!(matches!(resp, IpcResponse::Error(ref e) if e.code == ErrorCode::ShuttingDown));

    r.server.shutdown();
}
