//! Uplink registry tests with live capture workers over fake sockets

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use lisp_etr::capture::PortMatchCompiler;
use lisp_etr::dataplane::Dataplane;
use lisp_etr::keys::DecapKeyStore;
use lisp_etr::stats::{DecapCounter, DecapStats};
use lisp_etr::uplink::{PreferredAddrs, Uplink, UplinkRegistry};

use super::{
    encrypted_lisp, inner_packet, ipv4_udp_frame, key_set, wait_until, FakeProvider,
};

const PEER: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 7);

struct Harness {
    registry: UplinkRegistry,
    provider: Arc<FakeProvider>,
    keys: Arc<DecapKeyStore>,
    stats: Arc<DecapStats>,
    addrs: Arc<PreferredAddrs>,
}

fn harness() -> Harness {
    let keys = Arc::new(DecapKeyStore::new());
    let stats = Arc::new(DecapStats::new());
    let addrs = Arc::new(PreferredAddrs::new());
    let provider = Arc::new(FakeProvider::new());
    let dataplane = Arc::new(Dataplane::new(keys.clone(), stats.clone()));
    let registry = UplinkRegistry::new(
        provider.clone(),
        Arc::new(PortMatchCompiler::default()),
        dataplane,
        addrs.clone(),
        4341,
    );
    Harness {
        registry,
        provider,
        keys,
        stats,
        addrs,
    }
}

fn uplink(name: &str, addrs: &[&str]) -> Uplink {
    Uplink::new(name, addrs.iter().map(|a| a.parse().unwrap()).collect())
}

#[tokio::test]
async fn test_nat_return_traffic_flows_through_capture() {
    let h = harness();
    h.keys.insert(IpAddr::V4(PEER), key_set(1));

    h.registry.on_uplink_set_changed(&[uplink("eth0", &["192.0.2.10"])]);
    h.registry.on_ephemeral_port_changed(51000);

    let captures = h.provider.captures_on("eth0");
    assert_eq!(captures.len(), 1);
    assert_eq!(
        captures[0].filters(),
        vec!["udp dst port 51000 and udp src port 4341".to_string()]
    );

    let dest: Ipv6Addr = "fd00:1::42".parse().unwrap();
    let inner = inner_packet(dest, b"through-nat");
    captures[0].push_frame(ipv4_udp_frame(PEER, 4341, 51000, &encrypted_lisp(&inner, 1)));

    wait_until(|| h.stats.get(DecapCounter::GoodPackets) == 1).await;
    assert_eq!(h.provider.injected(), vec![(inner, dest)]);

    h.registry.shutdown().await;
}

#[tokio::test]
async fn test_port_change_retargets_without_reopening() {
    let h = harness();
    h.registry.on_uplink_set_changed(&[uplink("eth0", &[])]);
    h.registry.on_ephemeral_port_changed(51000);
    h.registry.on_ephemeral_port_changed(51000);
    h.registry.on_ephemeral_port_changed(51500);

    let captures = h.provider.captures_on("eth0");
    assert_eq!(captures.len(), 1);
    assert_eq!(
        captures[0].filters(),
        vec![
            "udp dst port 51000 and udp src port 4341".to_string(),
            "udp dst port 51500 and udp src port 4341".to_string(),
        ]
    );
    assert_eq!(h.registry.snapshot().filter_updates, 1);

    h.registry.shutdown().await;
}

#[tokio::test]
async fn test_uplink_lifecycle() {
    let h = harness();
    h.registry.on_ephemeral_port_changed(51000);

    h.registry
        .on_uplink_set_changed(&[uplink("eth0", &[]), uplink("wlan0", &[])]);
    assert_eq!(h.registry.active_captures(), 2);

    // Repeating the same set changes nothing
    h.registry
        .on_uplink_set_changed(&[uplink("eth0", &[]), uplink("wlan0", &[])]);
    assert_eq!(h.provider.captures().len(), 2);

    h.registry.on_uplink_set_changed(&[uplink("eth0", &[])]);
    let wlan = &h.provider.captures_on("wlan0")[0];
    assert_eq!(wlan.close_count(), 1);
    assert_eq!(h.registry.active_captures(), 1);

    let snapshot = h.registry.snapshot();
    assert_eq!(snapshot.captures_started, 2);
    assert_eq!(snapshot.captures_stopped, 1);
    assert_eq!(snapshot.uplinks.len(), 1);
    assert_eq!(snapshot.uplinks[0].name, "eth0");

    h.registry.shutdown().await;
    assert_eq!(h.provider.captures_on("eth0")[0].close_count(), 1);
    assert!(h.provider.injectors().iter().all(|i| i.is_closed()));
}

#[tokio::test]
async fn test_metered_uplink_not_captured() {
    let h = harness();
    h.registry.on_ephemeral_port_changed(51000);

    let mut cell = uplink("wwan0", &["203.0.113.5"]);
    cell.free = false;
    h.registry.on_uplink_set_changed(&[cell]);

    assert!(h.provider.captures().is_empty());
    assert_eq!(h.addrs.get().v4, None);
}

#[tokio::test]
async fn test_failed_open_retried_on_next_port() {
    let h = harness();
    h.provider.set_fail_capture(true);
    h.registry.on_ephemeral_port_changed(51000);
    h.registry.on_uplink_set_changed(&[uplink("eth0", &[])]);
    assert_eq!(h.registry.active_captures(), 0);
    assert_eq!(h.registry.snapshot().open_failures, 1);

    h.provider.set_fail_capture(false);
    h.registry.on_ephemeral_port_changed(51001);
    assert_eq!(h.registry.active_captures(), 1);
    assert_eq!(
        h.provider.captures_on("eth0")[0].filters(),
        vec!["udp dst port 51001 and udp src port 4341".to_string()]
    );

    h.registry.shutdown().await;
}

#[tokio::test]
async fn test_preferred_addresses_published() {
    let h = harness();
    h.registry.on_uplink_set_changed(&[
        uplink("eth0", &["fe80::1", "192.0.2.10", "2001:db8::10"]),
        uplink("wlan0", &["192.0.2.20"]),
    ]);

    let addrs = h.addrs.get();
    assert_eq!(addrs.v4, Some("192.0.2.10".parse().unwrap()));
    assert_eq!(addrs.v6, Some("2001:db8::10".parse().unwrap()));
}
