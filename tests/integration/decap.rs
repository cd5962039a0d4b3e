//! Dataplane tests: keys, counters and injection through the public API

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use lisp_etr::codec::{LispHeader, CONTROL_IID};
use lisp_etr::dataplane::Dataplane;
use lisp_etr::inject::PacketInjector;
use lisp_etr::keys::{DecapKeyEntry, DecapKeyStore, RlocKeys};
use lisp_etr::stats::{DecapCounter, DecapStats};

use super::{
    cleartext_lisp, encrypted_lisp, inner_packet, ipv4_udp_frame, key_set, RecordingInjector,
    DECRYPT_KEY, ICV_KEY,
};

const PEER: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 7);

struct Harness {
    dataplane: Dataplane,
    keys: Arc<DecapKeyStore>,
    stats: Arc<DecapStats>,
    injector: RecordingInjector,
}

fn harness() -> Harness {
    let keys = Arc::new(DecapKeyStore::new());
    let stats = Arc::new(DecapStats::new());
    Harness {
        dataplane: Dataplane::new(keys.clone(), stats.clone()),
        keys,
        stats,
        injector: RecordingInjector::default(),
    }
}

fn dest() -> Ipv6Addr {
    "fd00:1::42".parse().unwrap()
}

#[test]
fn test_encrypted_packet_forwarded() {
    let h = harness();
    h.keys.insert(IpAddr::V4(PEER), key_set(1));

    let inner = inner_packet(dest(), b"ping");
    let mut pkt = encrypted_lisp(&inner, 1);
    let counter = h
        .dataplane
        .verify_and_inject(&mut pkt, IpAddr::V4(PEER), &h.injector);

    assert_eq!(counter, DecapCounter::GoodPackets);
    assert_eq!(h.injector.sent(), vec![(inner, dest())]);
    assert_eq!(h.stats.get(DecapCounter::GoodPackets), 1);
}

#[test]
fn test_keys_are_per_rloc() {
    let h = harness();
    h.keys.insert(IpAddr::V4(PEER), key_set(1));

    let mut pkt = encrypted_lisp(&inner_packet(dest(), b"x"), 1);
    let other: IpAddr = "203.0.113.9".parse().unwrap();
    let counter = h.dataplane.verify_and_inject(&mut pkt, other, &h.injector);

    assert_eq!(counter, DecapCounter::NoDecryptKey);
    assert!(h.injector.sent().is_empty());
}

#[test]
fn test_key_rollover_between_slots() {
    let h = harness();
    let entry = RlocKeys {
        rloc: IpAddr::V4(PEER),
        keys: [1u8, 2]
            .iter()
            .map(|&key_id| DecapKeyEntry {
                key_id,
                icv_key: hex::encode(ICV_KEY),
                decrypt_key: hex::encode(DECRYPT_KEY),
            })
            .collect(),
    };
    h.keys.install(&entry).unwrap();

    for key_id in [1u8, 2] {
        let mut pkt = encrypted_lisp(&inner_packet(dest(), b"roll"), key_id);
        assert_eq!(
            h.dataplane
                .verify_and_inject(&mut pkt, IpAddr::V4(PEER), &h.injector),
            DecapCounter::GoodPackets
        );
    }

    // Slot 3 was never provisioned
    let mut pkt = encrypted_lisp(&inner_packet(dest(), b"roll"), 3);
    assert_eq!(
        h.dataplane
            .verify_and_inject(&mut pkt, IpAddr::V4(PEER), &h.injector),
        DecapCounter::NoDecryptKey
    );
    assert_eq!(h.injector.sent().len(), 2);
}

#[test]
fn test_removed_keys_stop_decryption() {
    let h = harness();
    h.keys.insert(IpAddr::V4(PEER), key_set(1));
    assert!(h.keys.remove(IpAddr::V4(PEER)));

    let mut pkt = encrypted_lisp(&inner_packet(dest(), b"late"), 1);
    assert_eq!(
        h.dataplane
            .verify_and_inject(&mut pkt, IpAddr::V4(PEER), &h.injector),
        DecapCounter::NoDecryptKey
    );
}

#[test]
fn test_tampered_packet_counts_icv_error() {
    let h = harness();
    h.keys.insert(IpAddr::V4(PEER), key_set(1));

    let mut pkt = encrypted_lisp(&inner_packet(dest(), b"evil"), 1);
    let mid = pkt.len() / 2;
    pkt[mid] ^= 0x80;

    assert_eq!(
        h.dataplane
            .verify_and_inject(&mut pkt, IpAddr::V4(PEER), &h.injector),
        DecapCounter::IcvError
    );
    assert!(h.injector.sent().is_empty());
}

#[test]
fn test_control_and_cleartext() {
    let h = harness();

    let mut control = LispHeader::encode(CONTROL_IID, 0).to_vec();
    control.extend_from_slice(b"probe");
    assert_eq!(
        h.dataplane
            .verify_and_inject(&mut control, IpAddr::V4(PEER), &h.injector),
        DecapCounter::ControlPackets
    );

    let inner = inner_packet(dest(), b"clear");
    let mut clear = cleartext_lisp(&inner);
    assert_eq!(
        h.dataplane
            .verify_and_inject(&mut clear, IpAddr::V4(PEER), &h.injector),
        DecapCounter::GoodPackets
    );
    assert_eq!(h.injector.sent(), vec![(inner, dest())]);
}

#[test]
fn test_every_packet_counted_once() {
    let h = harness();
    h.keys.insert(IpAddr::V4(PEER), key_set(1));

    let inner = inner_packet(dest(), b"mix");
    let mut inputs: Vec<Vec<u8>> = vec![
        encrypted_lisp(&inner, 1),
        encrypted_lisp(&inner, 2),
        cleartext_lisp(&inner),
        vec![0u8; 4],
        cleartext_lisp(&[0x45, 0, 0, 0]),
    ];
    for pkt in &mut inputs {
        h.dataplane
            .verify_and_inject(pkt, IpAddr::V4(PEER), &h.injector);
    }

    let total: u64 = DecapCounter::ALL.iter().map(|c| h.stats.get(*c)).sum();
    assert_eq!(total, inputs.len() as u64);
    assert_eq!(h.stats.get(DecapCounter::GoodPackets), 2);
    assert_eq!(h.stats.get(DecapCounter::NoDecryptKey), 1);
    assert_eq!(h.stats.get(DecapCounter::HeaderError), 1);
    assert_eq!(h.stats.get(DecapCounter::BadInnerVersion), 1);
}

#[test]
fn test_inject_failure_counted() {
    let h = harness();
    h.injector.close();

    let mut pkt = cleartext_lisp(&inner_packet(dest(), b"x"));
    assert_eq!(
        h.dataplane
            .verify_and_inject(&mut pkt, IpAddr::V4(PEER), &h.injector),
        DecapCounter::InjectError
    );
    assert_eq!(h.stats.get(DecapCounter::GoodPackets), 0);
}

#[test]
fn test_captured_frame_uses_outer_source() {
    let h = harness();
    h.keys.insert(IpAddr::V4(PEER), key_set(1));

    let inner = inner_packet(dest(), b"nat");
    let mut frame = ipv4_udp_frame(PEER, 4341, 51000, &encrypted_lisp(&inner, 1));
    let counter = h.dataplane.process_frame(&mut frame, &h.injector);

    assert_eq!(counter, Some(DecapCounter::GoodPackets));
    assert_eq!(h.injector.sent(), vec![(inner, dest())]);
    assert_eq!(h.stats.get(DecapCounter::ChecksumError), 0);
}

#[test]
fn test_bad_outer_checksum_still_processed() {
    let h = harness();

    let inner = inner_packet(dest(), b"csum");
    let mut frame = ipv4_udp_frame(PEER, 4341, 51000, &cleartext_lisp(&inner));
    // Corrupt the IPv4 checksum field
    frame[24] ^= 0xFF;

    let counter = h.dataplane.process_frame(&mut frame, &h.injector);
    assert_eq!(counter, Some(DecapCounter::GoodPackets));
    assert_eq!(h.stats.get(DecapCounter::ChecksumError), 1);
    assert_eq!(h.injector.sent().len(), 1);
}

#[test]
fn test_non_ip_frame() {
    let h = harness();

    let mut frame = vec![0u8; 60];
    frame[12..14].copy_from_slice(&0x0806u16.to_be_bytes());

    assert_eq!(
        h.dataplane.process_frame(&mut frame, &h.injector),
        Some(DecapCounter::OuterHeaderError)
    );
    assert_eq!(h.stats.get(DecapCounter::OuterHeaderError), 1);
}
