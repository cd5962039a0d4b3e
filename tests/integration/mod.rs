//! Integration tests for lisp-etr
//!
//! These tests drive the public API end to end with in-memory sockets, so
//! they need neither `CAP_NET_RAW` nor real uplinks.
//!
//! # Test Organization
//!
//! - `decap`: dataplane verification, decryption and injection
//! - `registry`: uplink/port reconciliation with live capture workers
//! - `ipc`: control socket commands against a running server
//! - `config`: file loading and validation
//!
//! # Running Tests
//!
//! ```bash
//! cargo test --test integration_tests
//!
//! # Run specific test module
//! cargo test --test integration_tests registry
//! ```

pub mod config;
pub mod decap;
pub mod ipc;
pub mod registry;

use std::collections::VecDeque;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lisp_etr::capture::{CaptureHandle, FilterProgram};
use lisp_etr::codec::{compute_icv, LispHeader, IV_LEN};
use lisp_etr::error::{CaptureError, InjectError};
use lisp_etr::inject::PacketInjector;
use lisp_etr::keys::{DecapKey, KeySet};
use lisp_etr::provider::SocketProvider;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Mock sockets
// ============================================================================

/// In-memory capture handle fed by the test
pub struct FakeCapture {
    interface: String,
    frames: Mutex<VecDeque<Vec<u8>>>,
    filters: Mutex<Vec<String>>,
    ready: Notify,
    cancel: CancellationToken,
    closes: AtomicUsize,
}

impl FakeCapture {
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            frames: Mutex::new(VecDeque::new()),
            filters: Mutex::new(Vec::new()),
            ready: Notify::new(),
            cancel: CancellationToken::new(),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn push_frame(&self, frame: Vec<u8>) {
        self.frames.lock().push_back(frame);
        self.ready.notify_one();
    }

    /// Every filter expression attached, oldest first
    pub fn filters(&self) -> Vec<String> {
        self.filters.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureHandle for FakeCapture {
    async fn read_frame(&self, buf: &mut [u8]) -> Result<usize, CaptureError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(CaptureError::Closed);
            }
            let next = self.frames.lock().pop_front();
            if let Some(frame) = next {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                return Ok(n);
            }
            tokio::select! {
                () = self.cancel.cancelled() => return Err(CaptureError::Closed),
                () = self.ready.notified() => {}
            }
        }
    }

    fn set_filter(&self, program: &FilterProgram) -> Result<(), CaptureError> {
        if self.cancel.is_cancelled() {
            return Err(CaptureError::Closed);
        }
        self.filters.lock().push(program.expression().to_string());
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
    }

    fn interface(&self) -> &str {
        &self.interface
    }
}

/// Injector that records every packet
#[derive(Default)]
pub struct RecordingInjector {
    sent: Mutex<Vec<(Vec<u8>, Ipv6Addr)>>,
    closed: AtomicBool,
}

impl RecordingInjector {
    pub fn sent(&self) -> Vec<(Vec<u8>, Ipv6Addr)> {
        self.sent.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PacketInjector for RecordingInjector {
    fn inject(&self, packet: &[u8], dest: Ipv6Addr) -> Result<(), InjectError> {
        if self.is_closed() {
            return Err(InjectError::Closed);
        }
        self.sent.lock().push((packet.to_vec(), dest));
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Provider handing out [`FakeCapture`]s and [`RecordingInjector`]s
#[derive(Default)]
pub struct FakeProvider {
    captures: Mutex<Vec<Arc<FakeCapture>>>,
    injectors: Mutex<Vec<Arc<RecordingInjector>>>,
    fail_capture: AtomicBool,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_capture(&self, fail: bool) {
        self.fail_capture.store(fail, Ordering::SeqCst);
    }

    pub fn captures_on(&self, interface: &str) -> Vec<Arc<FakeCapture>> {
        self.captures
            .lock()
            .iter()
            .filter(|c| c.interface == interface)
            .cloned()
            .collect()
    }

    pub fn captures(&self) -> Vec<Arc<FakeCapture>> {
        self.captures.lock().clone()
    }

    pub fn injectors(&self) -> Vec<Arc<RecordingInjector>> {
        self.injectors.lock().clone()
    }

    /// Packets injected through any injector
    pub fn injected(&self) -> Vec<(Vec<u8>, Ipv6Addr)> {
        self.injectors.lock().iter().flat_map(|i| i.sent()).collect()
    }
}

impl SocketProvider for FakeProvider {
    fn open_capture(
        &self,
        interface: &str,
        program: &FilterProgram,
    ) -> Result<Arc<dyn CaptureHandle>, CaptureError> {
        if self.fail_capture.load(Ordering::SeqCst) {
            return Err(CaptureError::InterfaceNotFound(interface.to_string()));
        }
        let capture = Arc::new(FakeCapture::new(interface));
        capture.set_filter(program)?;
        self.captures.lock().push(Arc::clone(&capture));
        Ok(capture)
    }

    fn open_injector(&self) -> Result<Arc<dyn PacketInjector>, InjectError> {
        let injector = Arc::new(RecordingInjector::default());
        self.injectors.lock().push(Arc::clone(&injector));
        Ok(injector)
    }
}

// ============================================================================
// Packet builders
// ============================================================================

pub const ICV_KEY: &[u8] = b"integration-icv-key!";
pub const DECRYPT_KEY: [u8; 32] = [0x3C; 32];
pub const IV: [u8; IV_LEN] = [9, 8, 7, 6, 5, 4, 3, 2];

pub fn decap_key() -> DecapKey {
    DecapKey::new(ICV_KEY, &DECRYPT_KEY).unwrap()
}

pub fn key_set(key_id: u8) -> KeySet {
    KeySet::new().with_key(key_id, decap_key()).unwrap()
}

/// IPv6 packet to `dest` carrying `body`
pub fn inner_packet(dest: Ipv6Addr, body: &[u8]) -> Vec<u8> {
    let mut pkt = vec![0u8; 40];
    pkt[0] = 0x60;
    pkt[4..6].copy_from_slice(&(body.len() as u16).to_be_bytes());
    pkt[6] = 58;
    pkt[7] = 64;
    pkt[8..24].copy_from_slice(&Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 0x99).octets());
    pkt[24..40].copy_from_slice(&dest.octets());
    pkt.extend_from_slice(body);
    pkt
}

pub fn cleartext_lisp(inner: &[u8]) -> Vec<u8> {
    let mut pkt = LispHeader::encode(4096, 0).to_vec();
    pkt.extend_from_slice(inner);
    pkt
}

pub fn encrypted_lisp(inner: &[u8], key_id: u8) -> Vec<u8> {
    let mut sealed = inner.to_vec();
    decap_key()
        .cipher()
        .unwrap()
        .seal_in_place(&IV, &mut sealed)
        .unwrap();

    let mut pkt = LispHeader::encode(4096, key_id).to_vec();
    pkt.extend_from_slice(&IV);
    pkt.extend_from_slice(&sealed);
    let icv = compute_icv(&pkt, ICV_KEY).unwrap();
    pkt.extend_from_slice(&icv);
    pkt
}

/// Ethernet + IPv4 + UDP frame from `src`
pub fn ipv4_udp_frame(src: Ipv4Addr, src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; 12];
    frame.extend_from_slice(&0x0800u16.to_be_bytes());

    let total = (20 + 8 + payload.len()) as u16;
    let mut ip = [0u8; 20];
    ip[0] = 0x45;
    ip[2..4].copy_from_slice(&total.to_be_bytes());
    ip[8] = 64;
    ip[9] = 17;
    ip[12..16].copy_from_slice(&src.octets());
    ip[16..20].copy_from_slice(&[192, 0, 2, 10]);
    let csum = ipv4_checksum(&ip);
    ip[10..12].copy_from_slice(&csum.to_be_bytes());
    frame.extend_from_slice(&ip);

    frame.extend_from_slice(&src_port.to_be_bytes());
    frame.extend_from_slice(&dst_port.to_be_bytes());
    frame.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(payload);
    frame
}

fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = header
        .chunks(2)
        .map(|w| u32::from(u16::from_be_bytes([w[0], w[1]])))
        .sum();
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Poll `cond` until it holds or two seconds pass
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
