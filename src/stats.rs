//! Decapsulation statistics
//!
//! Every packet outcome maps to one named counter. The dataplane only ever
//! increments counters through the [`StatsSink`] trait; [`DecapStats`] is the
//! in-process implementation backing the IPC `get_stats` command.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Named decapsulation counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecapCounter {
    /// Packet forwarded to the local stack
    GoodPackets,
    /// Control probe (reserved instance id), handled but not forwarded
    ControlPackets,
    /// Packet shorter than the LISP header
    HeaderError,
    /// Encrypted packet without a usable key
    NoDecryptKey,
    /// ICV mismatch
    IcvError,
    /// AEAD open failure
    DecryptError,
    /// Inner packet is not IPv6
    BadInnerVersion,
    /// Inner packet shorter than an IPv6 header
    InnerHeaderError,
    /// Captured frame carries neither IPv4 nor IPv6
    OuterHeaderError,
    /// Outer IPv4 header checksum invalid (not a drop)
    ChecksumError,
    /// Raw send failed
    InjectError,
}

impl DecapCounter {
    /// All counters, in export order
    pub const ALL: [Self; 11] = [
        Self::GoodPackets,
        Self::ControlPackets,
        Self::HeaderError,
        Self::NoDecryptKey,
        Self::IcvError,
        Self::DecryptError,
        Self::BadInnerVersion,
        Self::InnerHeaderError,
        Self::OuterHeaderError,
        Self::ChecksumError,
        Self::InjectError,
    ];

    /// Exported counter name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GoodPackets => "good-packets",
            Self::ControlPackets => "control-packets",
            Self::HeaderError => "lisp-header-error",
            Self::NoDecryptKey => "no-decrypt-key",
            Self::IcvError => "ICV-error",
            Self::DecryptError => "decrypt-error",
            Self::BadInnerVersion => "bad-inner-version",
            Self::InnerHeaderError => "inner-header-error",
            Self::OuterHeaderError => "outer-header-error",
            Self::ChecksumError => "checksum-error",
            Self::InjectError => "inject-error",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for DecapCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink for decapsulation counters.
///
/// Implementations must be safe to call concurrently from every ingestion task.
pub trait StatsSink: Send + Sync {
    /// Add `delta` to the named counter
    fn add_stat(&self, counter: DecapCounter, delta: u64);
}

/// Atomic decapsulation counters
#[derive(Debug, Default)]
pub struct DecapStats {
    counters: [AtomicU64; DecapCounter::ALL.len()],
}

impl DecapStats {
    /// Create a zeroed counter table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of one counter
    #[must_use]
    pub fn get(&self, counter: DecapCounter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    /// Get a snapshot of all counters
    #[must_use]
    pub fn snapshot(&self) -> DecapStatsSnapshot {
        let counters = DecapCounter::ALL
            .iter()
            .map(|c| (c.as_str().to_string(), self.get(*c)))
            .collect();

        DecapStatsSnapshot {
            counters,
            timestamp_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }
}

impl StatsSink for DecapStats {
    fn add_stat(&self, counter: DecapCounter, delta: u64) {
        self.counters[counter.index()].fetch_add(delta, Ordering::Relaxed);
    }
}

/// Snapshot of decapsulation counters at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecapStatsSnapshot {
    /// Counter name to value
    pub counters: BTreeMap<String, u64>,
    /// Timestamp in milliseconds
    pub timestamp_ms: u64,
}

impl DecapStatsSnapshot {
    /// Value of a counter by exported name, zero if unknown
    #[must_use]
    pub fn get(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// Total packets dropped (everything except forwarded, control and checksum)
    #[must_use]
    pub fn dropped(&self) -> u64 {
        DecapCounter::ALL
            .iter()
            .filter(|c| {
                !matches!(
                    c,
                    DecapCounter::GoodPackets
                        | DecapCounter::ControlPackets
                        | DecapCounter::ChecksumError
                )
            })
            .map(|c| self.get(c.as_str()))
            .sum()
    }
}
