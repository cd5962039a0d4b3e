//! Decapsulate-and-inject glue shared by every ingestion path

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::capture::{locate_udp_payload, FrameError};
use crate::codec::{decapsulate, DecapOutcome};
use crate::inject::PacketInjector;
use crate::keys::KeyStore;
use crate::stats::{DecapCounter, StatsSink};

/// Shared decapsulation state: key lookup and counters
pub struct Dataplane {
    keys: Arc<dyn KeyStore>,
    stats: Arc<dyn StatsSink>,
}

impl Dataplane {
    /// Create a dataplane over the given key store and stats sink
    pub fn new(keys: Arc<dyn KeyStore>, stats: Arc<dyn StatsSink>) -> Self {
        Self { keys, stats }
    }

    /// Decapsulate one LISP payload received from `src` and inject it.
    ///
    /// Every call increments exactly one outcome counter, which is returned.
    pub fn verify_and_inject(
        &self,
        payload: &mut [u8],
        src: IpAddr,
        injector: &dyn PacketInjector,
    ) -> DecapCounter {
        let keys = self.keys.lookup_decap_keys(src);

        let counter = match decapsulate(payload, keys.as_deref()) {
            Ok(DecapOutcome::Control) => {
                trace!("Control packet from RLOC {}", src);
                DecapCounter::ControlPackets
            }
            Ok(DecapOutcome::Data(inner)) => match injector.inject(inner.payload, inner.dest) {
                Ok(()) => {
                    trace!(
                        "Injected {} bytes from RLOC {} to {}",
                        inner.payload.len(),
                        src,
                        inner.dest
                    );
                    DecapCounter::GoodPackets
                }
                Err(e) => {
                    debug!("Failed injecting packet from RLOC {}: {}", src, e);
                    DecapCounter::InjectError
                }
            },
            Err(reason) => {
                debug!("Dropped packet from RLOC {}: {}", src, reason);
                reason.counter()
            }
        };

        self.stats.add_stat(counter, 1);
        counter
    }

    /// Handle one captured link-layer frame.
    ///
    /// Returns the outcome counter for decapsulated datagrams, `None` for
    /// frames that carry no UDP payload.
    pub fn process_frame(
        &self,
        frame: &mut [u8],
        injector: &dyn PacketInjector,
    ) -> Option<DecapCounter> {
        let datagram = match locate_udp_payload(frame) {
            Ok(Some(d)) => d,
            Ok(None) => return None,
            Err(FrameError::NotIp) => {
                self.stats.add_stat(DecapCounter::OuterHeaderError, 1);
                return Some(DecapCounter::OuterHeaderError);
            }
        };

        // Counted, still processed
        if !datagram.checksum_ok {
            debug!("Outer IPv4 checksum mismatch from {}", datagram.src);
            self.stats.add_stat(DecapCounter::ChecksumError, 1);
        }

        Some(self.verify_and_inject(&mut frame[datagram.payload], datagram.src, injector))
    }
}

impl std::fmt::Debug for Dataplane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataplane").finish_non_exhaustive()
    }
}
