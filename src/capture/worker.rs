//! Per-uplink capture worker loop

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::{debug, info, warn};

use super::CaptureHandle;
use crate::dataplane::Dataplane;
use crate::error::CaptureError;
use crate::inject::PacketInjector;

/// Read buffer size, large enough for any frame the kernel hands out
pub const FRAME_BUFFER_SIZE: usize = 65536;

/// Read frames from `handle` until shut down.
///
/// The loop exits when `shutdown` fires (or its sender is dropped), or when
/// the handle reports [`CaptureError::Closed`]. Any other read error is
/// transient and the loop keeps going.
pub async fn run_capture(
    handle: Arc<dyn CaptureHandle>,
    injector: Arc<dyn PacketInjector>,
    dataplane: Arc<Dataplane>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let interface = handle.interface().to_string();
    let mut buf = vec![0u8; FRAME_BUFFER_SIZE];
    let mut frames: u64 = 0;

    info!("Capture worker started on {}", interface);

    loop {
        let result = tokio::select! {
            biased;
            _ = &mut shutdown => {
                debug!("Capture worker on {} signalled", interface);
                break;
            }
            result = handle.read_frame(&mut buf) => result,
        };

        match result {
            Ok(n) => {
                frames += 1;
                dataplane.process_frame(&mut buf[..n], injector.as_ref());
            }
            Err(e) => {
                match shutdown.try_recv() {
                    Ok(()) | Err(TryRecvError::Closed) => {
                        debug!("Capture worker on {} stopping after read error: {}", interface, e);
                        break;
                    }
                    Err(TryRecvError::Empty) => {}
                }
                if matches!(e, CaptureError::Closed) {
                    warn!("Capture handle on {} closed without shutdown signal", interface);
                    break;
                }
                debug!("Transient capture error on {}: {}", interface, e);
                tokio::task::yield_now().await;
            }
        }
    }

    info!(
        "Capture worker on {} stopped after {} frames",
        interface, frames
    );
}
