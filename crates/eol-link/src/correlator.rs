//! Freshness correlation of feedback frames
//!
//! After toggling an output, the bench waits for the device to confirm the
//! new state. The buffer may already hold an older frame with the same
//! identifier, so the correlator only accepts a frame that arrived strictly
//! after the newest one present when the wait started.

use std::time::Duration;

use eol_protocol::Frame;
use tokio::time::Instant;
use tracing::trace;

use crate::buffer::FrameBuffer;

/// Interval between buffer scans
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Wait for a frame with `id` newer than the current baseline.
///
/// Returns `None` once `deadline` has elapsed without a fresh frame. The
/// buffer lock is only taken for each scan; the wait itself is a tokio sleep.
pub async fn await_fresh(frames: &FrameBuffer, id: u32, deadline: Duration) -> Option<Frame> {
    let baseline = frames.latest(id).map(|frame| frame.timestamp());
    let started = Instant::now();

    loop {
        if let Some(frame) = frames.latest_after(id, baseline) {
            trace!(
                "Fresh frame 0x{:03X} after {:?}",
                id,
                started.elapsed()
            );
            return Some(frame);
        }

        let elapsed = started.elapsed();
        if elapsed >= deadline {
            trace!("No fresh frame 0x{:03X} within {:?}", id, deadline);
            return None;
        }
        tokio::time::sleep(POLL_INTERVAL.min(deadline - elapsed)).await;
    }
}
