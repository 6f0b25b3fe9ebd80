//! Bounded store of recently received frames

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use eol_protocol::Frame;
use parking_lot::Mutex;

/// Number of frames retained before the oldest is evicted
pub const FRAME_BUFFER_CAPACITY: usize = 100;

/// Shared FIFO of the most recent bus frames.
///
/// The listener is the only writer; the correlator and diagnostics read it.
/// The lock is held only for one append or one scan, never across a wait.
/// Clones share the same storage.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    frames: Arc<Mutex<VecDeque<Frame>>>,
    capacity: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_capacity(FRAME_BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest when full
    pub fn push(&self, frame: Frame) {
        let mut frames = self.frames.lock();
        if frames.len() == self.capacity {
            frames.pop_front();
        }
        frames.push_back(frame);
    }

    /// Most recent frame with this identifier
    pub fn latest(&self, id: u32) -> Option<Frame> {
        self.frames
            .lock()
            .iter()
            .rev()
            .find(|frame| frame.id() == id)
            .copied()
    }

    /// Most recent frame with this identifier that arrived strictly after
    /// `baseline` (any matching frame when there is no baseline)
    pub fn latest_after(&self, id: u32, baseline: Option<Instant>) -> Option<Frame> {
        self.latest(id).filter(|frame| match baseline {
            Some(baseline) => frame.timestamp() > baseline,
            None => true,
        })
    }

    /// Copy of the buffer contents, oldest first
    pub fn snapshot(&self) -> Vec<Frame> {
        self.frames.lock().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frame(id: u32, byte: u8) -> Frame {
        Frame::new(id, &[byte]).unwrap()
    }

    #[test]
    fn test_latest_scans_newest_first() {
        let buffer = FrameBuffer::new();
        buffer.push(frame(0x30, 1));
        buffer.push(frame(0x40, 2));
        buffer.push(frame(0x30, 3));

        assert_eq!(buffer.latest(0x30).unwrap().data(), &[3]);
        assert_eq!(buffer.latest(0x40).unwrap().data(), &[2]);
        assert!(buffer.latest(0x50).is_none());
    }

    #[test]
    fn test_latest_after_baseline() {
        let buffer = FrameBuffer::new();
        let base = Instant::now();
        buffer.push(frame(0x30, 1).with_timestamp(base));

        assert!(buffer.latest_after(0x30, Some(base)).is_none());
        assert!(buffer.latest_after(0x30, None).is_some());

        buffer.push(frame(0x30, 2).with_timestamp(base + Duration::from_millis(1)));
        assert_eq!(buffer.latest_after(0x30, Some(base)).unwrap().data(), &[2]);
    }

    #[test]
    fn test_eviction_keeps_last_frames() {
        let buffer = FrameBuffer::with_capacity(3);
        for i in 0..5u8 {
            buffer.push(frame(0x10, i));
        }

        let bytes: Vec<u8> = buffer.snapshot().iter().map(|f| f.data()[0]).collect();
        assert_eq!(bytes, vec![2, 3, 4]);
    }

    #[test]
    fn test_clones_share_storage() {
        let buffer = FrameBuffer::new();
        let reader = buffer.clone();
        buffer.push(frame(0x30, 1));
        assert_eq!(reader.len(), 1);
        reader.clear();
        assert!(buffer.is_empty());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// The buffer never exceeds its capacity and keeps the newest frames in arrival order
            #[test]
            fn bounded_and_ordered(count in 0usize..400) {
                let buffer = FrameBuffer::new();
                for i in 0..count {
                    buffer.push(Frame::new((i % 0x7FF) as u32, &(i as u32).to_be_bytes()).unwrap());
                    prop_assert!(buffer.len() <= FRAME_BUFFER_CAPACITY);
                }

                let kept: Vec<u32> = buffer
                    .snapshot()
                    .iter()
                    .map(|f| u32::from_be_bytes([f.data()[0], f.data()[1], f.data()[2], f.data()[3]]))
                    .collect();
                let first = count.saturating_sub(FRAME_BUFFER_CAPACITY) as u32;
                let expected: Vec<u32> = (first..count as u32).collect();
                prop_assert_eq!(kept, expected);
            }
        }
    }
}
