//! Background receive loop feeding the frame buffer

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::buffer::FrameBuffer;
use crate::handle::ConnectionHandle;

struct ListenerTask {
    generation: u64,
    task: JoinHandle<()>,
}

/// Runs one receive loop per connection handle.
///
/// The loop ends by itself on the first transport error or when its handle
/// is invalidated; it is never aborted from outside.
pub struct Listener {
    frames: FrameBuffer,
    receive_timeout: Duration,
    current: Mutex<Option<ListenerTask>>,
}

impl Listener {
    pub fn new(frames: FrameBuffer, receive_timeout: Duration) -> Self {
        Self {
            frames,
            receive_timeout,
            current: Mutex::new(None),
        }
    }

    /// Start the loop for `handle`.
    ///
    /// Returns `false` without spawning if a loop for this handle is already
    /// running. Must be called from within a tokio runtime.
    pub fn start(&self, handle: &ConnectionHandle) -> bool {
        let mut current = self.current.lock();
        if let Some(running) = current.as_ref() {
            if running.generation == handle.generation() && !running.task.is_finished() {
                debug!(
                    "Listener already running for connection #{}",
                    handle.generation()
                );
                return false;
            }
        }

        let task = tokio::spawn(listen(
            handle.clone(),
            self.frames.clone(),
            self.receive_timeout,
        ));
        *current = Some(ListenerTask {
            generation: handle.generation(),
            task,
        });
        true
    }

    /// Whether the most recently started loop is still alive
    pub fn is_running(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .map(|running| !running.task.is_finished())
            .unwrap_or(false)
    }

    pub fn frames(&self) -> &FrameBuffer {
        &self.frames
    }
}

async fn listen(handle: ConnectionHandle, frames: FrameBuffer, receive_timeout: Duration) {
    info!(
        "Listener started on {} (connection #{})",
        handle.interface(),
        handle.generation()
    );

    while handle.is_valid() {
        match handle.receive(receive_timeout).await {
            Ok(Some(frame)) => {
                trace!("Buffered {}", frame);
                frames.push(frame);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    "Listener on {} stopping after transport error: {}",
                    handle.interface(),
                    e
                );
                break;
            }
        }
    }

    info!("Listener ended (connection #{})", handle.generation());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::BusTransport;
    use async_trait::async_trait;
    use eol_protocol::Frame;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Replays queued frames, then fails once the queue is drained
    struct ScriptedTransport {
        frames: Mutex<VecDeque<Frame>>,
        fail_when_empty: bool,
    }

    #[async_trait]
    impl BusTransport for ScriptedTransport {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(&self, _frame: &Frame) -> Result<(), TransportError> {
            Ok(())
        }

        async fn receive(&self, timeout: Duration) -> Result<Option<Frame>, TransportError> {
            let next = self.frames.lock().pop_front();
            match next {
                Some(frame) => Ok(Some(frame)),
                None if self.fail_when_empty => Err(TransportError::Closed),
                None => {
                    tokio::time::sleep(timeout).await;
                    Ok(None)
                }
            }
        }

        async fn close(&self) {}
    }

    fn scripted(count: u8, fail_when_empty: bool) -> Arc<dyn BusTransport> {
        let frames = (0..count)
            .map(|i| Frame::new(0x30, &[i]).unwrap())
            .collect();
        Arc::new(ScriptedTransport {
            frames: Mutex::new(frames),
            fail_when_empty,
        })
    }

    #[tokio::test]
    async fn test_frames_reach_buffer_and_loop_exits_on_error() {
        let frames = FrameBuffer::new();
        let listener = Listener::new(frames.clone(), Duration::from_millis(10));
        let handle = ConnectionHandle::new(1, scripted(3, true));

        assert!(listener.start(&handle));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(frames.len(), 3);
        assert!(!listener.is_running());
    }

    #[tokio::test]
    async fn test_second_start_is_noop() {
        let listener = Listener::new(FrameBuffer::new(), Duration::from_millis(10));
        let handle = ConnectionHandle::new(1, scripted(0, false));

        assert!(listener.start(&handle));
        assert!(!listener.start(&handle));
        assert!(!listener.start(&handle.clone()));
        assert!(listener.is_running());

        handle.invalidate();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!listener.is_running());
    }

    #[tokio::test]
    async fn test_new_handle_gets_new_loop() {
        let listener = Listener::new(FrameBuffer::new(), Duration::from_millis(10));
        let first = ConnectionHandle::new(1, scripted(0, false));
        let second = ConnectionHandle::new(2, scripted(0, false));

        assert!(listener.start(&first));
        first.invalidate();
        assert!(listener.start(&second));
        assert!(listener.is_running());
        second.invalidate();
    }
}
