//! Bounded hand-off between the capture domain and the session.
//!
//! The producer side never blocks: when the queue is full the new frame is
//! dropped (drop-newest, so already-queued audio keeps its order) and a
//! counter records the loss. Dropped frames are a metric, not an error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::encoder::EncodedFrame;

/// Result of a non-blocking push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Frame accepted into the queue.
    Delivered,
    /// Queue full; the frame was discarded and counted.
    DroppedFull,
    /// Consumer is gone; the frame was discarded.
    Disconnected,
}

/// Producer handle for the outbound frame queue.
#[derive(Clone)]
pub struct FrameProducer {
    tx: mpsc::Sender<EncodedFrame>,
    dropped: Arc<AtomicU64>,
}

impl FrameProducer {
    /// Push without blocking. Frames are delivered to the consumer in push
    /// order; an overflowing push discards the new frame.
    pub fn try_push(&self, frame: EncodedFrame) -> PushOutcome {
        match self.tx.try_send(frame) {
            Ok(()) => PushOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::DroppedFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => PushOutcome::Disconnected,
        }
    }

    /// Total frames discarded because the queue was full.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Create a bounded frame queue with a single consumer.
pub fn frame_queue(capacity: usize) -> (FrameProducer, mpsc::Receiver<EncodedFrame>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let producer = FrameProducer {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (producer, rx)
}
