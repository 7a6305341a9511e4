//! Inter-thread keyframe queues.
//!
//! Tracking hands new keyframes to Local Mapping, and Local Mapping forwards
//! them to Loop Closing, through unbounded FIFO channels. The producer side is
//! a cheap cloneable [`KeyFrameQueue`]; the worker owns the receiver.

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::warn;

use crate::atlas::map::KeyFrame;

/// Producer side of a worker's keyframe queue.
#[derive(Clone, Debug)]
pub struct KeyFrameQueue {
    sender: Sender<Arc<KeyFrame>>,
}

impl KeyFrameQueue {
    /// Create a queue and the receiver its worker consumes.
    pub fn new() -> (Self, Receiver<Arc<KeyFrame>>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }

    /// Enqueue a keyframe. Safe to call while the worker is consuming.
    ///
    /// Returns false if the worker has already exited.
    pub fn insert_keyframe(&self, kf: Arc<KeyFrame>) -> bool {
        let id = kf.id;
        if self.sender.send(kf).is_err() {
            warn!("Keyframe {} dropped: worker queue closed", id);
            return false;
        }
        true
    }

    /// Keyframes waiting to be consumed.
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::map::KeyFrameId;

    #[test]
    fn test_fifo_order() {
        let (queue, receiver) = KeyFrameQueue::new();
        for i in 0..3 {
            assert!(queue.insert_keyframe(Arc::new(KeyFrame::from_persisted(
                KeyFrameId::new(i),
                i as f64,
                None,
            ))));
        }
        assert_eq!(queue.len(), 3);

        let ids: Vec<u64> = receiver.try_iter().map(|kf| kf.id.0).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_insert_after_worker_exit() {
        let (queue, receiver) = KeyFrameQueue::new();
        drop(receiver);
        assert!(!queue.insert_keyframe(Arc::new(KeyFrame::from_persisted(
            KeyFrameId::new(0),
            0.0,
            None,
        ))));
    }
}
