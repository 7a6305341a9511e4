//! Shared state between the Tracking, Local Mapping and Loop Closing threads.
//!
//! The `SharedState` struct holds the map, the keyframe database and the
//! lifecycle flags of the two workers. Every member synchronizes itself, so the
//! struct is shared as `Arc<SharedState>` without an outer lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::atlas::keyframe_db::KeyFrameDatabase;
use crate::atlas::map::Map;

/// Finish handshake for one worker thread.
#[derive(Debug, Default)]
pub struct WorkerControl {
    /// Set by the owner; the worker exits once this is set and its queue is empty.
    finish_requested: AtomicBool,

    /// Set by the worker when its loop has returned.
    finished: AtomicBool,

    /// Polled by in-flight optimizations.
    stop_optimization: AtomicBool,
}

impl WorkerControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the worker to drain its queue and exit. Also aborts optimizations.
    pub fn request_finish(&self) {
        self.finish_requested.store(true, Ordering::SeqCst);
        self.stop_optimization.store(true, Ordering::SeqCst);
    }

    pub fn is_finish_requested(&self) -> bool {
        self.finish_requested.load(Ordering::SeqCst)
    }

    pub fn set_finished(&self, value: bool) {
        self.finished.store(value, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Stop flag handed to the optimizer.
    pub fn stop_flag(&self) -> &AtomicBool {
        &self.stop_optimization
    }
}

/// State accessible by all SLAM threads.
#[derive(Debug, Default)]
pub struct SharedState {
    pub map: Map,

    pub keyframe_db: KeyFrameDatabase,

    pub local_mapping: WorkerControl,

    pub loop_closing: WorkerControl,
}

impl SharedState {
    /// Create a new SharedState with an empty map.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_finish_sets_stop_flag() {
        let control = WorkerControl::new();
        assert!(!control.is_finish_requested());
        assert!(!control.stop_flag().load(Ordering::SeqCst));

        control.request_finish();
        assert!(control.is_finish_requested());
        assert!(control.stop_flag().load(Ordering::SeqCst));
        assert!(!control.is_finished());
    }
}
