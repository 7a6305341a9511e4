//! Loop Closing thread.
//!
//! # Architecture
//!
//! The loop closing pipeline consists of:
//! 1. **Detection** (`detector.rs`): camera-center proximity to an older,
//!    non-covisible keyframe
//! 2. **Verification** (`loop_closer.rs`): Sim3 between the pair, confirmed by
//!    the optimizer with the scale held fixed
//! 3. **Correction** (`loop_closer.rs`): global bundle adjustment over the map
//!
//! The LoopCloser runs in its own thread, receiving keyframes from Local
//! Mapping via a channel, and drains that channel before exiting.

pub mod detector;
pub mod loop_closer;

pub use detector::{detect_loop, LoopCandidate, LoopDetectorConfig};
pub use loop_closer::{spawn_loop_closer, LoopCloser, LoopCloserStats};
