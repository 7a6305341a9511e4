//! SLAM system orchestration and thread management.
//!
//! This module contains the top-level `SlamSystem` that runs Tracking and
//! coordinates the Local Mapping and Loop Closing threads, along with the
//! shared state, the inter-thread keyframe queues and trajectory export.

pub mod messages;
pub mod shared_state;
mod slam_system;
pub mod trajectory;

pub use messages::KeyFrameQueue;
pub use shared_state::{SharedState, WorkerControl};
pub use slam_system::{SlamSystem, CUBE_FACES};
