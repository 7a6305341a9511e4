//! Map module - Core SLAM map data structures.
//!
//! This module contains:
//! - [`KeyFrame`] - Frames promoted into the map, with poses and covisibility edges
//! - [`MapPoint`] - 3D landmarks observed by KeyFrames
//! - [`Map`] - Thread-safe container owning both, with `MAP_V1` persistence
//! - [`IdAllocator`] - Monotonic id generation owned by each Map
//!
//! # Architecture
//!
//! The map forms a bipartite graph:
//! - KeyFrames observe MapPoints (KF → MP via per-feature slots)
//! - MapPoints track their observers (MP → KF via `observations`)
//!
//! Both sides hold ids, never owning pointers; the [`Map`] owns all storage.

pub mod id_allocator;
pub mod keyframe;
pub mod map;
pub mod map_point;
pub mod persistence;
pub mod types;

pub use id_allocator::IdAllocator;
pub use keyframe::KeyFrame;
pub use map::Map;
pub use map_point::MapPoint;
pub use persistence::MapError;
pub use types::{FrameId, KeyFrameId, MapPointId};
