//! Atlas module - SLAM map data structures.
//!
//! - [`map::KeyFrame`] - KeyFrames with poses and covisibility edges
//! - [`map::MapPoint`] - 3D landmarks with observation tracking
//! - [`map::Map`] - Thread-safe container with `MAP_V1` persistence
//! - [`keyframe_db::KeyFrameDatabase`] - Appearance index used for
//!   relocalization and loop queries

pub mod keyframe_db;
pub mod map;

// Re-export commonly used types
pub use keyframe_db::KeyFrameDatabase;
pub use map::{KeyFrame, KeyFrameId, Map, MapPoint, MapPointId};
