//! Local Mapping thread.
//!
//! The Local Mapping thread is responsible for:
//! - Inserting new keyframes into the map
//! - Maintaining the covisibility graph and the keyframe database
//! - Running local bundle adjustment
//! - Handing keyframes on to Loop Closing

mod local_mapper;

pub use local_mapper::{spawn_local_mapper, LocalMapper};
