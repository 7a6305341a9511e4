//! Frame-level data: features, the extractor contract, frames and the
//! keyframe image cache.

pub mod features;
pub mod frame;
pub mod image_cache;

pub use features::{descriptor_distance, Descriptor, FeatureExtractor, FeatureSet, KeyPoint};
pub use frame::Frame;
pub use image_cache::ImageCache;
