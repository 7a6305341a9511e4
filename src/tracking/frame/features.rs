//! Keypoints, binary descriptors and the feature extractor contract.

use image::{DynamicImage, GrayImage};
use nalgebra::Vector2;

/// 256-bit binary descriptor (ORB width).
pub type Descriptor = [u8; 32];

/// A detected 2D feature in face pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoint {
    pub pt: Vector2<f64>,
    /// Pyramid level the feature was detected at.
    pub octave: u8,
    /// Detector response (higher is stronger).
    pub response: f32,
}

impl KeyPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            pt: Vector2::new(x, y),
            octave: 0,
            response: 0.0,
        }
    }
}

/// Keypoints with a parallel descriptor list, one row per keypoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSet {
    pub keypoints: Vec<KeyPoint>,
    pub descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Detect-and-describe collaborator.
///
/// Implementations must return as many descriptors as keypoints.
pub trait FeatureExtractor: Send + Sync {
    fn detect_and_describe(&self, image: &DynamicImage, mask: Option<&GrayImage>) -> FeatureSet;
}

/// Hamming distance between two binary descriptors.
pub fn descriptor_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}
