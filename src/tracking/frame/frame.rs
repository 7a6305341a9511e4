//! Frame - one capture's features and (optional) pose.

use std::fmt;
use std::sync::Arc;

use image::DynamicImage;

use crate::atlas::keyframe_db::{bow_from_features, BowVector};
use crate::atlas::map::{FrameId, IdAllocator};
use crate::camera::GeometricCamera;
use crate::geometry::SE3;

use super::features::{FeatureExtractor, FeatureSet, KeyPoint};

/// A single capture: one image per cube face plus extracted features.
///
/// Cloning is cheap: features, camera and images are shared, the pose is
/// copied by value.
#[derive(Clone)]
pub struct Frame {
    pub id: FrameId,

    /// Capture time in seconds.
    pub timestamp: f64,

    pub camera: Arc<dyn GeometricCamera>,

    /// One feature set per captured face, in face order.
    pub features: Arc<Vec<FeatureSet>>,

    /// Total keypoints across all faces.
    pub num_features: usize,

    /// World-to-camera transform (T_cw); `None` until tracking sets it.
    pub pose: Option<SE3>,

    /// Source images, kept until the frame is promoted or archived.
    images: Vec<Arc<DynamicImage>>,
}

impl Frame {
    /// Build a frame from one image per face.
    ///
    /// # Arguments
    /// * `ids` - Frame id counter (owned by the map)
    /// * `images` - Captured faces, in face order
    /// * `timestamp` - Capture time in seconds
    /// * `extractor` - Feature detect-and-describe collaborator
    /// * `camera` - Camera model the images came from
    pub fn new(
        ids: &IdAllocator,
        images: Vec<DynamicImage>,
        timestamp: f64,
        extractor: &dyn FeatureExtractor,
        camera: Arc<dyn GeometricCamera>,
    ) -> Self {
        let features: Vec<FeatureSet> = images
            .iter()
            .map(|img| extractor.detect_and_describe(img, None))
            .collect();
        let mut frame = Self::from_features(FrameId::new(ids.next()), timestamp, camera, features);
        frame.images = images.into_iter().map(Arc::new).collect();
        frame
    }

    /// Single-image frame.
    pub fn monocular(
        ids: &IdAllocator,
        image: DynamicImage,
        timestamp: f64,
        extractor: &dyn FeatureExtractor,
        camera: Arc<dyn GeometricCamera>,
    ) -> Self {
        Self::new(ids, vec![image], timestamp, extractor, camera)
    }

    /// Frame from already-extracted features, without images.
    pub fn from_features(
        id: FrameId,
        timestamp: f64,
        camera: Arc<dyn GeometricCamera>,
        features: Vec<FeatureSet>,
    ) -> Self {
        let num_features = features.iter().map(FeatureSet::len).sum();
        Self {
            id,
            timestamp,
            camera,
            features: Arc::new(features),
            num_features,
            pose: None,
            images: Vec::new(),
        }
    }

    pub fn images(&self) -> &[Arc<DynamicImage>] {
        &self.images
    }

    /// Drop the references to the source images.
    pub fn release_images(&mut self) {
        self.images.clear();
    }

    /// Copy without the source images, for archiving as the last frame.
    pub fn without_images(&self) -> Self {
        let mut copy = self.clone();
        copy.release_images();
        copy
    }

    pub fn num_faces(&self) -> usize {
        self.features.len()
    }

    /// Index of the first feature of `face` in the frame-wide numbering.
    pub fn feature_offset(&self, face: usize) -> usize {
        self.features.iter().take(face).map(FeatureSet::len).sum()
    }

    /// Look up a keypoint by frame-wide index, with its face.
    pub fn keypoint(&self, index: usize) -> Option<(usize, &KeyPoint)> {
        let mut remaining = index;
        for (face, fs) in self.features.iter().enumerate() {
            if remaining < fs.len() {
                return Some((face, &fs.keypoints[remaining]));
            }
            remaining -= fs.len();
        }
        None
    }

    pub fn bow_vector(&self) -> BowVector {
        bow_from_features(&self.features)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("timestamp", &self.timestamp)
            .field("num_faces", &self.num_faces())
            .field("num_features", &self.num_features)
            .field("has_pose", &self.pose.is_some())
            .field("num_images", &self.images.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CubeMapCamera;
    use image::GrayImage;

    /// Emits one keypoint per 16 pixels of image width.
    struct GridExtractor;

    impl FeatureExtractor for GridExtractor {
        fn detect_and_describe(&self, image: &DynamicImage, _mask: Option<&GrayImage>) -> FeatureSet {
            let n = (image.width() / 16) as usize;
            FeatureSet {
                keypoints: (0..n).map(|i| KeyPoint::new(16.0 * i as f64, 8.0)).collect(),
                descriptors: (0..n).map(|i| [i as u8; 32]).collect(),
            }
        }
    }

    fn camera() -> Arc<dyn GeometricCamera> {
        Arc::new(CubeMapCamera::new(64, 64))
    }

    #[test]
    fn test_multi_face_frame_counts_features() {
        let ids = IdAllocator::new();
        let images = vec![
            DynamicImage::new_luma8(64, 64),
            DynamicImage::new_luma8(32, 64),
        ];
        let frame = Frame::new(&ids, images, 1.0, &GridExtractor, camera());
        assert_eq!(frame.num_faces(), 2);
        assert_eq!(frame.num_features, 6);
        assert_eq!(frame.images().len(), 2);
        assert_eq!(frame.feature_offset(1), 4);

        let (face, kp) = frame.keypoint(5).unwrap();
        assert_eq!(face, 1);
        assert_eq!(kp.pt.x, 16.0);
        assert!(frame.keypoint(6).is_none());
    }

    #[test]
    fn test_frame_ids_increase() {
        let ids = IdAllocator::new();
        let a = Frame::monocular(&ids, DynamicImage::new_luma8(16, 16), 0.0, &GridExtractor, camera());
        let b = Frame::monocular(&ids, DynamicImage::new_luma8(16, 16), 0.1, &GridExtractor, camera());
        assert!(b.id > a.id);
    }

    #[test]
    fn test_clone_copies_pose_and_shares_features() {
        let ids = IdAllocator::new();
        let mut frame = Frame::monocular(&ids, DynamicImage::new_luma8(32, 32), 0.0, &GridExtractor, camera());
        frame.pose = Some(SE3::identity());

        let mut archived = frame.without_images();
        assert!(archived.images().is_empty());
        assert_eq!(frame.images().len(), 1);
        assert!(Arc::ptr_eq(&archived.features, &frame.features));

        archived.pose = None;
        assert!(frame.pose.is_some());
    }
}
