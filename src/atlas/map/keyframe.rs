//! KeyFrame - A retained Frame promoted into the map.
//!
//! A KeyFrame keeps what the map needs from its originating Frame: the
//! features, the camera intrinsics, a MapPoint slot per feature and the
//! covisibility edges. Source images are flushed to disk at creation and only
//! their paths are kept.
//!
//! KeyFrames are shared as `Arc<KeyFrame>` between the workers, so every
//! mutable field sits behind its own lock: pose reads on one KeyFrame never
//! contend with writes on another.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use nalgebra::{Matrix3, Vector3};
use parking_lot::{Mutex, RwLock};

use crate::atlas::keyframe_db::{bow_from_features, BowVector};
use crate::geometry::SE3;
use crate::tracking::frame::{FeatureSet, Frame};

use super::types::{FrameId, KeyFrameId, MapPointId};

pub struct KeyFrame {
    pub id: KeyFrameId,

    /// Frame this KeyFrame was promoted from.
    pub frame_id: FrameId,

    /// Capture time in seconds.
    pub timestamp: f64,

    /// Map epoch this KeyFrame belongs to; see [`Map::epoch`](super::Map::epoch).
    pub map_epoch: u64,

    /// World-to-camera transform (T_cw); `None` until a pose is known.
    pose: Mutex<Option<SE3>>,

    /// Intrinsics of the capturing camera. Absent for KeyFrames loaded from disk.
    pub intrinsics: Option<Matrix3<f64>>,

    // ─────────────────────────────────────────────────────────────────────────
    // Visual Features
    // ─────────────────────────────────────────────────────────────────────────
    /// One feature set per cube face.
    pub features: Arc<Vec<FeatureSet>>,

    /// Coarse appearance descriptor for the KeyFrame database.
    pub bow_vector: BowVector,

    /// Cached face images written at creation.
    pub image_paths: Vec<PathBuf>,

    // ─────────────────────────────────────────────────────────────────────────
    // Map Associations
    // ─────────────────────────────────────────────────────────────────────────
    /// Feature index -> MapPoint. Indices run over all faces in order.
    map_points: Mutex<Vec<Option<MapPointId>>>,

    // ─────────────────────────────────────────────────────────────────────────
    // Covisibility Graph
    // ─────────────────────────────────────────────────────────────────────────
    connections: RwLock<HashSet<KeyFrameId>>,
}

impl KeyFrame {
    /// Promote a Frame. The KeyFrame inherits the frame's pose.
    ///
    /// # Arguments
    /// * `id` - Fresh id from the map's frame counter
    /// * `frame` - Source frame
    /// * `image_paths` - Where the frame's images were cached, if anywhere
    pub fn from_frame(id: KeyFrameId, frame: &Frame, image_paths: Vec<PathBuf>) -> Self {
        Self {
            id,
            frame_id: frame.id,
            timestamp: frame.timestamp,
            map_epoch: 0,
            pose: Mutex::new(frame.pose),
            intrinsics: Some(frame.camera.intrinsics()),
            bow_vector: bow_from_features(&frame.features),
            features: Arc::clone(&frame.features),
            image_paths,
            map_points: Mutex::new(vec![None; frame.num_features]),
            connections: RwLock::new(HashSet::new()),
        }
    }

    /// Rebuild a KeyFrame from persisted (id, timestamp, pose).
    ///
    /// No features or observations are restored.
    pub fn from_persisted(id: KeyFrameId, timestamp: f64, pose: Option<SE3>) -> Self {
        Self {
            id,
            frame_id: FrameId::new(id.0),
            timestamp,
            map_epoch: 0,
            pose: Mutex::new(pose),
            intrinsics: None,
            features: Arc::new(Vec::new()),
            bow_vector: BowVector::new(),
            image_paths: Vec::new(),
            map_points: Mutex::new(Vec::new()),
            connections: RwLock::new(HashSet::new()),
        }
    }

    pub fn with_map_epoch(mut self, epoch: u64) -> Self {
        self.map_epoch = epoch;
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pose
    // ─────────────────────────────────────────────────────────────────────────

    /// World-to-camera pose, if set.
    pub fn pose(&self) -> Option<SE3> {
        *self.pose.lock()
    }

    pub fn set_pose(&self, pose: SE3) {
        *self.pose.lock() = Some(pose);
    }

    /// Camera-to-world pose, if set.
    pub fn pose_inverse(&self) -> Option<SE3> {
        self.pose().map(|p| p.inverse())
    }

    /// Camera centre in world coordinates, if the pose is set.
    pub fn camera_center(&self) -> Option<Vector3<f64>> {
        self.pose().map(|p| p.camera_center())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Map Point Associations
    // ─────────────────────────────────────────────────────────────────────────

    pub fn num_slots(&self) -> usize {
        self.map_points.lock().len()
    }

    pub fn map_point(&self, feature_idx: usize) -> Option<MapPointId> {
        self.map_points.lock().get(feature_idx).copied().flatten()
    }

    /// Associate a feature with a MapPoint.
    ///
    /// Returns false if the index is outside the slot array.
    pub fn set_map_point(&self, feature_idx: usize, mp_id: MapPointId) -> bool {
        match self.map_points.lock().get_mut(feature_idx) {
            Some(slot) => {
                *slot = Some(mp_id);
                true
            }
            None => false,
        }
    }

    /// Snapshot of the associated MapPoint ids with their feature indices.
    pub fn map_point_indices(&self) -> Vec<(usize, MapPointId)> {
        self.map_points
            .lock()
            .iter()
            .enumerate()
            .filter_map(|(idx, mp)| mp.map(|id| (idx, id)))
            .collect()
    }

    pub fn num_map_points(&self) -> usize {
        self.map_points.lock().iter().filter(|mp| mp.is_some()).count()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Covisibility Graph
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_connection(&self, kf_id: KeyFrameId) {
        if kf_id == self.id {
            return;
        }
        self.connections.write().insert(kf_id);
    }

    pub fn erase_connection(&self, kf_id: KeyFrameId) {
        self.connections.write().remove(&kf_id);
    }

    pub fn is_connected(&self, kf_id: KeyFrameId) -> bool {
        self.connections.read().contains(&kf_id)
    }

    pub fn connected_keyframes(&self) -> HashSet<KeyFrameId> {
        self.connections.read().clone()
    }
}

impl fmt::Debug for KeyFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyFrame")
            .field("id", &self.id)
            .field("frame_id", &self.frame_id)
            .field("timestamp", &self.timestamp)
            .field("has_pose", &self.pose().is_some())
            .field("num_features", &self.num_slots())
            .field("num_map_points", &self.num_map_points())
            .field("num_connections", &self.connections.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    #[test]
    fn test_persisted_keyframe_pose_access() {
        let pose = SE3::new(
            UnitQuaternion::from_euler_angles(0.0, 0.3, 0.0),
            Vector3::new(1.0, -2.0, 0.5),
        );
        let kf = KeyFrame::from_persisted(KeyFrameId::new(4), 1.5, Some(pose));
        assert_eq!(kf.frame_id, FrameId::new(4));
        assert_eq!(kf.num_slots(), 0);

        let center = kf.camera_center().unwrap();
        assert_relative_eq!(pose.transform_point(&center), Vector3::zeros(), epsilon = 1e-12);
        assert_relative_eq!(
            kf.pose_inverse().unwrap().translation,
            center,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_unset_pose() {
        let kf = KeyFrame::from_persisted(KeyFrameId::new(0), 0.0, None);
        assert!(kf.pose().is_none());
        assert!(kf.camera_center().is_none());
        kf.set_pose(SE3::identity());
        assert!(kf.pose().is_some());
    }

    #[test]
    fn test_connections_exclude_self() {
        let kf = KeyFrame::from_persisted(KeyFrameId::new(1), 0.0, None);
        kf.add_connection(KeyFrameId::new(1));
        kf.add_connection(KeyFrameId::new(2));
        assert!(!kf.is_connected(KeyFrameId::new(1)));
        assert!(kf.is_connected(KeyFrameId::new(2)));
        kf.erase_connection(KeyFrameId::new(2));
        assert!(kf.connected_keyframes().is_empty());
    }

    #[test]
    fn test_slot_out_of_range_is_rejected() {
        let kf = KeyFrame::from_persisted(KeyFrameId::new(1), 0.0, None);
        assert!(!kf.set_map_point(0, MapPointId::new(9)));
        assert_eq!(kf.map_point(0), None);
    }
}
