//! MapPoint - A 3D landmark observed by KeyFrames.

use std::collections::HashMap;
use std::fmt;

use nalgebra::Vector3;
use parking_lot::Mutex;

use super::types::{KeyFrameId, MapPointId};

/// A triangulated landmark.
///
/// The position has its own lock so optimizers can move points without taking
/// the map lock.
pub struct MapPoint {
    pub id: MapPointId,

    /// World position.
    position: Mutex<Vector3<f64>>,

    /// KeyFrame that created this point, if known.
    pub reference_kf: Option<KeyFrameId>,

    /// Observing KeyFrame -> feature index in that KeyFrame.
    observations: Mutex<HashMap<KeyFrameId, usize>>,
}

impl MapPoint {
    pub fn new(id: MapPointId, position: Vector3<f64>, reference_kf: Option<KeyFrameId>) -> Self {
        Self {
            id,
            position: Mutex::new(position),
            reference_kf,
            observations: Mutex::new(HashMap::new()),
        }
    }

    pub fn position(&self) -> Vector3<f64> {
        *self.position.lock()
    }

    pub fn set_position(&self, position: Vector3<f64>) {
        *self.position.lock() = position;
    }

    /// Record that `kf_id` sees this point at `feature_idx`.
    pub fn add_observation(&self, kf_id: KeyFrameId, feature_idx: usize) {
        self.observations.lock().insert(kf_id, feature_idx);
    }

    /// Returns true if the observation existed.
    pub fn erase_observation(&self, kf_id: KeyFrameId) -> bool {
        self.observations.lock().remove(&kf_id).is_some()
    }

    pub fn observations(&self) -> HashMap<KeyFrameId, usize> {
        self.observations.lock().clone()
    }

    pub fn num_observations(&self) -> usize {
        self.observations.lock().len()
    }
}

impl fmt::Debug for MapPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapPoint")
            .field("id", &self.id)
            .field("position", &self.position())
            .field("reference_kf", &self.reference_kf)
            .field("num_observations", &self.num_observations())
            .finish()
    }
}
