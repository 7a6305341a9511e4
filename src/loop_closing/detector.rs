//! Loop detection by camera-center proximity.
//!
//! A keyframe closes a loop with an older keyframe when their camera centers
//! lie within a fixed radius and the two are not already covisible. Recent
//! keyframes are never candidates, and detection only starts once the map
//! holds enough keyframes before the query one.

use std::sync::Arc;

use crate::atlas::map::{KeyFrame, KeyFrameId};
use crate::config::LoopClosingSettings;

/// Configuration for loop detection.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopDetectorConfig {
    /// Maximum camera-center distance (meters) between loop partners.
    pub detection_radius: f64,

    /// Number of most recent keyframes before the query that are never candidates.
    pub recent_window: usize,

    /// Keyframes older than the query required before detection runs.
    pub min_prior_keyframes: usize,
}

impl Default for LoopDetectorConfig {
    fn default() -> Self {
        Self {
            detection_radius: 2.0,
            recent_window: 10,
            min_prior_keyframes: 10,
        }
    }
}

impl From<&LoopClosingSettings> for LoopDetectorConfig {
    fn from(settings: &LoopClosingSettings) -> Self {
        Self {
            detection_radius: settings.detection_radius,
            recent_window: settings.recent_window,
            min_prior_keyframes: settings.min_prior_keyframes,
        }
    }
}

/// A detected loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopCandidate {
    /// Keyframe that detected the loop.
    pub current_kf_id: KeyFrameId,

    /// The older keyframe being closed back to.
    pub loop_kf_id: KeyFrameId,

    /// Distance between the two camera centers.
    pub distance: f64,
}

/// Find the first older keyframe that closes a loop with `current`.
///
/// `keyframes` is a snapshot of the map; entries with an id at or above
/// `current.id` are ignored. Candidates are scanned oldest first.
pub fn detect_loop(
    current: &KeyFrame,
    keyframes: &[Arc<KeyFrame>],
    config: &LoopDetectorConfig,
) -> Option<LoopCandidate> {
    let mut prior: Vec<&Arc<KeyFrame>> = keyframes.iter().filter(|kf| kf.id < current.id).collect();
    if prior.len() < config.min_prior_keyframes {
        return None;
    }
    prior.sort_by_key(|kf| kf.id);

    let center = current.camera_center()?;
    let eligible = prior.len().saturating_sub(config.recent_window);

    prior[..eligible].iter().find_map(|kf| {
        if current.is_connected(kf.id) || kf.is_connected(current.id) {
            return None;
        }
        let distance = (kf.camera_center()? - center).norm();
        (distance < config.detection_radius).then(|| LoopCandidate {
            current_kf_id: current.id,
            loop_kf_id: kf.id,
            distance,
        })
    })
}
