//! Optimization back end contract.
//!
//! Tracking, Local Mapping and Loop Closing consume an [`Optimizer`] but do not
//! implement one. Every entry point receives a cooperative stop flag that must be
//! polled between iterations, so a shutdown request can cut an in-flight
//! optimization short.
//!
//! [`NullOptimizer`] keeps every estimate as it is. It is the default back end
//! and the test double for the worker threads.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::atlas::map::{KeyFrame, KeyFrameId, Map, MapPointId};
use crate::geometry::Sim3;
use crate::tracking::frame::Frame;

/// Pose and structure refinement used by the SLAM threads.
pub trait Optimizer: Send + Sync {
    /// Refine `frame.pose` from its observed landmarks.
    ///
    /// Returns false when the result is not good enough to keep tracking.
    fn pose_optimization(&self, frame: &mut Frame, map: &Map, stop: &AtomicBool) -> bool;

    /// Refine `keyframe` and its covisible neighborhood.
    fn local_bundle_adjustment(&self, keyframe: &KeyFrame, stop: &AtomicBool, map: &Map);

    /// Refine every keyframe pose and map point in `map`.
    ///
    /// Returns the number of iterations actually run.
    fn global_bundle_adjustment(
        &self,
        map: &Map,
        iterations: usize,
        stop: &AtomicBool,
        loop_keyframe: Option<KeyFrameId>,
        robust: bool,
    ) -> usize;

    /// Refine `sim3` (taking `kf2` coordinates to `kf1` coordinates) from
    /// map point matches. `matches` is parallel to `kf1`'s feature slots.
    ///
    /// Returns true when the transform is confirmed.
    #[allow(clippy::too_many_arguments)]
    fn optimize_sim3(
        &self,
        kf1: &KeyFrame,
        kf2: &KeyFrame,
        matches: &[Option<MapPointId>],
        sim3: &mut Sim3,
        threshold: f64,
        fix_scale: bool,
        stop: &AtomicBool,
    ) -> bool;
}

/// Optimizer that leaves all estimates untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOptimizer;

impl Optimizer for NullOptimizer {
    fn pose_optimization(&self, frame: &mut Frame, _map: &Map, _stop: &AtomicBool) -> bool {
        frame.pose.is_some()
    }

    fn local_bundle_adjustment(&self, _keyframe: &KeyFrame, _stop: &AtomicBool, _map: &Map) {}

    fn global_bundle_adjustment(
        &self,
        map: &Map,
        iterations: usize,
        stop: &AtomicBool,
        loop_keyframe: Option<KeyFrameId>,
        _robust: bool,
    ) -> usize {
        let mut done = 0;
        while done < iterations && !stop.load(Ordering::SeqCst) {
            done += 1;
        }
        debug!(
            keyframes = map.num_keyframes(),
            iterations = done,
            loop_keyframe = ?loop_keyframe,
            "Global BA (no-op)"
        );
        done
    }

    fn optimize_sim3(
        &self,
        _kf1: &KeyFrame,
        _kf2: &KeyFrame,
        _matches: &[Option<MapPointId>],
        _sim3: &mut Sim3,
        _threshold: f64,
        _fix_scale: bool,
        _stop: &AtomicBool,
    ) -> bool {
        true
    }
}
