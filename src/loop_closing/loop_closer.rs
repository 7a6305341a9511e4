//! LoopCloser - Main loop closing thread.
//!
//! This module implements the loop closing thread that:
//! 1. Receives keyframes from LocalMapping
//! 2. Detects loops by camera-center proximity
//! 3. Confirms the relative Sim3 through the optimizer
//! 4. Corrects the map with a global bundle adjustment
//!
//! Keyframes from a map that has since been cleared or replaced are skipped.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info};

use crate::atlas::map::{KeyFrame, MapPointId};
use crate::config::LoopClosingSettings;
use crate::geometry::Sim3;
use crate::optimizer::Optimizer;
use crate::system::shared_state::SharedState;

use super::detector::{detect_loop, LoopCandidate, LoopDetectorConfig};

/// Chi-square threshold (2 DoF, 95%) handed to the Sim3 refinement.
const SIM3_INLIER_THRESHOLD: f64 = 10.0;

/// Statistics for the loop closer.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoopCloserStats {
    /// Number of keyframes processed.
    pub keyframes_processed: usize,

    /// Number of keyframes skipped because the map was reset after they were queued.
    pub keyframes_stale: usize,

    /// Number of loop candidates detected.
    pub candidates_detected: usize,

    /// Number of loops verified.
    pub loops_verified: usize,

    /// Number of loops corrected.
    pub loops_corrected: usize,
}

/// The LoopCloser thread handler.
pub struct LoopCloser {
    /// Shared state with other threads.
    shared: Arc<SharedState>,

    optimizer: Arc<dyn Optimizer>,

    settings: LoopClosingSettings,

    detector: LoopDetectorConfig,

    stats: LoopCloserStats,
}

impl LoopCloser {
    /// Create a new LoopCloser.
    pub fn new(
        shared: Arc<SharedState>,
        optimizer: Arc<dyn Optimizer>,
        settings: LoopClosingSettings,
    ) -> Self {
        let detector = LoopDetectorConfig::from(&settings);
        Self {
            shared,
            optimizer,
            settings,
            detector,
            stats: LoopCloserStats::default(),
        }
    }

    /// Run the main loop closing thread.
    ///
    /// This function blocks and processes keyframes until finish is requested
    /// and the queue has drained, or the channel is closed.
    pub fn run(&mut self, kf_receiver: Receiver<Arc<KeyFrame>>) {
        self.shared.loop_closing.set_finished(false);
        info!("LoopCloser thread started");

        let poll = self.settings.poll_interval();
        loop {
            if self.shared.loop_closing.is_finish_requested() && kf_receiver.is_empty() {
                break;
            }

            match kf_receiver.recv_timeout(poll) {
                Ok(kf) => self.process_keyframe(&kf),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    info!("LoopCloser channel disconnected");
                    break;
                }
            }
        }

        info!(
            "LoopCloser thread exiting. Stats: processed={}, detected={}, verified={}, corrected={}",
            self.stats.keyframes_processed,
            self.stats.candidates_detected,
            self.stats.loops_verified,
            self.stats.loops_corrected
        );
        self.shared.loop_closing.set_finished(true);
    }

    /// Process a single keyframe for loop detection.
    pub fn process_keyframe(&mut self, kf: &KeyFrame) {
        if kf.map_epoch != self.shared.map.epoch() {
            self.stats.keyframes_stale += 1;
            debug!(keyframe = %kf.id, "Skipping keyframe from a previous map");
            return;
        }
        self.stats.keyframes_processed += 1;

        // Step 1: Detect
        let Some(candidate) = self.find_loop(kf) else {
            return;
        };
        self.stats.candidates_detected += 1;
        info!(
            "Loop candidate detected: {} -> {} ({:.2} m)",
            candidate.current_kf_id, candidate.loop_kf_id, candidate.distance
        );

        // Step 2: Verify
        let Some(sim3) = self.compute_sim3(kf, &candidate) else {
            debug!("Loop candidate failed verification");
            return;
        };
        self.stats.loops_verified += 1;
        debug!(scale = sim3.scale, "Loop Sim3 confirmed");

        // Step 3: Correct
        self.correct_loop(&candidate);
    }

    fn find_loop(&self, kf: &KeyFrame) -> Option<LoopCandidate> {
        detect_loop(kf, &self.shared.map.get_all_keyframes(), &self.detector)
    }

    /// Seed the similarity with the current pose estimates and let the
    /// optimizer confirm it. Scale is held at 1.
    fn compute_sim3(&self, kf: &KeyFrame, candidate: &LoopCandidate) -> Option<Sim3> {
        let loop_kf = self.shared.map.keyframe(candidate.loop_kf_id)?;
        let mut sim3 = Sim3::between(&kf.pose()?, &loop_kf.pose()?);

        let matches: Vec<Option<MapPointId>> = (0..kf.num_slots())
            .map(|i| kf.map_point(i))
            .collect();

        self.optimizer
            .optimize_sim3(
                kf,
                &loop_kf,
                &matches,
                &mut sim3,
                SIM3_INLIER_THRESHOLD,
                true,
                self.shared.loop_closing.stop_flag(),
            )
            .then_some(sim3)
    }

    fn correct_loop(&mut self, candidate: &LoopCandidate) {
        info!("Running Global BA");
        let iterations = self.optimizer.global_bundle_adjustment(
            &self.shared.map,
            self.settings.global_ba_iterations,
            self.shared.loop_closing.stop_flag(),
            Some(candidate.loop_kf_id),
            false,
        );

        self.stats.loops_corrected += 1;
        info!(
            "Loop closed: {} -> {} ({} BA iterations)",
            candidate.current_kf_id, candidate.loop_kf_id, iterations
        );
    }

    /// Get current statistics.
    pub fn stats(&self) -> &LoopCloserStats {
        &self.stats
    }
}

/// Spawn the loop closer thread.
///
/// Returns a handle to the spawned thread.
pub fn spawn_loop_closer(
    mut loop_closer: LoopCloser,
    kf_receiver: Receiver<Arc<KeyFrame>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || loop_closer.run(kf_receiver))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use nalgebra::{UnitQuaternion, Vector3};

    use super::*;
    use crate::atlas::map::{KeyFrameId, Map};
    use crate::geometry::SE3;
    use crate::optimizer::NullOptimizer;
    use crate::system::messages::KeyFrameQueue;
    use crate::tracking::frame::Frame;

    /// Records global BA requests; confirms Sim3 only if `confirm` is set.
    #[derive(Default)]
    struct RecordingOptimizer {
        confirm: AtomicBool,
        global_ba_iterations: AtomicUsize,
        sim3_fixed_scale: AtomicBool,
    }

    impl Optimizer for RecordingOptimizer {
        fn pose_optimization(&self, _frame: &mut Frame, _map: &Map, _stop: &AtomicBool) -> bool {
            true
        }

        fn local_bundle_adjustment(&self, _kf: &KeyFrame, _stop: &AtomicBool, _map: &Map) {}

        fn global_bundle_adjustment(
            &self,
            _map: &Map,
            iterations: usize,
            _stop: &AtomicBool,
            _loop_keyframe: Option<KeyFrameId>,
            _robust: bool,
        ) -> usize {
            self.global_ba_iterations.store(iterations, Ordering::SeqCst);
            iterations
        }

        fn optimize_sim3(
            &self,
            _kf1: &KeyFrame,
            _kf2: &KeyFrame,
            _matches: &[Option<MapPointId>],
            _sim3: &mut Sim3,
            _threshold: f64,
            fix_scale: bool,
            _stop: &AtomicBool,
        ) -> bool {
            self.sim3_fixed_scale.store(fix_scale, Ordering::SeqCst);
            self.confirm.load(Ordering::SeqCst)
        }
    }

    fn keyframe_at(id: u64, center: Vector3<f64>) -> Arc<KeyFrame> {
        let twc = SE3::new(UnitQuaternion::identity(), center);
        Arc::new(KeyFrame::from_persisted(
            KeyFrameId::new(id),
            id as f64,
            Some(twc.inverse()),
        ))
    }

    /// Map with 15 keyframes along x; returns a query keyframe back at the start.
    fn looping_map(shared: &SharedState) -> Arc<KeyFrame> {
        for i in 0..15 {
            shared
                .map
                .add_keyframe(keyframe_at(i, Vector3::new(i as f64, 0.0, 0.0)));
        }
        let current = keyframe_at(15, Vector3::new(0.3, 0.0, 0.0));
        shared.map.add_keyframe(Arc::clone(&current));
        current
    }

    #[test]
    fn test_loop_corrected_with_global_ba() {
        let shared = SharedState::new();
        let current = looping_map(&shared);
        let optimizer = Arc::new(RecordingOptimizer::default());
        optimizer.confirm.store(true, Ordering::SeqCst);

        let mut closer = LoopCloser::new(
            Arc::clone(&shared),
            optimizer.clone(),
            LoopClosingSettings::default(),
        );
        closer.process_keyframe(&current);

        let expected = LoopCloserStats {
            keyframes_processed: 1,
            keyframes_stale: 0,
            candidates_detected: 1,
            loops_verified: 1,
            loops_corrected: 1,
        };
        assert_eq!(closer.stats(), &expected);
        assert_eq!(optimizer.global_ba_iterations.load(Ordering::SeqCst), 20);
        assert!(optimizer.sim3_fixed_scale.load(Ordering::SeqCst));
    }

    #[test]
    fn test_rejected_sim3_skips_correction() {
        let shared = SharedState::new();
        let current = looping_map(&shared);
        let optimizer = Arc::new(RecordingOptimizer::default());

        let mut closer = LoopCloser::new(
            Arc::clone(&shared),
            optimizer.clone(),
            LoopClosingSettings::default(),
        );
        closer.process_keyframe(&current);

        assert_eq!(closer.stats().candidates_detected, 1);
        assert_eq!(closer.stats().loops_verified, 0);
        assert_eq!(closer.stats().loops_corrected, 0);
        assert_eq!(optimizer.global_ba_iterations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_keyframe_from_previous_map_is_skipped() {
        let shared = SharedState::new();
        let current = looping_map(&shared);
        let optimizer = Arc::new(RecordingOptimizer::default());
        optimizer.confirm.store(true, Ordering::SeqCst);
        shared.map.clear();
        for i in 0..15 {
            let kf = KeyFrame::from_persisted(
                KeyFrameId::new(i),
                i as f64,
                Some(SE3::new(UnitQuaternion::identity(), -Vector3::new(i as f64, 0.0, 0.0))),
            )
            .with_map_epoch(shared.map.epoch());
            assert!(shared.map.add_keyframe_if_current(Arc::new(kf)));
        }

        let mut closer = LoopCloser::new(
            Arc::clone(&shared),
            optimizer.clone(),
            LoopClosingSettings::default(),
        );
        closer.process_keyframe(&current);

        assert_eq!(closer.stats().keyframes_stale, 1);
        assert_eq!(closer.stats().keyframes_processed, 0);
        assert_eq!(closer.stats().candidates_detected, 0);
        assert_eq!(optimizer.global_ba_iterations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_loop_early_in_the_map() {
        let shared = SharedState::new();
        let kf = keyframe_at(0, Vector3::zeros());
        shared.map.add_keyframe(Arc::clone(&kf));

        let mut closer = LoopCloser::new(
            Arc::clone(&shared),
            Arc::new(NullOptimizer),
            LoopClosingSettings::default(),
        );
        closer.process_keyframe(&kf);
        assert_eq!(closer.stats().keyframes_processed, 1);
        assert_eq!(closer.stats().candidates_detected, 0);
    }

    #[test]
    fn test_queue_drained_on_shutdown() {
        let shared = SharedState::new();
        let (queue, receiver) = KeyFrameQueue::new();
        for i in 0..30 {
            let kf = keyframe_at(i, Vector3::new(i as f64 * 10.0, 0.0, 0.0));
            shared.map.add_keyframe(Arc::clone(&kf));
            queue.insert_keyframe(kf);
        }
        shared.loop_closing.request_finish();

        let closer = LoopCloser::new(
            Arc::clone(&shared),
            Arc::new(NullOptimizer),
            LoopClosingSettings::default(),
        );
        spawn_loop_closer(closer, receiver).join().unwrap();

        assert!(shared.loop_closing.is_finished());
        assert!(queue.is_empty());
    }
}
