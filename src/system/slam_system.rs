//! SLAM System - Main entry point and thread orchestration.
//!
//! The `SlamSystem` is the top-level struct that users interact with.
//! It owns the shared state, runs Tracking in the caller's thread and spawns
//! the Local Mapping and Loop Closing threads.
//!
//! Host-facing events (initialization, tracking loss and recovery, map
//! load and reset) are reported through the [`Platform`] log. Resetting or
//! loading the map bumps the map epoch before the keyframe database is
//! cleared, so keyframes still queued for the workers are dropped.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use image::DynamicImage;
use tracing::{info, warn};

use crate::atlas::map::{MapError, MapPoint};
use crate::camera::{CubeMapCamera, GeometricCamera};
use crate::config::Settings;
use crate::geometry::SE3;
use crate::local_mapping::{spawn_local_mapper, LocalMapper};
use crate::loop_closing::{spawn_loop_closer, LoopCloser};
use crate::optimizer::Optimizer;
use crate::platform::{LogLevel, NativePlatform, Platform};
use crate::tracking::frame::{FeatureExtractor, Frame, ImageCache};
use crate::tracking::{Tracker, TrackingState};

use super::messages::KeyFrameQueue;
use super::shared_state::SharedState;
use super::trajectory;

/// Number of faces in a cube map capture.
pub const CUBE_FACES: usize = 6;

const LOG_TAG: &str = "SLAM";

/// Main SLAM system orchestrating Tracking, Local Mapping and Loop Closing.
pub struct SlamSystem {
    /// Shared state (map, keyframe database, worker flags).
    shared: Arc<SharedState>,

    camera: Arc<dyn GeometricCamera>,

    extractor: Arc<dyn FeatureExtractor>,

    platform: Arc<dyn Platform>,

    /// The tracker runs in the caller's thread.
    tracker: Tracker,

    local_mapping_handle: Option<JoinHandle<()>>,

    loop_closing_handle: Option<JoinHandle<()>>,
}

impl SlamSystem {
    /// Build the system and start its worker threads, reporting to a
    /// [`NativePlatform`].
    pub fn new(
        settings: Settings,
        extractor: Arc<dyn FeatureExtractor>,
        optimizer: Arc<dyn Optimizer>,
    ) -> Result<Self> {
        Self::with_platform(settings, extractor, optimizer, Arc::new(NativePlatform::new()))
    }

    /// Build the system with a host-provided platform.
    pub fn with_platform(
        settings: Settings,
        extractor: Arc<dyn FeatureExtractor>,
        optimizer: Arc<dyn Optimizer>,
        platform: Arc<dyn Platform>,
    ) -> Result<Self> {
        let shared = SharedState::new();
        let camera: Arc<dyn GeometricCamera> = Arc::new(CubeMapCamera::new(
            settings.camera.width,
            settings.camera.height,
        ));

        let image_cache = match &settings.cache_dir {
            Some(dir) => {
                fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create image cache {:?}", dir))?;
                Some(ImageCache::new(dir))
            }
            None => None,
        };

        let (lm_queue, lm_receiver) = KeyFrameQueue::new();
        let (lc_queue, lc_receiver) = KeyFrameQueue::new();

        let loop_closer = LoopCloser::new(
            Arc::clone(&shared),
            Arc::clone(&optimizer),
            settings.loop_closing.clone(),
        );
        let loop_closing_handle = spawn_loop_closer(loop_closer, lc_receiver);

        let local_mapper = LocalMapper::new(
            Arc::clone(&shared),
            Arc::clone(&optimizer),
            settings.local_mapping.clone(),
            Some(lc_queue),
        );
        let local_mapping_handle = spawn_local_mapper(local_mapper, lm_receiver);

        let tracker = Tracker::new(
            Arc::clone(&shared),
            optimizer,
            lm_queue,
            settings.tracking.clone(),
            image_cache,
        );

        info!(
            width = settings.camera.width,
            height = settings.camera.height,
            "SLAM system started"
        );

        Ok(Self {
            shared,
            camera,
            extractor,
            platform,
            tracker,
            local_mapping_handle: Some(local_mapping_handle),
            loop_closing_handle: Some(loop_closing_handle),
        })
    }

    /// Track one cube map capture (faces in `CubeFace` order).
    ///
    /// Returns the world-to-camera pose, or `None` while not initialized or lost.
    pub fn track_cube_map(&mut self, faces: Vec<DynamicImage>, timestamp: f64) -> Option<SE3> {
        if faces.len() != CUBE_FACES {
            warn!(
                faces = faces.len(),
                "Cube map capture should have {} faces", CUBE_FACES
            );
        }
        let frame = Frame::new(
            self.shared.map.frame_ids(),
            faces,
            timestamp,
            self.extractor.as_ref(),
            Arc::clone(&self.camera),
        );
        self.track_frame(frame)
    }

    /// Track a single image.
    pub fn track_monocular(&mut self, image: DynamicImage, timestamp: f64) -> Option<SE3> {
        let frame = Frame::monocular(
            self.shared.map.frame_ids(),
            image,
            timestamp,
            self.extractor.as_ref(),
            Arc::clone(&self.camera),
        );
        self.track_frame(frame)
    }

    fn track_frame(&mut self, frame: Frame) -> Option<SE3> {
        let before = self.tracker.state();
        let pose = self.tracker.track(frame);
        let after = self.tracker.state();
        if before != after {
            self.report_transition(before, after);
        }
        pose
    }

    fn report_transition(&self, before: TrackingState, after: TrackingState) {
        match (before, after) {
            (TrackingState::NoImagesYet | TrackingState::NotInitialized, TrackingState::Ok) => {
                let message = format!("Map initialized. {}", self.map_stats());
                self.platform.log(LogLevel::Info, LOG_TAG, &message);
            }
            (TrackingState::Lost, TrackingState::Ok) => {
                self.platform.log(LogLevel::Info, LOG_TAG, "Relocalized");
            }
            (_, TrackingState::Lost) => {
                self.platform.log(LogLevel::Warn, LOG_TAG, "Tracking lost");
            }
            _ => {}
        }
    }

    pub fn tracking_state(&self) -> TrackingState {
        self.tracker.state()
    }

    /// Get a reference to the shared state.
    pub fn shared_state(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn save_map<P: AsRef<Path>>(&self, path: P) -> Result<(), MapError> {
        self.shared.map.serialize(path)
    }

    /// Replace the map with the one stored at `path`.
    ///
    /// Tracking and the keyframe database are reset as well.
    pub fn load_map<P: AsRef<Path>>(&mut self, path: P) -> Result<(), MapError> {
        let path = path.as_ref();
        self.tracker.reset();
        let result = self.shared.map.load(path);
        self.shared.keyframe_db.clear();

        match &result {
            Ok(()) => {
                let message = format!("Loaded map {}. {}", path.display(), self.map_stats());
                self.platform.log(LogLevel::Info, LOG_TAG, &message);
            }
            Err(e) => {
                let message = format!("Failed to load map {}: {}", path.display(), e);
                self.platform.log(LogLevel::Error, LOG_TAG, &message);
            }
        }
        result
    }

    /// Write the keyframe trajectory in TUM format; returns the line count.
    pub fn save_trajectory_tum<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let written = trajectory::save_tum(&self.shared.map.get_all_keyframes(), &path)?;
        info!("Saved {} keyframe poses to {:?}", written, path.as_ref());
        Ok(written)
    }

    /// Clear the map and start over from `NoImagesYet`.
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.shared.map.clear();
        self.shared.keyframe_db.clear();
        self.platform.log(LogLevel::Info, LOG_TAG, "System reset");
    }

    /// Short map summary: `KF: <keyframes> MP: <map points>`.
    pub fn map_stats(&self) -> String {
        format!(
            "KF: {} MP: {}",
            self.shared.map.num_keyframes(),
            self.shared.map.num_map_points()
        )
    }

    pub fn all_map_points(&self) -> Vec<Arc<MapPoint>> {
        self.shared.map.get_all_map_points()
    }

    /// Shutdown the system gracefully.
    ///
    /// Local Mapping is drained and joined first so that the keyframes it
    /// forwards reach Loop Closing, which is drained and joined next.
    /// Calling this more than once is harmless.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.local_mapping_handle.take() {
            self.shared.local_mapping.request_finish();
            if handle.join().is_err() {
                warn!("Local Mapping thread panicked");
            }
        }
        if let Some(handle) = self.loop_closing_handle.take() {
            self.shared.loop_closing.request_finish();
            if handle.join().is_err() {
                warn!("Loop Closing thread panicked");
            }
            info!("SLAM system stopped. {}", self.map_stats());
        }
    }
}

impl Drop for SlamSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    use nalgebra::{Rotation3, Vector3};
    use parking_lot::Mutex;

    use super::*;
    use crate::atlas::map::{KeyFrame, KeyFrameId, Map, MapPointId};
    use crate::geometry::Sim3;
    use crate::optimizer::NullOptimizer;
    use crate::tracking::frame::{Descriptor, FeatureSet, KeyPoint};

    /// Holds the first local BA call until released.
    #[derive(Default)]
    struct GatedOptimizer {
        entered: AtomicBool,
        released: AtomicBool,
    }

    impl GatedOptimizer {
        fn wait_until_entered(&self) {
            let deadline = Instant::now() + Duration::from_secs(10);
            while !self.entered.load(Ordering::SeqCst) {
                assert!(Instant::now() < deadline, "local BA never started");
                thread::sleep(Duration::from_millis(1));
            }
        }

        fn release(&self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    impl Optimizer for GatedOptimizer {
        fn pose_optimization(&self, frame: &mut Frame, map: &Map, stop: &AtomicBool) -> bool {
            NullOptimizer.pose_optimization(frame, map, stop)
        }

        fn local_bundle_adjustment(&self, _kf: &KeyFrame, _stop: &AtomicBool, _map: &Map) {
            self.entered.store(true, Ordering::SeqCst);
            while !self.released.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
        }

        fn global_bundle_adjustment(
            &self,
            map: &Map,
            iterations: usize,
            stop: &AtomicBool,
            loop_keyframe: Option<KeyFrameId>,
            robust: bool,
        ) -> usize {
            NullOptimizer.global_bundle_adjustment(map, iterations, stop, loop_keyframe, robust)
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

    #[derive(Default)]
    struct RecordingPlatform {
        messages: Mutex<Vec<(LogLevel, String)>>,
    }

    impl RecordingPlatform {
        fn contains(&self, level: LogLevel, prefix: &str) -> bool {
            self.messages
                .lock()
                .iter()
                .any(|(l, m)| *l == level && m.starts_with(prefix))
        }
    }

    impl Platform for RecordingPlatform {
        fn log(&self, level: LogLevel, tag: &str, message: &str) {
            assert_eq!(tag, LOG_TAG);
            self.messages.lock().push((level, message.to_string()));
        }

        fn load_file(&self, name: &str) -> anyhow::Result<Vec<u8>> {
            anyhow::bail!("no asset {}", name)
        }
    }

    /// Hands out scripted feature sets, one per image, then empty sets.
    #[derive(Default)]
    struct ScriptedExtractor {
        sets: Mutex<VecDeque<FeatureSet>>,
    }

    impl ScriptedExtractor {
        fn push(&self, set: FeatureSet) {
            self.sets.lock().push_back(set);
        }
    }

    impl FeatureExtractor for ScriptedExtractor {
        fn detect_and_describe(
            &self,
            _image: &DynamicImage,
            _mask: Option<&image::GrayImage>,
        ) -> FeatureSet {
            self.sets.lock().pop_front().unwrap_or_default()
        }
    }

    fn frac(x: f64) -> f64 {
        x - x.floor()
    }

    fn descriptor(i: usize) -> Descriptor {
        let mut d = [0u8; 32];
        d[i % 32] = 0xFF;
        d[(i + 7) % 32] ^= 0x0F;
        d
    }

    /// Features of a 25-point scene seen from `pose`.
    fn view(pose: &SE3) -> FeatureSet {
        let k = CubeMapCamera::new(512, 512).intrinsics();
        let keypoints = (0..25)
            .map(|i| {
                let f = i as f64 + 1.0;
                let z = 3.0 + 6.0 * frac(f * 0.618_033_988_75);
                let x = (frac(f * 0.754_877_666) - 0.5) * 0.8 * z;
                let y = (frac(f * 0.569_840_29) - 0.5) * 0.8 * z;
                let p = k * pose.transform_point(&Vector3::new(x, y, z));
                KeyPoint::new(p.x / p.z, p.y / p.z)
            })
            .collect();
        FeatureSet {
            keypoints,
            descriptors: (0..25).map(descriptor).collect(),
        }
    }

    fn moved() -> SE3 {
        SE3::from_rt(
            &Rotation3::from_euler_angles(0.01, 0.05, -0.02).into_inner(),
            Vector3::new(-0.5, 0.05, 0.05),
        )
    }

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.tracking.init_search_radius = 400.0;
        settings
    }

    fn blank() -> DynamicImage {
        DynamicImage::new_luma8(8, 8)
    }

    /// Initialize and track until three keyframes are queued, with local BA
    /// parked on the second one.
    fn session_with_parked_local_ba() -> (SlamSystem, Arc<GatedOptimizer>) {
        let extractor = Arc::new(ScriptedExtractor::default());
        extractor.push(view(&SE3::identity()));
        for _ in 0..12 {
            extractor.push(view(&moved()));
        }
        let optimizer = Arc::new(GatedOptimizer::default());
        let mut system = SlamSystem::new(settings(), extractor, optimizer.clone()).unwrap();
        for i in 0..13 {
            system.track_monocular(blank(), 0.1 * i as f64);
        }
        assert_eq!(system.tracking_state(), TrackingState::Ok);
        optimizer.wait_until_entered();
        (system, optimizer)
    }

    #[test]
    fn test_monocular_session_builds_map() {
        let extractor = Arc::new(ScriptedExtractor::default());
        extractor.push(view(&SE3::identity()));
        extractor.push(view(&moved()));
        for _ in 0..11 {
            extractor.push(view(&moved()));
        }

        let mut system =
            SlamSystem::new(settings(), extractor.clone(), Arc::new(NullOptimizer)).unwrap();
        assert_eq!(system.tracking_state(), TrackingState::NoImagesYet);

        assert!(system.track_monocular(blank(), 0.0).is_none());
        assert_eq!(system.tracking_state(), TrackingState::NotInitialized);

        assert_eq!(system.track_monocular(blank(), 0.1), Some(SE3::identity()));
        assert_eq!(system.tracking_state(), TrackingState::Ok);

        for i in 0..11 {
            assert!(system.track_monocular(blank(), 0.2 + 0.1 * i as f64).is_some());
        }
        system.shutdown();
        system.shutdown();

        // Initial keyframe plus tracked frames 0 and 10.
        assert_eq!(system.shared_state().map.num_keyframes(), 3);
        assert!(system.all_map_points().len() > 10);
        assert_eq!(
            system.map_stats(),
            format!("KF: 3 MP: {}", system.all_map_points().len())
        );
        assert!(system.shared_state().local_mapping.is_finished());
        assert!(system.shared_state().loop_closing.is_finished());
    }

    #[test]
    fn test_cube_map_capture_uses_first_face() {
        let extractor = Arc::new(ScriptedExtractor::default());
        for pose in [SE3::identity(), moved()] {
            extractor.push(view(&pose));
            for _ in 1..CUBE_FACES {
                extractor.push(FeatureSet::default());
            }
        }

        let mut system =
            SlamSystem::new(settings(), extractor.clone(), Arc::new(NullOptimizer)).unwrap();
        assert!(system.track_cube_map(vec![blank(); CUBE_FACES], 0.0).is_none());
        assert!(system
            .track_cube_map(vec![blank(); CUBE_FACES], 0.1)
            .is_some());
        assert_eq!(system.tracking_state(), TrackingState::Ok);
    }

    #[test]
    fn test_save_load_and_trajectory() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = Arc::new(ScriptedExtractor::default());
        extractor.push(view(&SE3::identity()));
        extractor.push(view(&moved()));

        let mut system =
            SlamSystem::new(settings(), extractor.clone(), Arc::new(NullOptimizer)).unwrap();
        system.track_monocular(blank(), 0.0);
        system.track_monocular(blank(), 0.1);
        system.shutdown();

        let map_path = dir.path().join("map.txt");
        system.save_map(&map_path).unwrap();
        let stats = system.map_stats();

        let mut restored = SlamSystem::new(
            Settings::default(),
            Arc::new(ScriptedExtractor::default()),
            Arc::new(NullOptimizer),
        )
        .unwrap();
        restored.load_map(&map_path).unwrap();
        assert_eq!(restored.map_stats(), stats);
        assert_eq!(restored.tracking_state(), TrackingState::NoImagesYet);

        let traj_path = dir.path().join("traj.txt");
        assert_eq!(restored.save_trajectory_tum(&traj_path).unwrap(), 1);

        assert!(restored.load_map(dir.path().join("absent.txt")).is_err());
        assert_eq!(restored.map_stats(), stats);

        restored.reset();
        assert_eq!(restored.map_stats(), "KF: 0 MP: 0");
    }

    #[test]
    fn test_load_map_drops_keyframes_still_queued() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.txt");
        fs::write(&empty, "MAP_V1\n0 0\n").unwrap();

        let (mut system, optimizer) = session_with_parked_local_ba();
        system.load_map(&empty).unwrap();
        optimizer.release();
        system.shutdown();

        assert_eq!(system.map_stats(), "KF: 0 MP: 0");
        assert!(system.shared_state().keyframe_db.is_empty());
    }

    #[test]
    fn test_reset_drops_keyframes_still_queued() {
        let (mut system, optimizer) = session_with_parked_local_ba();
        system.reset();
        optimizer.release();
        system.shutdown();

        assert_eq!(system.map_stats(), "KF: 0 MP: 0");
        assert!(system.shared_state().keyframe_db.is_empty());
        assert_eq!(system.tracking_state(), TrackingState::NoImagesYet);
    }

    #[test]
    fn test_host_events_reach_platform() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = Arc::new(ScriptedExtractor::default());
        extractor.push(view(&SE3::identity()));
        extractor.push(view(&moved()));
        let platform = Arc::new(RecordingPlatform::default());

        let mut system = SlamSystem::with_platform(
            settings(),
            extractor,
            Arc::new(NullOptimizer),
            platform.clone(),
        )
        .unwrap();
        system.track_monocular(blank(), 0.0);
        assert!(platform.messages.lock().is_empty());
        system.track_monocular(blank(), 0.1);
        assert!(platform.contains(LogLevel::Info, "Map initialized"));

        assert!(system.load_map(dir.path().join("absent.txt")).is_err());
        assert!(platform.contains(LogLevel::Error, "Failed to load map"));

        system.reset();
        assert!(platform.contains(LogLevel::Info, "System reset"));
        assert_eq!(platform.messages.lock().len(), 3);
    }

    #[test]
    fn test_keyframe_images_cached() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings();
        settings.cache_dir = Some(dir.path().join("cache"));

        let extractor = Arc::new(ScriptedExtractor::default());
        extractor.push(view(&SE3::identity()));
        extractor.push(view(&moved()));

        let mut system =
            SlamSystem::new(settings, extractor.clone(), Arc::new(NullOptimizer)).unwrap();
        system.track_monocular(blank(), 0.0);
        system.track_monocular(blank(), 0.1);
        system.shutdown();

        let keyframes = system.shared_state().map.get_all_keyframes();
        assert_eq!(keyframes.len(), 1);
        assert_eq!(keyframes[0].image_paths.len(), 1);
        assert!(keyframes[0].image_paths[0].exists());
    }
}
