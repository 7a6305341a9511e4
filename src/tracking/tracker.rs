//! Main tracker: runs the per-capture state machine.
//!
//! - `NoImagesYet` moves straight to `NotInitialized` on the first capture
//! - `NotInitialized` keeps a reference frame and retries two-view
//!   initialization against it on every later capture
//! - `Ok` propagates the last pose, asks the optimizer to refine it and
//!   promotes every Nth frame to a keyframe
//! - `Lost` tries to relocalize against the keyframe database
//!
//! New keyframes are handed to Local Mapping through its queue; the tracker
//! never inserts them into the map itself.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::atlas::map::{KeyFrame, MapPointId};
use crate::config::TrackingSettings;
use crate::geometry::SE3;
use crate::initializer::{Initializer, Reconstruction, PRIMARY_FACE};
use crate::optimizer::Optimizer;
use crate::system::messages::KeyFrameQueue;
use crate::system::shared_state::SharedState;
use crate::tracking::frame::{FeatureSet, Frame, ImageCache};
use crate::tracking::matching::search_for_initialization;
use crate::tracking::TrackingState;

/// Main tracking structure.
pub struct Tracker {
    /// Shared state (map, keyframe database).
    shared: Arc<SharedState>,

    optimizer: Arc<dyn Optimizer>,

    /// Producer side of Local Mapping's queue.
    local_mapping: KeyFrameQueue,

    /// Where keyframe images go; `None` keeps nothing.
    image_cache: Option<ImageCache>,

    settings: TrackingSettings,

    state: TrackingState,

    /// Holds the reference frame while not initialized.
    initializer: Option<Initializer>,

    /// Previous capture, without its images.
    last_frame: Option<Frame>,

    /// Frames tracked in `Ok`; drives the keyframe interval.
    frames_tracked: u64,

    /// Tracking is never cancelled; pose refinement gets a flag that stays clear.
    stop: AtomicBool,
}

impl Tracker {
    pub fn new(
        shared: Arc<SharedState>,
        optimizer: Arc<dyn Optimizer>,
        local_mapping: KeyFrameQueue,
        settings: TrackingSettings,
        image_cache: Option<ImageCache>,
    ) -> Self {
        Self {
            shared,
            optimizer,
            local_mapping,
            image_cache,
            settings,
            state: TrackingState::NoImagesYet,
            initializer: None,
            last_frame: None,
            frames_tracked: 0,
            stop: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }

    /// Process one capture and return its world-to-camera pose, if known.
    pub fn track(&mut self, mut frame: Frame) -> Option<SE3> {
        if self.state == TrackingState::NoImagesYet {
            self.state = TrackingState::NotInitialized;
        }

        match self.state {
            TrackingState::NoImagesYet | TrackingState::NotInitialized => {
                self.monocular_initialization(&mut frame);
            }
            TrackingState::Ok => self.track_with_last_pose(&mut frame),
            TrackingState::Lost => {
                if self.relocalization(&mut frame) {
                    self.state = TrackingState::Ok;
                }
            }
        }

        let pose = frame.pose;
        self.last_frame = Some(frame.without_images());
        pose
    }

    /// Return to `NoImagesYet`, discarding the reference frame.
    pub fn reset(&mut self) {
        self.state = TrackingState::NoImagesYet;
        self.initializer = None;
        self.last_frame = None;
        self.frames_tracked = 0;
        info!("Tracking reset");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Initialization
    // ─────────────────────────────────────────────────────────────────────────

    fn monocular_initialization(&mut self, frame: &mut Frame) {
        let Some(initializer) = self.initializer.as_mut() else {
            debug!(frame = %frame.id, "Initializer reference frame set");
            self.initializer = Some(Initializer::new(
                frame.without_images(),
                self.settings.init_sigma,
                self.settings.init_ransac_iterations,
                self.settings.seed,
            ));
            return;
        };

        let empty = FeatureSet::default();
        let reference = initializer
            .reference()
            .features
            .get(PRIMARY_FACE)
            .unwrap_or(&empty);
        let current = frame.features.get(PRIMARY_FACE).unwrap_or(&empty);
        let (matches, num_matches) = search_for_initialization(
            reference,
            current,
            self.settings.init_search_radius,
            self.settings.init_max_descriptor_distance,
            self.settings.init_nn_ratio,
        );

        match initializer.initialize(frame, &matches) {
            Ok(reconstruction) => {
                info!(
                    model = %reconstruction.model,
                    matches = num_matches,
                    good = reconstruction.num_good,
                    "Map initialized"
                );
                self.create_initial_map(frame, &matches, &reconstruction);
                self.initializer = None;
                self.frames_tracked = 0;
                self.state = TrackingState::Ok;
            }
            Err(err) => {
                debug!(frame = %frame.id, matches = num_matches, "Initialization failed: {}", err);
            }
        }
    }

    /// First keyframe at the origin plus one map point per triangulated match.
    fn create_initial_map(
        &self,
        frame: &mut Frame,
        matches: &[Option<usize>],
        reconstruction: &Reconstruction,
    ) {
        frame.pose = Some(SE3::identity());
        let kf = self.new_keyframe(frame);
        let map = &self.shared.map;
        let offset = frame.feature_offset(PRIMARY_FACE);

        let mut reference_points: Vec<MapPointId> = Vec::new();
        for (i, m) in matches.iter().enumerate() {
            let Some(j) = m else {
                continue;
            };
            if !reconstruction.triangulated.get(i).copied().unwrap_or(false) {
                continue;
            }
            let position =
                reconstruction.rotation * reconstruction.points[i] + reconstruction.translation;
            let mp = map.create_map_point(position, Some(kf.id));
            if map.associate(&kf, offset + j, &mp) {
                reference_points.push(mp.id);
            }
        }

        info!(
            keyframe = %kf.id,
            map_points = reference_points.len(),
            "Initial map created"
        );
        map.set_reference_map_points(reference_points);
        self.local_mapping.insert_keyframe(kf);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tracking
    // ─────────────────────────────────────────────────────────────────────────

    fn track_with_last_pose(&mut self, frame: &mut Frame) {
        // Stationary motion model.
        let guess = self
            .last_frame
            .as_ref()
            .and_then(|f| f.pose)
            .unwrap_or_else(SE3::identity);
        frame.pose = Some(guess);

        if !self
            .optimizer
            .pose_optimization(frame, &self.shared.map, &self.stop)
        {
            warn!(frame = %frame.id, "Tracking lost");
            frame.pose = None;
            self.state = TrackingState::Lost;
            return;
        }

        if self.frames_tracked % self.settings.keyframe_interval.max(1) == 0 {
            let kf = self.new_keyframe(frame);
            debug!(keyframe = %kf.id, frame = %frame.id, "New keyframe");
            self.local_mapping.insert_keyframe(kf);
        }
        self.frames_tracked += 1;
    }

    /// Seed the frame with each database candidate's pose until the optimizer
    /// accepts one.
    fn relocalization(&mut self, frame: &mut Frame) -> bool {
        let bow = frame.bow_vector();
        let candidates = self
            .shared
            .keyframe_db
            .detect_relocalization_candidates(&bow, self.settings.relocalization_candidates);

        for candidate in candidates {
            let Some(pose) = self
                .shared
                .map
                .keyframe(candidate.keyframe_id)
                .and_then(|kf| kf.pose())
            else {
                continue;
            };
            frame.pose = Some(pose);
            if self
                .optimizer
                .pose_optimization(frame, &self.shared.map, &self.stop)
            {
                info!(
                    frame = %frame.id,
                    keyframe = %candidate.keyframe_id,
                    score = candidate.score,
                    "Relocalized"
                );
                return true;
            }
        }

        frame.pose = None;
        false
    }

    /// Promote `frame`, flushing its images to the cache if one is configured.
    fn new_keyframe(&self, frame: &Frame) -> Arc<KeyFrame> {
        let id = self.shared.map.next_keyframe_id();
        let image_paths = self
            .image_cache
            .as_ref()
            .map(|cache| cache.flush(id, frame.images()))
            .unwrap_or_default();
        let epoch = self.shared.map.epoch();
        Arc::new(KeyFrame::from_frame(id, frame, image_paths).with_map_epoch(epoch))
    }
}
