//! Local Mapper - Main Local Mapping thread implementation.
//!
//! Processes keyframes received from Tracking:
//! 1. Inserts the keyframe into the map
//! 2. Updates the covisibility graph from its map point observations
//! 3. Registers it with the keyframe database
//! 4. Local BA (through the configured optimizer)
//! 5. Forwards it to Loop Closing
//!
//! The loop exits once a finish has been requested and the queue is empty, so
//! no queued keyframe is dropped at shutdown.
//!
//! Keyframes created before the map was last cleared or loaded carry an older
//! map epoch and are discarded instead of being inserted.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info};

use crate::atlas::map::KeyFrame;
use crate::config::LocalMappingSettings;
use crate::optimizer::Optimizer;
use crate::system::messages::KeyFrameQueue;
use crate::system::shared_state::SharedState;

/// Local Mapping thread state.
pub struct LocalMapper {
    shared: Arc<SharedState>,

    optimizer: Arc<dyn Optimizer>,

    settings: LocalMappingSettings,

    /// Loop Closing's queue, when that thread runs.
    loop_closing: Option<KeyFrameQueue>,

    keyframes_processed: usize,

    keyframes_discarded: usize,
}

impl LocalMapper {
    /// Create a new LocalMapper.
    ///
    /// # Arguments
    /// * `shared` - Map, keyframe database and worker flags
    /// * `optimizer` - Runs local BA
    /// * `settings` - Poll interval and local BA switch
    /// * `loop_closing` - Optional queue to forward keyframes to Loop Closing
    pub fn new(
        shared: Arc<SharedState>,
        optimizer: Arc<dyn Optimizer>,
        settings: LocalMappingSettings,
        loop_closing: Option<KeyFrameQueue>,
    ) -> Self {
        Self {
            shared,
            optimizer,
            settings,
            loop_closing,
            keyframes_processed: 0,
            keyframes_discarded: 0,
        }
    }

    /// Main thread loop: receive keyframes and process them.
    ///
    /// Runs until finish is requested and the queue has drained, or the
    /// channel is closed.
    pub fn run(&mut self, kf_receiver: Receiver<Arc<KeyFrame>>) {
        self.shared.local_mapping.set_finished(false);
        info!("LocalMapper thread started");

        let poll = self.settings.poll_interval();
        loop {
            if self.shared.local_mapping.is_finish_requested() && kf_receiver.is_empty() {
                break;
            }

            match kf_receiver.recv_timeout(poll) {
                Ok(kf) => self.process_keyframe(kf),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!(
            "LocalMapper thread exiting. Processed {} keyframes, discarded {}",
            self.keyframes_processed, self.keyframes_discarded
        );
        self.shared.local_mapping.set_finished(true);
    }

    /// Process a single keyframe.
    pub fn process_keyframe(&mut self, kf: Arc<KeyFrame>) {
        let map = &self.shared.map;

        // Step 1: Insert keyframe into the map, unless the map was reset since
        if !map.add_keyframe_if_current(Arc::clone(&kf)) {
            self.discard(&kf);
            return;
        }

        // Step 2: Covisibility edges through shared map points
        map.update_connections(&kf);

        // Step 3: Appearance index for relocalization and loop queries
        self.shared.keyframe_db.add_keyframe(&kf);
        if kf.map_epoch != map.epoch() {
            // Reset landed between the insert and the registration.
            self.shared.keyframe_db.erase(kf.id);
            self.discard(&kf);
            return;
        }

        // Step 4: Local Bundle Adjustment
        if self.settings.run_local_ba && map.num_keyframes() > 1 {
            self.optimizer
                .local_bundle_adjustment(&kf, self.shared.local_mapping.stop_flag(), map);
        }

        self.keyframes_processed += 1;
        debug!(
            keyframe = %kf.id,
            connections = kf.connected_keyframes().len(),
            map_points = kf.num_map_points(),
            "Keyframe inserted"
        );

        // Step 5: Send keyframe to Loop Closing
        if let Some(queue) = &self.loop_closing {
            queue.insert_keyframe(kf);
        }
    }

    fn discard(&mut self, kf: &KeyFrame) {
        self.keyframes_discarded += 1;
        debug!(
            keyframe = %kf.id,
            epoch = kf.map_epoch,
            current = self.shared.map.epoch(),
            "Dropping keyframe from a previous map"
        );
    }

    pub fn keyframes_processed(&self) -> usize {
        self.keyframes_processed
    }

    pub fn keyframes_discarded(&self) -> usize {
        self.keyframes_discarded
    }
}

/// Spawn the local mapping thread.
///
/// Returns a handle to the spawned thread.
pub fn spawn_local_mapper(
    mut local_mapper: LocalMapper,
    kf_receiver: Receiver<Arc<KeyFrame>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || local_mapper.run(kf_receiver))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use nalgebra::Vector3;

    use super::*;
    use crate::atlas::map::{FrameId, KeyFrameId, Map, MapPointId};
    use crate::camera::{CubeMapCamera, GeometricCamera};
    use crate::geometry::{Sim3, SE3};
    use crate::optimizer::NullOptimizer;
    use crate::tracking::frame::{FeatureSet, Frame, KeyPoint};

    #[derive(Default)]
    struct CountingOptimizer {
        local_ba_calls: AtomicUsize,
    }

    impl Optimizer for CountingOptimizer {
        fn pose_optimization(&self, _frame: &mut Frame, _map: &Map, _stop: &AtomicBool) -> bool {
            true
        }

        fn local_bundle_adjustment(&self, _kf: &KeyFrame, _stop: &AtomicBool, _map: &Map) {
            self.local_ba_calls.fetch_add(1, Ordering::SeqCst);
        }

        fn global_bundle_adjustment(
            &self,
            _map: &Map,
            _iterations: usize,
            _stop: &AtomicBool,
            _loop_keyframe: Option<KeyFrameId>,
            _robust: bool,
        ) -> usize {
            0
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

    fn keyframe(id: u64) -> Arc<KeyFrame> {
        Arc::new(KeyFrame::from_persisted(
            KeyFrameId::new(id),
            id as f64,
            Some(SE3::identity()),
        ))
    }

    /// KeyFrame with two feature slots.
    fn keyframe_with_slots(id: u64) -> Arc<KeyFrame> {
        let camera: Arc<dyn GeometricCamera> = Arc::new(CubeMapCamera::new(512, 512));
        let features = FeatureSet {
            keypoints: vec![KeyPoint::new(10.0, 20.0), KeyPoint::new(30.0, 40.0)],
            descriptors: vec![[1u8; 32], [2u8; 32]],
        };
        let mut frame = Frame::from_features(FrameId::new(id), id as f64, camera, vec![features]);
        frame.pose = Some(SE3::identity());
        Arc::new(KeyFrame::from_frame(KeyFrameId::new(id), &frame, Vec::new()))
    }

    fn mapper(shared: &Arc<SharedState>, optimizer: Arc<dyn Optimizer>) -> LocalMapper {
        LocalMapper::new(
            Arc::clone(shared),
            optimizer,
            LocalMappingSettings::default(),
            None,
        )
    }

    #[test]
    fn test_queue_drained_on_shutdown() {
        let shared = SharedState::new();
        let (queue, receiver) = KeyFrameQueue::new();
        let local_mapper = mapper(&shared, Arc::new(NullOptimizer));

        const N: u64 = 50;
        for id in 0..N {
            assert!(queue.insert_keyframe(keyframe(id)));
        }
        shared.local_mapping.request_finish();

        spawn_local_mapper(local_mapper, receiver).join().unwrap();

        assert!(shared.local_mapping.is_finished());
        assert_eq!(shared.map.num_keyframes(), N as usize);
        assert_eq!(shared.keyframe_db.len(), N as usize);
    }

    #[test]
    fn test_exits_when_producers_are_gone() {
        let shared = SharedState::new();
        let (queue, receiver) = KeyFrameQueue::new();
        queue.insert_keyframe(keyframe(1));
        drop(queue);

        spawn_local_mapper(mapper(&shared, Arc::new(NullOptimizer)), receiver)
            .join()
            .unwrap();
        assert_eq!(shared.map.num_keyframes(), 1);
    }

    #[test]
    fn test_forwards_to_loop_closing_in_order() {
        let shared = SharedState::new();
        let (lc_queue, lc_receiver) = KeyFrameQueue::new();
        let mut local_mapper = LocalMapper::new(
            Arc::clone(&shared),
            Arc::new(NullOptimizer),
            LocalMappingSettings::default(),
            Some(lc_queue),
        );

        for id in [3, 1, 2] {
            local_mapper.process_keyframe(keyframe(id));
        }
        assert_eq!(local_mapper.keyframes_processed(), 3);

        let forwarded: Vec<u64> = lc_receiver.try_iter().map(|kf| kf.id.0).collect();
        assert_eq!(forwarded, vec![3, 1, 2]);
    }

    #[test]
    fn test_connects_keyframes_sharing_points() {
        let shared = SharedState::new();
        let mut local_mapper = mapper(&shared, Arc::new(NullOptimizer));
        let map = &shared.map;

        let a = keyframe_with_slots(1);
        let mp = map.create_map_point(Vector3::new(0.0, 0.0, 4.0), Some(a.id));
        assert!(map.associate(&a, 0, &mp));
        local_mapper.process_keyframe(Arc::clone(&a));

        let b = keyframe_with_slots(2);
        local_mapper.process_keyframe(Arc::clone(&b));

        let c = keyframe_with_slots(3);
        assert!(map.associate(&c, 1, &mp));
        local_mapper.process_keyframe(Arc::clone(&c));

        assert!(c.is_connected(a.id));
        assert!(a.is_connected(c.id));
        assert!(!b.is_connected(a.id));
        assert!(!c.is_connected(b.id));
    }

    #[test]
    fn test_keyframes_queued_before_clear_are_dropped() {
        let shared = SharedState::new();
        let (lc_queue, lc_receiver) = KeyFrameQueue::new();
        let optimizer = Arc::new(CountingOptimizer::default());
        let mut local_mapper = LocalMapper::new(
            Arc::clone(&shared),
            optimizer.clone(),
            LocalMappingSettings::default(),
            Some(lc_queue),
        );

        local_mapper.process_keyframe(keyframe(0));
        let queued = [keyframe(1), keyframe(2)];
        shared.map.clear();
        shared.keyframe_db.clear();
        for kf in queued {
            local_mapper.process_keyframe(kf);
        }

        assert_eq!(shared.map.num_keyframes(), 0);
        assert!(shared.keyframe_db.is_empty());
        assert_eq!(local_mapper.keyframes_processed(), 1);
        assert_eq!(local_mapper.keyframes_discarded(), 2);
        assert_eq!(optimizer.local_ba_calls.load(Ordering::SeqCst), 0);
        let forwarded: Vec<u64> = lc_receiver.try_iter().map(|kf| kf.id.0).collect();
        assert_eq!(forwarded, vec![0]);

        let fresh = KeyFrame::from_persisted(KeyFrameId::new(3), 3.0, Some(SE3::identity()))
            .with_map_epoch(shared.map.epoch());
        local_mapper.process_keyframe(Arc::new(fresh));
        assert_eq!(shared.map.num_keyframes(), 1);
        assert_eq!(shared.keyframe_db.len(), 1);
    }

    #[test]
    fn test_local_ba_toggle() {
        let shared = SharedState::new();
        let optimizer = Arc::new(CountingOptimizer::default());
        let mut local_mapper = mapper(&shared, optimizer.clone());
        for id in 0..3 {
            local_mapper.process_keyframe(keyframe(id));
        }
        // Skipped while the map holds a single keyframe.
        assert_eq!(optimizer.local_ba_calls.load(Ordering::SeqCst), 2);

        let optimizer = Arc::new(CountingOptimizer::default());
        let mut local_mapper = LocalMapper::new(
            SharedState::new(),
            optimizer.clone(),
            LocalMappingSettings {
                run_local_ba: false,
                ..LocalMappingSettings::default()
            },
            None,
        );
        for id in 0..3 {
            local_mapper.process_keyframe(keyframe(id));
        }
        assert_eq!(optimizer.local_ba_calls.load(Ordering::SeqCst), 0);
    }
}
