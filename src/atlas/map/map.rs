//! Map - Container for KeyFrames and MapPoints.
//!
//! The Map owns every KeyFrame and MapPoint and is shared by the Tracking,
//! Local Mapping and Loop Closing threads. All of its methods take the single
//! map lock for their full duration, and enumeration returns snapshot copies so
//! callers can iterate without holding it.
//!
//! Entities reference each other by id only; the map is the sole owner.
//!
//! Every `clear` and `load` starts a new map epoch. KeyFrames remember the
//! epoch they were created in, so a worker still holding a KeyFrame from before
//! a reset cannot insert it into the new map.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nalgebra::Vector3;
use parking_lot::RwLock;
use tracing::{info, warn};

use super::id_allocator::IdAllocator;
use super::keyframe::KeyFrame;
use super::map_point::MapPoint;
use super::persistence::{
    has_header, parse_map, write_map, KeyFrameRecord, MapError, MapPointRecord,
};
use super::types::{FrameId, KeyFrameId, MapPointId};

#[derive(Default)]
struct MapInner {
    keyframes: BTreeMap<KeyFrameId, Arc<KeyFrame>>,
    map_points: BTreeMap<MapPointId, Arc<MapPoint>>,
    /// Subset of map points used for tracking continuity.
    reference_map_points: Vec<MapPointId>,
}

/// The shared SLAM map.
#[derive(Default)]
pub struct Map {
    inner: RwLock<MapInner>,

    /// Shared numbering space for Frames and KeyFrames.
    frame_ids: IdAllocator,

    map_point_ids: IdAllocator,

    /// Bumped under the write lock by `clear` and `load`.
    epoch: AtomicU64,
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // ID Generation
    // ─────────────────────────────────────────────────────────────────────────

    pub fn next_frame_id(&self) -> FrameId {
        FrameId::new(self.frame_ids.next())
    }

    /// KeyFrames draw from the Frame counter.
    pub fn next_keyframe_id(&self) -> KeyFrameId {
        KeyFrameId::new(self.frame_ids.next())
    }

    pub fn next_map_point_id(&self) -> MapPointId {
        MapPointId::new(self.map_point_ids.next())
    }

    /// The Frame/KeyFrame allocator, for building frames against this map.
    pub fn frame_ids(&self) -> &IdAllocator {
        &self.frame_ids
    }

    // ─────────────────────────────────────────────────────────────────────────
    // KeyFrame Operations
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_keyframe(&self, kf: Arc<KeyFrame>) {
        let mut inner = self.inner.write();
        self.frame_ids.advance_past(kf.id.0);
        inner.keyframes.insert(kf.id, kf);
    }

    /// Insert `kf` unless the map was cleared or reloaded since it was created.
    ///
    /// The epoch check and the insertion happen under one write lock, so a
    /// concurrent `clear` either removes the KeyFrame or makes this return false.
    pub fn add_keyframe_if_current(&self, kf: Arc<KeyFrame>) -> bool {
        let mut inner = self.inner.write();
        if kf.map_epoch != self.epoch() {
            return false;
        }
        self.frame_ids.advance_past(kf.id.0);
        inner.keyframes.insert(kf.id, kf);
        true
    }

    pub fn keyframe(&self, id: KeyFrameId) -> Option<Arc<KeyFrame>> {
        self.inner.read().keyframes.get(&id).cloned()
    }

    pub fn contains_keyframe(&self, id: KeyFrameId) -> bool {
        self.inner.read().keyframes.contains_key(&id)
    }

    /// Snapshot of all KeyFrames in ascending id order.
    pub fn get_all_keyframes(&self) -> Vec<Arc<KeyFrame>> {
        self.inner.read().keyframes.values().cloned().collect()
    }

    pub fn num_keyframes(&self) -> usize {
        self.inner.read().keyframes.len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // MapPoint Operations
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_map_point(&self, mp: Arc<MapPoint>) {
        let mut inner = self.inner.write();
        self.map_point_ids.advance_past(mp.id.0);
        inner.map_points.insert(mp.id, mp);
    }

    /// Allocate an id, create the MapPoint and store it.
    pub fn create_map_point(
        &self,
        position: Vector3<f64>,
        reference_kf: Option<KeyFrameId>,
    ) -> Arc<MapPoint> {
        let mut inner = self.inner.write();
        let mp = Arc::new(MapPoint::new(
            self.next_map_point_id(),
            position,
            reference_kf,
        ));
        inner.map_points.insert(mp.id, Arc::clone(&mp));
        mp
    }

    pub fn map_point(&self, id: MapPointId) -> Option<Arc<MapPoint>> {
        self.inner.read().map_points.get(&id).cloned()
    }

    /// Snapshot of all MapPoints in ascending id order.
    pub fn get_all_map_points(&self) -> Vec<Arc<MapPoint>> {
        self.inner.read().map_points.values().cloned().collect()
    }

    pub fn num_map_points(&self) -> usize {
        self.inner.read().map_points.len()
    }

    pub fn set_reference_map_points(&self, ids: Vec<MapPointId>) {
        self.inner.write().reference_map_points = ids;
    }

    /// Reference MapPoints still present in the map.
    pub fn reference_map_points(&self) -> Vec<Arc<MapPoint>> {
        let inner = self.inner.read();
        inner
            .reference_map_points
            .iter()
            .filter_map(|id| inner.map_points.get(id).cloned())
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Associations
    // ─────────────────────────────────────────────────────────────────────────

    /// Link feature `feature_idx` of `kf` with `mp` in both directions.
    ///
    /// Returns false if the feature index is out of range.
    pub fn associate(&self, kf: &KeyFrame, feature_idx: usize, mp: &MapPoint) -> bool {
        let _inner = self.inner.read();
        if !kf.set_map_point(feature_idx, mp.id) {
            return false;
        }
        mp.add_observation(kf.id, feature_idx);
        true
    }

    /// Connect `kf` with every KeyFrame that observes one of its MapPoints.
    ///
    /// Edges are added on both sides when the other KeyFrame is in the map.
    pub fn update_connections(&self, kf: &KeyFrame) {
        let inner = self.inner.read();
        for (_, mp_id) in kf.map_point_indices() {
            let Some(mp) = inner.map_points.get(&mp_id) else {
                continue;
            };
            for other_id in mp.observations().into_keys() {
                if other_id == kf.id {
                    continue;
                }
                kf.add_connection(other_id);
                if let Some(other) = inner.keyframes.get(&other_id) {
                    other.add_connection(kf.id);
                }
            }
        }
    }

    /// Current map epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Drop every KeyFrame and MapPoint and start a new epoch. Id counters are
    /// not rewound.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        inner.keyframes.clear();
        inner.map_points.clear();
        inner.reference_map_points.clear();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────────

    /// Write the map in the `MAP_V1` text format.
    ///
    /// KeyFrames without a pose are skipped.
    pub fn serialize(&self, path: impl AsRef<Path>) -> Result<(), MapError> {
        let path = path.as_ref();
        let inner = self.inner.read();

        let keyframes: Vec<KeyFrameRecord> = inner
            .keyframes
            .values()
            .filter_map(|kf| {
                kf.pose().map(|pose| KeyFrameRecord {
                    id: kf.id.0,
                    timestamp: kf.timestamp,
                    pose,
                })
            })
            .collect();
        let map_points: Vec<MapPointRecord> = inner
            .map_points
            .values()
            .map(|mp| MapPointRecord {
                id: mp.id.0,
                position: mp.position(),
            })
            .collect();

        write_map(BufWriter::new(File::create(path)?), &keyframes, &map_points)?;

        info!(
            "Saved map to {} ({} keyframes, {} map points)",
            path.display(),
            keyframes.len(),
            map_points.len()
        );
        Ok(())
    }

    /// Replace the map contents with a `MAP_V1` file.
    ///
    /// A missing file or header leaves the map untouched. Once the header is
    /// valid the map is cleared; a malformed record then leaves it empty.
    /// Id counters are advanced past every loaded id.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<(), MapError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        if !has_header(&text) {
            return Err(MapError::MissingHeader);
        }

        let mut inner = self.inner.write();
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        inner.keyframes.clear();
        inner.map_points.clear();
        inner.reference_map_points.clear();

        let parsed = parse_map(&text)?;

        if parsed.keyframes.len() != parsed.declared_keyframes
            || parsed.map_points.len() != parsed.declared_map_points
        {
            warn!(
                "Map header declares {} keyframes / {} map points, file has {} / {}",
                parsed.declared_keyframes,
                parsed.declared_map_points,
                parsed.keyframes.len(),
                parsed.map_points.len()
            );
        }

        for rec in &parsed.keyframes {
            let kf = KeyFrame::from_persisted(KeyFrameId::new(rec.id), rec.timestamp, Some(rec.pose))
                .with_map_epoch(epoch);
            self.frame_ids.advance_past(rec.id);
            inner.keyframes.insert(kf.id, Arc::new(kf));
        }
        for rec in &parsed.map_points {
            let mp = MapPoint::new(MapPointId::new(rec.id), rec.position, None);
            self.map_point_ids.advance_past(rec.id);
            inner.map_points.insert(mp.id, Arc::new(mp));
        }

        info!(
            "Loaded map from {} ({} keyframes, {} map points)",
            path.display(),
            inner.keyframes.len(),
            inner.map_points.len()
        );
        Ok(())
    }
}

impl std::fmt::Debug for Map {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Map")
            .field("keyframes", &inner.keyframes.len())
            .field("map_points", &inner.map_points.len())
            .field("next_frame_id", &self.frame_ids.peek())
            .finish()
    }
}
