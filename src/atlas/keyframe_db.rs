//! KeyFrameDatabase - lightweight place recognition index.
//!
//! Keyframes are indexed by a coarse bag-of-words vector: each binary
//! descriptor is quantized to a word by its leading two bytes, and the word
//! histogram is L1-normalized. Queries score entries by dot product. The index
//! is guarded by its own lock so Local Mapping can insert while Tracking
//! queries for relocalization.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::atlas::map::{KeyFrame, KeyFrameId};
use crate::tracking::frame::{Descriptor, FeatureSet};

/// Bag-of-Words vector: word_id -> weight.
pub type BowVector = HashMap<u32, f64>;

/// Quantize a descriptor to its vocabulary word.
pub fn word_of(descriptor: &Descriptor) -> u32 {
    u32::from(u16::from_le_bytes([descriptor[0], descriptor[1]]))
}

/// L1-normalized word histogram over every face's descriptors.
pub fn bow_from_features(features: &[FeatureSet]) -> BowVector {
    let mut bow = BowVector::new();
    let mut total = 0.0;
    for d in features.iter().flat_map(|fs| fs.descriptors.iter()) {
        *bow.entry(word_of(d)).or_insert(0.0) += 1.0;
        total += 1.0;
    }
    if total > 0.0 {
        for w in bow.values_mut() {
            *w /= total;
        }
    }
    bow
}

/// Dot product between sparse histograms.
pub fn score(a: &BowVector, b: &BowVector) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(word, w)| large.get(word).map(|v| w * v))
        .sum()
}

/// Candidate keyframe with similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub keyframe_id: KeyFrameId,
    pub score: f64,
}

#[derive(Debug, Default)]
pub struct KeyFrameDatabase {
    entries: Mutex<HashMap<KeyFrameId, BowVector>>,
}

impl KeyFrameDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a keyframe entry.
    pub fn add(&self, kf_id: KeyFrameId, bow: BowVector) {
        self.entries.lock().insert(kf_id, bow);
    }

    /// Index a keyframe by its stored BoW vector.
    pub fn add_keyframe(&self, kf: &KeyFrame) {
        self.add(kf.id, kf.bow_vector.clone());
    }

    pub fn erase(&self, kf_id: KeyFrameId) {
        self.entries.lock().remove(&kf_id);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Entries scoring above zero, sorted by decreasing score.
    ///
    /// `keep` filters entries before scoring.
    fn ranked(&self, query: &BowVector, keep: impl Fn(KeyFrameId) -> bool) -> Vec<Candidate> {
        let entries = self.entries.lock();
        let mut cands: Vec<Candidate> = entries
            .iter()
            .filter(|(id, _)| keep(**id))
            .map(|(id, bow)| Candidate {
                keyframe_id: *id,
                score: score(query, bow),
            })
            .filter(|c| c.score > 0.0)
            .collect();
        cands.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.keyframe_id.cmp(&b.keyframe_id))
        });
        cands
    }

    /// Keyframes resembling `query`, best first, at most `max_results`.
    pub fn detect_relocalization_candidates(
        &self,
        query: &BowVector,
        max_results: usize,
    ) -> Vec<Candidate> {
        let mut cands = self.ranked(query, |_| true);
        cands.truncate(max_results);
        cands
    }

    /// Appearance-based loop candidates for `kf`: excludes the keyframe itself
    /// and its covisible neighbours, and keeps scores of at least `min_score`.
    pub fn detect_loop_candidates(&self, kf: &KeyFrame, min_score: f64) -> Vec<Candidate> {
        let connected = kf.connected_keyframes();
        self.ranked(&kf.bow_vector, |id| id != kf.id && !connected.contains(&id))
            .into_iter()
            .filter(|c| c.score >= min_score)
            .collect()
    }
}
