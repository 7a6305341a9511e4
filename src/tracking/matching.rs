//! Descriptor matching used to bootstrap the map.

use crate::tracking::frame::features::{descriptor_distance, FeatureSet};

/// Maximum descriptor distance for a confident match.
pub const TH_LOW: u32 = 50;
/// Best/second-best distance ratio.
pub const NN_RATIO: f32 = 0.9;

/// Match reference keypoints to current keypoints for two-view initialization.
///
/// Candidates are restricted to current keypoints within `radius` pixels of the
/// reference keypoint. A match needs a distance of at most `max_distance` and
/// must pass the ratio test against the second-best candidate. When two
/// reference keypoints claim the same current keypoint, the closer descriptor
/// keeps it.
///
/// Returns a vector parallel to `reference.keypoints` and the number of matches.
pub fn search_for_initialization(
    reference: &FeatureSet,
    current: &FeatureSet,
    radius: f64,
    max_distance: u32,
    nn_ratio: f32,
) -> (Vec<Option<usize>>, usize) {
    let mut matches: Vec<Option<usize>> = vec![None; reference.len()];
    // For each current keypoint: (reference index, distance) of its owner.
    let mut owner: Vec<Option<(usize, u32)>> = vec![None; current.len()];
    let radius_sq = radius * radius;

    for (i, (kp1, d1)) in reference
        .keypoints
        .iter()
        .zip(&reference.descriptors)
        .enumerate()
    {
        let mut best = (u32::MAX, None);
        let mut second = u32::MAX;

        for (j, (kp2, d2)) in current
            .keypoints
            .iter()
            .zip(&current.descriptors)
            .enumerate()
        {
            if (kp2.pt - kp1.pt).norm_squared() > radius_sq {
                continue;
            }
            let dist = descriptor_distance(d1, d2);
            if dist < best.0 {
                second = best.0;
                best = (dist, Some(j));
            } else if dist < second {
                second = dist;
            }
        }

        let (dist, Some(j)) = best else {
            continue;
        };
        if dist > max_distance {
            continue;
        }
        if second != u32::MAX && dist as f32 >= nn_ratio * second as f32 {
            continue;
        }

        match owner[j] {
            Some((_, prev)) if prev <= dist => continue,
            Some((prev_i, _)) => matches[prev_i] = None,
            None => {}
        }
        owner[j] = Some((i, dist));
        matches[i] = Some(j);
    }

    let count = matches.iter().filter(|m| m.is_some()).count();
    (matches, count)
}
