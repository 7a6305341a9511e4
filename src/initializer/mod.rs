//! Two-view monocular initialization.
//!
//! Given a reference frame and a later frame with matches between their
//! primary-face keypoints, the [`Initializer`] fits a homography and a
//! fundamental matrix, picks one by the ratio of their inlier counts, recovers
//! the relative motion and triangulates the initial structure.
//!
//! # Thresholds
//!
//! * at least [`MIN_CORRESPONDENCES`] matches are required
//! * the homography wins when `H_inliers / (F_inliers + ε)` exceeds
//!   [`HOMOGRAPHY_RATIO_THRESHOLD`]
//! * the winning motion needs more than [`MIN_GOOD_POINTS`] points with
//!   positive depth in both views
//! * the runner-up motion must triangulate clearly fewer points, otherwise the
//!   pair is rejected as ambiguous (a planar scene seen across a narrow field
//!   of view admits two valid motions)

pub mod decomposition;
pub mod estimation;
pub mod triangulation;

use nalgebra::{Matrix3, Vector2, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::debug;

use crate::geometry::SE3;
use crate::tracking::frame::Frame;

use decomposition::{decompose_essential, decompose_homography};
use estimation::{find_fundamental, find_homography, Correspondence};
use triangulation::{check_motion, CheiralityCheck};

pub const MIN_CORRESPONDENCES: usize = 20;
pub const HOMOGRAPHY_RATIO_THRESHOLD: f64 = 0.45;
/// Initialization needs strictly more good points than this.
pub const MIN_GOOD_POINTS: usize = 10;

/// Inlier threshold in pixels, per unit of sigma.
const THRESHOLD_PER_SIGMA: f64 = 3.0;

/// A motion hypothesis is accepted only if the runner-up triangulates fewer
/// than this fraction of its good points.
const AMBIGUITY_RATIO: f64 = 0.75;

/// Guards the model ratio against an empty fundamental inlier set.
const RATIO_EPSILON: f64 = 1e-5;

/// Face whose keypoints drive initialization.
pub const PRIMARY_FACE: usize = 0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum InitError {
    #[error("only {found} correspondences, need at least {required}")]
    TooFewCorrespondences { found: usize, required: usize },

    #[error("{0} estimation degenerated")]
    Degenerate(Model),

    #[error("{model} reconstruction has {good} good points, need more than {required}")]
    InsufficientTriangulation {
        model: Model,
        good: usize,
        required: usize,
    },

    #[error("{model} motion is ambiguous: best hypothesis has {best} good points, runner-up {second}")]
    Ambiguous {
        model: Model,
        best: usize,
        second: usize,
    },
}

/// Geometric model used for the reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    Homography,
    Fundamental,
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Model::Homography => f.write_str("homography"),
            Model::Fundamental => f.write_str("fundamental"),
        }
    }
}

/// A successful two-view reconstruction.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    /// Rotation of the current camera relative to the reference: X2 = R * X1 + t.
    pub rotation: Matrix3<f64>,
    /// Unit-norm translation (monocular scale is arbitrary).
    pub translation: Vector3<f64>,
    /// Indexed by reference keypoint; zero where not triangulated.
    pub points: Vec<Vector3<f64>>,
    pub triangulated: Vec<bool>,
    pub model: Model,
    pub num_good: usize,
}

impl Reconstruction {
    /// Current camera pose relative to the reference camera.
    pub fn relative_pose(&self) -> SE3 {
        SE3::from_rt(&self.rotation, self.translation)
    }
}

/// Monocular bootstrap against a fixed reference frame.
pub struct Initializer {
    reference: Frame,
    sigma: f64,
    iterations: usize,
    rng: StdRng,
}

impl Initializer {
    /// # Arguments
    /// * `reference` - First frame of the two-view pair
    /// * `sigma` - Keypoint noise in pixels; inlier threshold is 3 * sigma
    /// * `iterations` - RANSAC hypotheses per model
    /// * `seed` - Seed for hypothesis sampling
    pub fn new(reference: Frame, sigma: f64, iterations: usize, seed: u64) -> Self {
        Self {
            reference,
            sigma,
            iterations,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn reference(&self) -> &Frame {
        &self.reference
    }

    /// Attempt initialization from `current`.
    ///
    /// `matches` is parallel to the reference frame's primary-face keypoints;
    /// each entry is the index of the matching current-frame keypoint.
    pub fn initialize(
        &mut self,
        current: &Frame,
        matches: &[Option<usize>],
    ) -> Result<Reconstruction, InitError> {
        let ref_kps = primary_pixels(&self.reference);
        let cur_kps = primary_pixels(current);

        let correspondences: Vec<Correspondence> = matches
            .iter()
            .enumerate()
            .filter_map(|(i, m)| {
                let j = (*m)?;
                Some(Correspondence {
                    reference_index: i,
                    p1: *ref_kps.get(i)?,
                    p2: *cur_kps.get(j)?,
                })
            })
            .collect();

        if correspondences.len() < MIN_CORRESPONDENCES {
            return Err(InitError::TooFewCorrespondences {
                found: correspondences.len(),
                required: MIN_CORRESPONDENCES,
            });
        }

        let threshold = THRESHOLD_PER_SIGMA * self.sigma;
        let homography = find_homography(&correspondences, threshold, self.iterations, &mut self.rng)
            .ok_or(InitError::Degenerate(Model::Homography))?;
        let fundamental =
            find_fundamental(&correspondences, threshold, self.iterations, &mut self.rng)
                .ok_or(InitError::Degenerate(Model::Fundamental))?;

        let ratio =
            homography.num_inliers as f64 / (fundamental.num_inliers as f64 + RATIO_EPSILON);
        debug!(
            h_inliers = homography.num_inliers,
            f_inliers = fundamental.num_inliers,
            ratio,
            "Initializer model scores"
        );

        let k = self.reference.camera.intrinsics();
        let (model, candidates, inliers) = if ratio > HOMOGRAPHY_RATIO_THRESHOLD {
            (
                Model::Homography,
                decompose_homography(&homography.matrix, &k),
                homography.inliers,
            )
        } else {
            let essential = k.transpose() * fundamental.matrix * k;
            let motions = decompose_essential(&essential)
                .ok_or(InitError::Degenerate(Model::Fundamental))?;
            (Model::Fundamental, motions.to_vec(), fundamental.inliers)
        };

        let mut ranked: Vec<(Matrix3<f64>, Vector3<f64>, CheiralityCheck)> = candidates
            .iter()
            .map(|(r, t)| (*r, *t, check_motion(r, t, &k, &correspondences, &inliers)))
            .collect();
        // Stable: among equal counts the earlier hypothesis stays first.
        ranked.sort_by(|a, b| b.2.num_good.cmp(&a.2.num_good));

        let mut ranked = ranked.into_iter();
        let Some((rotation, translation, check)) = ranked.next() else {
            return Err(InitError::Degenerate(model));
        };
        let good = check.num_good;
        if good <= MIN_GOOD_POINTS {
            return Err(InitError::InsufficientTriangulation {
                model,
                good,
                required: MIN_GOOD_POINTS,
            });
        }

        let second = ranked.next().map_or(0, |c| c.2.num_good);
        if second as f64 >= AMBIGUITY_RATIO * good as f64 {
            return Err(InitError::Ambiguous {
                model,
                best: good,
                second,
            });
        }

        let mut points = vec![Vector3::zeros(); ref_kps.len()];
        let mut triangulated = vec![false; ref_kps.len()];
        for (c, p) in correspondences.iter().zip(&check.points) {
            if let Some(x) = p {
                points[c.reference_index] = *x;
                triangulated[c.reference_index] = true;
            }
        }

        Ok(Reconstruction {
            rotation,
            translation,
            points,
            triangulated,
            model,
            num_good: check.num_good,
        })
    }
}

fn primary_pixels(frame: &Frame) -> Vec<Vector2<f64>> {
    frame
        .features
        .get(PRIMARY_FACE)
        .map(|fs| fs.keypoints.iter().map(|kp| kp.pt).collect())
        .unwrap_or_default()
}
