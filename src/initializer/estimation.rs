//! Robust two-view model estimation: homography and fundamental matrix.
//!
//! Both models are fit with the normalized 8-point DLT inside a RANSAC loop.
//! Inliers are judged by a pixel threshold in both images (symmetric transfer
//! error for H, point-to-epipolar-line distance for F). The best hypothesis is
//! refit on its full inlier set before being returned.

use nalgebra::{Matrix3, SMatrix, SVector, Vector2, Vector3};
use rand::seq::index;
use rand::Rng;

/// Points drawn per RANSAC hypothesis.
const SAMPLE_SIZE: usize = 8;

/// Smallest homogeneous coordinate treated as a finite point.
const MIN_HOMOGENEOUS: f64 = 1e-10;

/// A matched pixel pair between the reference (1) and current (2) views.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    /// Index of the keypoint in the reference frame.
    pub reference_index: usize,
    pub p1: Vector2<f64>,
    pub p2: Vector2<f64>,
}

/// Result of a robust fit.
#[derive(Debug, Clone)]
pub struct ModelFit {
    pub matrix: Matrix3<f64>,
    /// Parallel to the correspondence slice.
    pub inliers: Vec<bool>,
    pub num_inliers: usize,
}

/// Estimate H21 (p2 ~ H21 * p1).
pub fn find_homography<R: Rng>(
    correspondences: &[Correspondence],
    threshold: f64,
    iterations: usize,
    rng: &mut R,
) -> Option<ModelFit> {
    ransac(
        correspondences,
        threshold,
        iterations,
        rng,
        compute_h21,
        homography_inlier,
    )
}

/// Estimate F21 (p2^T * F21 * p1 = 0).
pub fn find_fundamental<R: Rng>(
    correspondences: &[Correspondence],
    threshold: f64,
    iterations: usize,
    rng: &mut R,
) -> Option<ModelFit> {
    ransac(
        correspondences,
        threshold,
        iterations,
        rng,
        compute_f21,
        fundamental_inlier,
    )
}

fn ransac<R, Fit, Check>(
    correspondences: &[Correspondence],
    threshold: f64,
    iterations: usize,
    rng: &mut R,
    fit: Fit,
    is_inlier: Check,
) -> Option<ModelFit>
where
    R: Rng,
    Fit: Fn(&[Correspondence]) -> Option<Matrix3<f64>>,
    Check: Fn(&Matrix3<f64>, &Correspondence, f64) -> bool,
{
    let n = correspondences.len();
    if n < SAMPLE_SIZE {
        return None;
    }

    let evaluate = |model: Matrix3<f64>| -> ModelFit {
        let inliers: Vec<bool> = correspondences
            .iter()
            .map(|c| is_inlier(&model, c, threshold))
            .collect();
        let num_inliers = inliers.iter().filter(|&&b| b).count();
        ModelFit {
            matrix: model,
            inliers,
            num_inliers,
        }
    };

    let mut best: Option<ModelFit> = None;
    let mut sample = Vec::with_capacity(SAMPLE_SIZE);

    for _ in 0..iterations.max(1) {
        sample.clear();
        sample.extend(
            index::sample(rng, n, SAMPLE_SIZE)
                .iter()
                .map(|i| correspondences[i]),
        );

        let model = match fit(&sample) {
            Some(m) => m,
            None => continue,
        };

        let candidate = evaluate(model);
        if best
            .as_ref()
            .map_or(true, |b| candidate.num_inliers > b.num_inliers)
        {
            best = Some(candidate);
        }
    }

    let mut best = best?;

    // Refit on every inlier; keep the refinement only if it does not lose support.
    if best.num_inliers >= SAMPLE_SIZE {
        let support: Vec<Correspondence> = correspondences
            .iter()
            .zip(&best.inliers)
            .filter(|(_, &inl)| inl)
            .map(|(c, _)| *c)
            .collect();
        if let Some(refined) = fit(&support).map(|m| evaluate(m)) {
            if refined.num_inliers >= best.num_inliers {
                best = refined;
            }
        }
    }

    (best.num_inliers > 0).then_some(best)
}

// ───── Normalization ─────

/// Translate to zero mean and scale to unit mean absolute deviation per axis.
///
/// Returns the normalized points and the transform T with p_n = T * p.
pub fn normalize(points: &[Vector2<f64>]) -> Option<(Vec<Vector2<f64>>, Matrix3<f64>)> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let mean = points.iter().fold(Vector2::zeros(), |acc, p| acc + p) / n;
    let dev = points
        .iter()
        .fold(Vector2::zeros(), |acc, p| acc + (p - mean).abs())
        / n;
    if dev.x <= f64::EPSILON || dev.y <= f64::EPSILON {
        return None;
    }
    let (sx, sy) = (1.0 / dev.x, 1.0 / dev.y);
    let normalized = points
        .iter()
        .map(|p| Vector2::new((p.x - mean.x) * sx, (p.y - mean.y) * sy))
        .collect();
    let t = Matrix3::new(
        sx, 0.0, -mean.x * sx, //
        0.0, sy, -mean.y * sy, //
        0.0, 0.0, 1.0,
    );
    Some((normalized, t))
}

/// Unit vector spanning the (approximate) null space of the stacked rows.
fn null_vector(rows: &[SVector<f64, 9>]) -> Option<SVector<f64, 9>> {
    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for r in rows {
        ata += r * r.transpose();
    }
    let eig = ata.symmetric_eigen();
    let (idx, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let v = eig.eigenvectors.column(idx).into_owned();
    v.iter().all(|x| x.is_finite()).then_some(v)
}

fn split(sample: &[Correspondence]) -> (Vec<Vector2<f64>>, Vec<Vector2<f64>>) {
    sample.iter().map(|c| (c.p1, c.p2)).unzip()
}

fn reshape(v: &SVector<f64, 9>) -> Matrix3<f64> {
    Matrix3::from_row_slice(v.as_slice())
}

// ───── Homography ─────

/// Normalized DLT homography from at least four correspondences.
pub fn compute_h21(sample: &[Correspondence]) -> Option<Matrix3<f64>> {
    if sample.len() < 4 {
        return None;
    }
    let (p1, p2) = split(sample);
    let (n1, t1) = normalize(&p1)?;
    let (n2, t2) = normalize(&p2)?;

    let mut rows = Vec::with_capacity(2 * sample.len());
    for (a, b) in n1.iter().zip(&n2) {
        let (u1, v1, u2, v2) = (a.x, a.y, b.x, b.y);
        rows.push(SVector::<f64, 9>::from_row_slice(&[
            0.0, 0.0, 0.0, -u1, -v1, -1.0, v2 * u1, v2 * v1, v2,
        ]));
        rows.push(SVector::<f64, 9>::from_row_slice(&[
            u1, v1, 1.0, 0.0, 0.0, 0.0, -u2 * u1, -u2 * v1, -u2,
        ]));
    }
    let hn = reshape(&null_vector(&rows)?);
    Some(t2.try_inverse()? * hn * t1)
}

fn apply_homogeneous(m: &Matrix3<f64>, p: &Vector2<f64>) -> Option<Vector2<f64>> {
    let q = m * Vector3::new(p.x, p.y, 1.0);
    (q.z.abs() > MIN_HOMOGENEOUS).then(|| Vector2::new(q.x / q.z, q.y / q.z))
}

/// Symmetric transfer test: both p2 vs H*p1 and p1 vs H^-1*p2 within threshold.
fn homography_inlier(h21: &Matrix3<f64>, c: &Correspondence, threshold: f64) -> bool {
    let Some(h12) = h21.try_inverse() else {
        return false;
    };
    let th2 = threshold * threshold;
    let forward = apply_homogeneous(h21, &c.p1).map(|p| (p - c.p2).norm_squared());
    let backward = apply_homogeneous(&h12, &c.p2).map(|p| (p - c.p1).norm_squared());
    matches!((forward, backward), (Some(f), Some(b)) if f < th2 && b < th2)
}

// ───── Fundamental ─────

/// Normalized 8-point fundamental matrix with rank-2 enforcement.
pub fn compute_f21(sample: &[Correspondence]) -> Option<Matrix3<f64>> {
    if sample.len() < SAMPLE_SIZE {
        return None;
    }
    let (p1, p2) = split(sample);
    let (n1, t1) = normalize(&p1)?;
    let (n2, t2) = normalize(&p2)?;

    let rows: Vec<SVector<f64, 9>> = n1
        .iter()
        .zip(&n2)
        .map(|(a, b)| {
            let (u1, v1, u2, v2) = (a.x, a.y, b.x, b.y);
            SVector::<f64, 9>::from_row_slice(&[
                u2 * u1,
                u2 * v1,
                u2,
                v2 * u1,
                v2 * v1,
                v2,
                u1,
                v1,
                1.0,
            ])
        })
        .collect();
    let fpre = reshape(&null_vector(&rows)?);

    let svd = fpre.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut sigma = svd.singular_values;
    let (min_idx, _) = sigma
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    sigma[min_idx] = 0.0;
    let fn_rank2 = u * Matrix3::from_diagonal(&sigma) * v_t;

    Some(t2.transpose() * fn_rank2 * t1)
}

fn line_distance_squared(line: &Vector3<f64>, p: &Vector2<f64>) -> Option<f64> {
    let denom = line.x * line.x + line.y * line.y;
    if denom <= MIN_HOMOGENEOUS {
        return None;
    }
    let num = line.x * p.x + line.y * p.y + line.z;
    Some(num * num / denom)
}

/// Both points within threshold of the epipolar line induced by the other.
fn fundamental_inlier(f21: &Matrix3<f64>, c: &Correspondence, threshold: f64) -> bool {
    let th2 = threshold * threshold;
    let x1 = Vector3::new(c.p1.x, c.p1.y, 1.0);
    let x2 = Vector3::new(c.p2.x, c.p2.y, 1.0);
    let l2 = f21 * x1;
    let l1 = f21.transpose() * x2;
    matches!(
        (line_distance_squared(&l2, &c.p2), line_distance_squared(&l1, &c.p1)),
        (Some(d2), Some(d1)) if d2 < th2 && d1 < th2
    )
}
