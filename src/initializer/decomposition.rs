//! Motion hypotheses from a homography or an essential matrix.

use nalgebra::{Matrix3, Vector3};

/// Minimum ratio between consecutive singular values of a usable homography.
const MIN_SINGULAR_RATIO: f64 = 1.00001;

/// A candidate relative motion: X2 = R * X1 + t, with unit-norm t.
pub type Motion = (Matrix3<f64>, Vector3<f64>);

/// SVD with singular values sorted in descending order.
fn sorted_svd(m: &Matrix3<f64>) -> Option<(Matrix3<f64>, Vector3<f64>, Matrix3<f64>)> {
    let svd = m.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let w = svd.singular_values;

    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| w[b].total_cmp(&w[a]));

    let mut u_sorted = Matrix3::zeros();
    let mut vt_sorted = Matrix3::zeros();
    let mut w_sorted = Vector3::zeros();
    for (dst, &src) in order.iter().enumerate() {
        u_sorted.set_column(dst, &u.column(src));
        vt_sorted.set_row(dst, &v_t.row(src));
        w_sorted[dst] = w[src];
    }
    Some((u_sorted, w_sorted, vt_sorted))
}

/// Decompose H21 into its eight (R, t) hypotheses (Faugeras).
///
/// The homography is first mapped to calibrated coordinates,
/// A = K^-1 * H21 * K. The first four hypotheses are the d' = +d2 family and
/// the last four the d' = -d2 family; which family is physical depends on the
/// sign the homography was estimated with. Returns an empty list when A is too
/// close to a pure rotation (repeated singular values) to separate the motion.
pub fn decompose_homography(h21: &Matrix3<f64>, k: &Matrix3<f64>) -> Vec<Motion> {
    let Some(k_inv) = k.try_inverse() else {
        return Vec::new();
    };
    let a = k_inv * h21 * k;
    let Some((u, w, vt)) = sorted_svd(&a) else {
        return Vec::new();
    };

    let s = u.determinant() * vt.determinant();
    let (d1, d2, d3) = (w[0], w[1], w[2]);
    if d3 <= 0.0 || d1 / d2 < MIN_SINGULAR_RATIO || d2 / d3 < MIN_SINGULAR_RATIO {
        return Vec::new();
    }

    let (d1s, d2s, d3s) = (d1 * d1, d2 * d2, d3 * d3);
    let aux1 = ((d1s - d2s) / (d1s - d3s)).sqrt();
    let aux3 = ((d2s - d3s) / (d1s - d3s)).sqrt();
    let x1 = [aux1, aux1, -aux1, -aux1];
    let x3 = [aux3, -aux3, aux3, -aux3];
    let spread = ((d1s - d2s) * (d2s - d3s)).sqrt();

    let unit = |r: Matrix3<f64>, tp: Vector3<f64>| {
        let t = u * tp;
        let norm = t.norm();
        (norm > 0.0).then(|| (s * u * r * vt, t / norm))
    };

    // d' = +d2
    let ctheta = (d2s + d1 * d3) / ((d1 + d3) * d2);
    let stheta = spread / ((d1 + d3) * d2);
    let positive = (0..4).filter_map(|i| {
        let st = if i == 0 || i == 3 { stheta } else { -stheta };
        let rp = Matrix3::new(
            ctheta, 0.0, -st, //
            0.0, 1.0, 0.0, //
            st, 0.0, ctheta,
        );
        unit(rp, Vector3::new(x1[i], 0.0, -x3[i]) * (d1 - d3))
    });

    // d' = -d2
    let cphi = (d1 * d3 - d2s) / ((d1 - d3) * d2);
    let sphi = spread / ((d1 - d3) * d2);
    let negative = (0..4).filter_map(|i| {
        let sp = if i == 0 || i == 3 { sphi } else { -sphi };
        let rp = Matrix3::new(
            cphi, 0.0, sp, //
            0.0, -1.0, 0.0, //
            sp, 0.0, -cphi,
        );
        unit(rp, Vector3::new(x1[i], 0.0, x3[i]) * (d1 + d3))
    });

    positive.chain(negative).collect()
}

/// The four (R, t) factorizations of an essential matrix.
pub fn decompose_essential(e: &Matrix3<f64>) -> Option<[Motion; 4]> {
    let (u, _, vt) = sorted_svd(e)?;
    let w = Matrix3::new(
        0.0, -1.0, 0.0, //
        1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0,
    );

    let proper = |r: Matrix3<f64>| if r.determinant() < 0.0 { -r } else { r };
    let r1 = proper(u * w * vt);
    let r2 = proper(u * w.transpose() * vt);

    let t = u.column(2).into_owned();
    let norm = t.norm();
    if norm == 0.0 {
        return None;
    }
    let t = t / norm;

    Some([(r1, t), (r2, t), (r1, -t), (r2, -t)])
}
