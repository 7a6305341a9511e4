//! Linear two-view triangulation and cheirality counting.

use nalgebra::{Matrix3, Matrix3x4, Matrix4, RowVector4, Vector2, Vector3};

use super::estimation::Correspondence;

/// Homogeneous scale below which a triangulated point is treated as at infinity.
const MIN_HOMOGENEOUS_W: f64 = 1e-4;

/// Outcome of testing one motion hypothesis against a correspondence set.
#[derive(Debug, Clone)]
pub struct CheiralityCheck {
    /// Points (first camera frame) in front of both cameras, parallel to the correspondences.
    pub points: Vec<Option<Vector3<f64>>>,
    pub num_good: usize,
}

/// Projection matrix K * [R | t].
pub fn projection_matrix(k: &Matrix3<f64>, r: &Matrix3<f64>, t: &Vector3<f64>) -> Matrix3x4<f64> {
    let mut rt = Matrix3x4::zeros();
    rt.fixed_view_mut::<3, 3>(0, 0).copy_from(r);
    rt.set_column(3, t);
    k * rt
}

/// DLT triangulation of one correspondence.
///
/// Returns `None` when the homogeneous solution is at (or near) infinity or
/// not finite.
pub fn triangulate(
    p1: &Matrix3x4<f64>,
    p2: &Matrix3x4<f64>,
    x1: &Vector2<f64>,
    x2: &Vector2<f64>,
) -> Option<Vector3<f64>> {
    let rows: [RowVector4<f64>; 4] = [
        p1.row(2) * x1.x - p1.row(0),
        p1.row(2) * x1.y - p1.row(1),
        p2.row(2) * x2.x - p2.row(0),
        p2.row(2) * x2.y - p2.row(1),
    ];
    let a = Matrix4::from_rows(&rows);
    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let (idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = v_t.row(idx);
    let w = h[3];
    if w.abs() < MIN_HOMOGENEOUS_W {
        return None;
    }
    let x = Vector3::new(h[0] / w, h[1] / w, h[2] / w);
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Triangulate every selected correspondence under motion (R, t) and keep the
/// points with positive depth in both views.
///
/// `selected` is parallel to `correspondences`; unselected entries are skipped.
pub fn check_motion(
    r: &Matrix3<f64>,
    t: &Vector3<f64>,
    k: &Matrix3<f64>,
    correspondences: &[Correspondence],
    selected: &[bool],
) -> CheiralityCheck {
    let p1 = projection_matrix(k, &Matrix3::identity(), &Vector3::zeros());
    let p2 = projection_matrix(k, r, t);

    let points: Vec<Option<Vector3<f64>>> = correspondences
        .iter()
        .zip(selected)
        .map(|(c, &use_it)| {
            if !use_it {
                return None;
            }
            let x = triangulate(&p1, &p2, &c.p1, &c.p2)?;
            let depth2 = (r * x + t).z;
            (x.z > 0.0 && depth2 > 0.0).then_some(x)
        })
        .collect();
    let num_good = points.iter().filter(|p| p.is_some()).count();

    CheiralityCheck { points, num_good }
}
