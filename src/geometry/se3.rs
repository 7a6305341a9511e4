//! SE3: rigid body transform (rotation + translation).
//!
//! Poses throughout the map are stored as world-to-camera transforms (T_cw),
//! so `pose.transform_point(p_world)` yields the point in camera coordinates.

use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion, Vector3};

/// Tolerance used when validating that a 4x4 matrix is a rigid transform.
const RIGID_TOLERANCE: f64 = 1e-4;

/// Rigid body transform: p' = R * p + t.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    /// Identity transform (origin of the map).
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Build from a rotation matrix and translation.
    ///
    /// The matrix is assumed orthonormal; the quaternion conversion absorbs
    /// small numerical drift.
    pub fn from_rt(rotation: &Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rot = Rotation3::from_matrix_unchecked(*rotation);
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rot),
            translation,
        }
    }

    /// Build from a homogeneous 4x4 matrix.
    ///
    /// Returns `None` unless the matrix is a valid rigid transform: finite
    /// entries, orthonormal rotation block with determinant +1 and a
    /// `[0 0 0 1]` bottom row.
    pub fn from_matrix(m: &Matrix4<f64>) -> Option<Self> {
        if !is_rigid_transform(m) {
            return None;
        }
        let r = m.fixed_view::<3, 3>(0, 0).into_owned();
        let t = Vector3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]);
        Some(Self::from_rt(&r, t))
    }

    /// Convert to a homogeneous 4x4 matrix [R | t; 0 0 0 1].
    pub fn to_matrix(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&self.rotation_matrix());
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    /// Inverse transform: [R^T | -R^T t].
    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        Self {
            rotation: rot_inv,
            translation: -(rot_inv * self.translation),
        }
    }

    /// Compose two transforms: self ∘ other.
    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Camera centre in world coordinates, for a world-to-camera pose.
    ///
    /// This is the translation of the inverse pose: -R^T t.
    pub fn camera_center(&self) -> Vector3<f64> {
        -(self.rotation.inverse() * self.translation)
    }

    /// Row-major flattening of the 4x4 matrix, as used by the map file format.
    pub fn to_row_major(&self) -> [f64; 16] {
        let m = self.to_matrix();
        let mut out = [0.0; 16];
        for r in 0..4 {
            for c in 0..4 {
                out[r * 4 + c] = m[(r, c)];
            }
        }
        out
    }

    /// Parse a row-major 4x4 matrix. Returns `None` if it is not rigid.
    pub fn from_row_major(values: &[f64; 16]) -> Option<Self> {
        let m = Matrix4::from_row_slice(values);
        Self::from_matrix(&m)
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

/// Check that `m` is a rigid transform within [`RIGID_TOLERANCE`].
pub fn is_rigid_transform(m: &Matrix4<f64>) -> bool {
    if m.iter().any(|v| !v.is_finite()) {
        return false;
    }
    let bottom_ok = m[(3, 0)].abs() < RIGID_TOLERANCE
        && m[(3, 1)].abs() < RIGID_TOLERANCE
        && m[(3, 2)].abs() < RIGID_TOLERANCE
        && (m[(3, 3)] - 1.0).abs() < RIGID_TOLERANCE;
    if !bottom_ok {
        return false;
    }
    let r = m.fixed_view::<3, 3>(0, 0).into_owned();
    let should_be_identity = r.transpose() * r;
    (should_be_identity - Matrix3::identity()).abs().max() < RIGID_TOLERANCE
        && (r.determinant() - 1.0).abs() < RIGID_TOLERANCE
}
