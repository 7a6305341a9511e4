//! Similarity transform used to verify loop candidates.
//!
//! A monocular map drifts in scale, so the transform between a query keyframe
//! and its loop partner carries a scale factor on top of the rigid motion.
//! A freshly seeded `Sim3` is rigid (scale 1); the optimizer may refine the scale
//! unless it is told to keep it fixed.

use nalgebra::{UnitQuaternion, Vector3};

use super::SE3;

/// `p' = s * R * p + t`
#[derive(Debug, Clone, PartialEq)]
pub struct Sim3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
    pub scale: f64,
}

impl Sim3 {
    pub fn identity() -> Self {
        Self::from_se3(&SE3::identity())
    }

    pub fn from_se3(se3: &SE3) -> Self {
        Self {
            rotation: se3.rotation,
            translation: se3.translation,
            scale: 1.0,
        }
    }

    /// Seed for loop verification: maps camera-2 coordinates into camera 1,
    /// `S12 = T1w * T2w^-1`, given both world-to-camera poses.
    pub fn between(t1w: &SE3, t2w: &SE3) -> Self {
        Self::from_se3(&t1w.compose(&t2w.inverse()))
    }

    /// Rigid part; the scale is discarded.
    pub fn to_se3(&self) -> SE3 {
        SE3::new(self.rotation, self.translation)
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.transform_vector(p) * self.scale + self.translation
    }
}

impl Default for Sim3 {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Unit;

    fn pose(axis: Vector3<f64>, angle: f64, t: Vector3<f64>) -> SE3 {
        SE3::new(UnitQuaternion::from_axis_angle(&Unit::new_normalize(axis), angle), t)
    }

    #[test]
    fn test_between_maps_camera2_into_camera1() {
        let t1w = pose(Vector3::z(), 0.4, Vector3::new(1.0, 0.0, 0.0));
        let t2w = pose(Vector3::y(), -0.3, Vector3::new(0.0, 2.0, 0.5));
        let s12 = Sim3::between(&t1w, &t2w);
        assert_eq!(s12.scale, 1.0);

        let p_w = Vector3::new(0.3, -0.7, 4.0);
        let p_c2 = t2w.transform_point(&p_w);
        assert_relative_eq!(
            s12.transform_point(&p_c2),
            t1w.transform_point(&p_w),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_between_same_pose_is_identity() {
        let t = pose(Vector3::x(), 1.1, Vector3::new(-2.0, 0.5, 3.0));
        let s = Sim3::between(&t, &t);
        assert_relative_eq!(s.translation, Vector3::zeros(), epsilon = 1e-12);
        assert_relative_eq!(s.rotation.angle(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_scale_applies_before_translation() {
        let s = Sim3 {
            rotation: UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_2),
            translation: Vector3::new(1.0, 0.0, 0.0),
            scale: 2.0,
        };
        assert_relative_eq!(
            s.transform_point(&Vector3::new(1.0, 0.0, 0.0)),
            Vector3::new(1.0, 2.0, 0.0),
            epsilon = 1e-12
        );
        assert_eq!(s.to_se3().translation, s.translation);
    }
}
