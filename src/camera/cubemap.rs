//! Six-face cube map camera.
//!
//! Each face is a 90° pinhole camera looking down one signed axis of the rig.
//! A point is rotated into the selected face's local frame by a fixed
//! basis-change matrix (local depth on +z), then projected with the shared
//! intrinsics `fx = fy = w/2`, `cx = cy = w/2`.

use nalgebra::{Matrix3, Vector2, Vector3};

use super::{CubeFace, GeometricCamera};

/// Cube map camera with square faces of `width` x `height` pixels.
#[derive(Debug, Clone)]
pub struct CubeMapCamera {
    width: u32,
    height: u32,
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    /// Camera frame -> face local frame, indexed by face.
    to_face: [Matrix3<f64>; 6],
    /// Face local frame -> camera frame (transposes of `to_face`).
    from_face: [Matrix3<f64>; 6],
}

impl CubeMapCamera {
    pub fn new(width: u32, height: u32) -> Self {
        let to_face = face_bases();
        let from_face = to_face.map(|b| b.transpose());
        // fy and cy follow the face width: faces are square.
        let half = width as f64 / 2.0;
        Self {
            width,
            height,
            fx: half,
            fy: half,
            cx: half,
            cy: half,
            to_face,
            from_face,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Project and report the face in one call.
    pub fn project_with_face(&self, point: &Vector3<f64>) -> Option<(CubeFace, Vector2<f64>)> {
        if point.iter().any(|v| !v.is_finite()) || point.norm_squared() == 0.0 {
            return None;
        }
        let face = self.face(point);
        let local = self.to_face[face.index()] * point;
        let depth = local.z.abs();
        Some((
            face,
            Vector2::new(
                self.fx * (local.x / depth) + self.cx,
                self.fy * (local.y / depth) + self.cy,
            ),
        ))
    }
}

impl GeometricCamera for CubeMapCamera {
    fn project(&self, point: &Vector3<f64>) -> Option<Vector2<f64>> {
        self.project_with_face(point).map(|(_, px)| px)
    }

    fn unproject(&self, pixel: &Vector2<f64>, face: CubeFace) -> Vector3<f64> {
        let ray = Vector3::new(
            (pixel.x - self.cx) / self.fx,
            (pixel.y - self.cy) / self.fy,
            1.0,
        );
        (self.from_face[face.index()] * ray).normalize()
    }

    fn face(&self, point: &Vector3<f64>) -> CubeFace {
        let (ax, ay, az) = (point.x.abs(), point.y.abs(), point.z.abs());
        if ax >= ay && ax >= az {
            if point.x > 0.0 {
                CubeFace::PosX
            } else {
                CubeFace::NegX
            }
        } else if ay >= az {
            if point.y > 0.0 {
                CubeFace::PosY
            } else {
                CubeFace::NegY
            }
        } else if point.z > 0.0 {
            CubeFace::PosZ
        } else {
            CubeFace::NegZ
        }
    }

    fn intrinsics(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }
}

/// Basis-change matrices (camera -> face local), rows are the local x, y, z axes.
fn face_bases() -> [Matrix3<f64>; 6] {
    [
        // +X: (-z, -y, x)
        Matrix3::new(0.0, 0.0, -1.0, 0.0, -1.0, 0.0, 1.0, 0.0, 0.0),
        // -X: (z, -y, -x)
        Matrix3::new(0.0, 0.0, 1.0, 0.0, -1.0, 0.0, -1.0, 0.0, 0.0),
        // +Y: (x, -z, y)
        Matrix3::new(1.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, 1.0, 0.0),
        // -Y: (x, z, -y)
        Matrix3::new(1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, -1.0, 0.0),
        // +Z: (x, -y, z)
        Matrix3::new(1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 1.0),
        // -Z: (-x, -y, -z)
        Matrix3::new(-1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, -1.0),
    ]
}
