//! Camera models.
//!
//! Everything downstream of feature extraction talks to the camera through
//! [`GeometricCamera`]; the only concrete model is the six-face
//! [`CubeMapCamera`].

pub mod cubemap;

use std::fmt;

use nalgebra::{Matrix3, Vector2, Vector3};

pub use cubemap::CubeMapCamera;

/// One face of a cube map, indexed 0..=5 as +X, -X, +Y, -Y, +Z, -Z.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CubeFace {
    PosX = 0,
    NegX = 1,
    PosY = 2,
    NegY = 3,
    PosZ = 4,
    NegZ = 5,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PosX,
        CubeFace::NegX,
        CubeFace::PosY,
        CubeFace::NegY,
        CubeFace::PosZ,
        CubeFace::NegZ,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for CubeFace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CubeFace::PosX => "+X",
            CubeFace::NegX => "-X",
            CubeFace::PosY => "+Y",
            CubeFace::NegY => "-Y",
            CubeFace::PosZ => "+Z",
            CubeFace::NegZ => "-Z",
        };
        f.write_str(name)
    }
}

/// Projection capability shared by all camera models.
pub trait GeometricCamera: Send + Sync + fmt::Debug {
    /// Project a camera-frame point onto the face it falls on.
    ///
    /// Returns `None` for points with no defined direction (the origin or
    /// non-finite coordinates).
    fn project(&self, point: &Vector3<f64>) -> Option<Vector2<f64>>;

    /// Back-project a pixel seen on `face` to a unit direction in the camera frame.
    fn unproject(&self, pixel: &Vector2<f64>, face: CubeFace) -> Vector3<f64>;

    /// Face a camera-frame point projects onto.
    fn face(&self, point: &Vector3<f64>) -> CubeFace;

    /// Pinhole intrinsics K shared by every face.
    fn intrinsics(&self) -> Matrix3<f64>;
}
