//! Typed ids for frames, keyframes and map points.
//!
//! Frames and KeyFrames draw from one numbering space; MapPoints have their own.
//! Ids are lightweight handles so entities can cross-reference each other
//! without owning pointers.

use std::fmt;

/// Identifier of a captured Frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u64);

impl FrameId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// Unique identifier for a KeyFrame within a Map.
///
/// Allocated from the same counter as [`FrameId`], so a KeyFrame never shares
/// an id with any Frame or other KeyFrame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyFrameId(pub u64);

impl KeyFrameId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for KeyFrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KF{}", self.0)
    }
}

/// Unique identifier for a MapPoint within a Map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MapPointId(pub u64);

impl MapPointId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for MapPointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MP{}", self.0)
    }
}
