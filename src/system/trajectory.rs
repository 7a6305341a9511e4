//! Keyframe trajectory export in TUM format.
//!
//! One line per keyframe, ordered by id:
//! `timestamp tx ty tz qx qy qz qw`, where the pose is camera-to-world.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use csv::WriterBuilder;

use crate::atlas::map::KeyFrame;

/// Write the posed keyframes of `keyframes` to `writer`; returns the line count.
pub fn write_tum<W: Write>(keyframes: &[Arc<KeyFrame>], writer: W) -> Result<usize> {
    let mut sorted: Vec<&Arc<KeyFrame>> = keyframes.iter().collect();
    sorted.sort_by_key(|kf| kf.id);

    let mut wtr = WriterBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .from_writer(writer);

    let mut written = 0;
    for kf in sorted {
        let Some(twc) = kf.pose_inverse() else {
            continue;
        };
        let t = twc.translation;
        let q = twc.rotation.coords; // [x, y, z, w]
        wtr.write_record(&[
            format!("{:.6}", kf.timestamp),
            format!("{:.9}", t.x),
            format!("{:.9}", t.y),
            format!("{:.9}", t.z),
            format!("{:.9}", q.x),
            format!("{:.9}", q.y),
            format!("{:.9}", q.z),
            format!("{:.9}", q.w),
        ])?;
        written += 1;
    }
    wtr.flush()?;
    Ok(written)
}

/// Save the keyframe trajectory to `path`.
pub fn save_tum<P: AsRef<Path>>(keyframes: &[Arc<KeyFrame>], path: P) -> Result<usize> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    write_tum(keyframes, file).with_context(|| format!("Failed to write trajectory {:?}", path))
}
