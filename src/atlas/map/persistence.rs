//! Textual map format.
//!
//! ```text
//! MAP_V1
//! <keyframeCount> <mapPointCount>
//! KF <id> <timestamp> <16 row-major pose values>
//! MP <id> <x> <y> <z>
//! ```
//!
//! Only KeyFrames with a pose are written; the header counts what was written.
//! Observations and features are not persisted.

use std::io::{self, Write};

use nalgebra::Vector3;
use thiserror::Error;

use crate::geometry::SE3;

pub const MAP_HEADER: &str = "MAP_V1";

#[derive(Debug, Error)]
pub enum MapError {
    #[error("map file I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("map file does not start with {MAP_HEADER}")]
    MissingHeader,

    #[error("malformed map file at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("keyframe {id} at line {line} does not have a rigid pose")]
    InvalidPose { id: u64, line: usize },
}

/// One persisted KeyFrame.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyFrameRecord {
    pub id: u64,
    pub timestamp: f64,
    pub pose: SE3,
}

/// One persisted MapPoint.
#[derive(Debug, Clone, PartialEq)]
pub struct MapPointRecord {
    pub id: u64,
    pub position: Vector3<f64>,
}

/// Write the full map text. `keyframes` must already exclude pose-less KeyFrames.
pub fn write_map<W: Write>(
    mut out: W,
    keyframes: &[KeyFrameRecord],
    map_points: &[MapPointRecord],
) -> io::Result<()> {
    writeln!(out, "{MAP_HEADER}")?;
    writeln!(out, "{} {}", keyframes.len(), map_points.len())?;
    for kf in keyframes {
        write!(out, "KF {} {}", kf.id, kf.timestamp)?;
        for v in kf.pose.to_row_major() {
            write!(out, " {v}")?;
        }
        writeln!(out)?;
    }
    for mp in map_points {
        writeln!(
            out,
            "MP {} {} {} {}",
            mp.id, mp.position.x, mp.position.y, mp.position.z
        )?;
    }
    out.flush()
}

/// Check the first line of a map file.
pub fn has_header(text: &str) -> bool {
    text.lines().next().map(str::trim) == Some(MAP_HEADER)
}

/// Parsed body of a map file.
#[derive(Debug, Default)]
pub struct ParsedMap {
    pub declared_keyframes: usize,
    pub declared_map_points: usize,
    pub keyframes: Vec<KeyFrameRecord>,
    pub map_points: Vec<MapPointRecord>,
}

/// Parse a map file whose header has already been validated.
pub fn parse_map(text: &str) -> Result<ParsedMap, MapError> {
    let mut lines = text.lines().enumerate().skip(1);

    let (counts_idx, counts_line) = lines
        .next()
        .ok_or_else(|| malformed(1, "missing entity counts".into()))?;
    let counts: Vec<usize> = counts_line
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|e| malformed(counts_idx, format!("bad entity counts: {e}")))?;
    let [declared_keyframes, declared_map_points] = counts[..] else {
        return Err(malformed(counts_idx, "expected two entity counts".into()));
    };

    let mut parsed = ParsedMap {
        declared_keyframes,
        declared_map_points,
        ..ParsedMap::default()
    };

    for (idx, line) in lines {
        let mut fields = line.split_whitespace();
        match fields.next() {
            None => continue,
            Some("KF") => {
                let values = parse_numbers(idx, fields, 18)?;
                let id = parse_id(idx, values[0])?;
                let mut pose = [0.0; 16];
                pose.copy_from_slice(&values[2..]);
                let pose = SE3::from_row_major(&pose).ok_or(MapError::InvalidPose {
                    id,
                    line: idx + 1,
                })?;
                parsed.keyframes.push(KeyFrameRecord {
                    id,
                    timestamp: values[1],
                    pose,
                });
            }
            Some("MP") => {
                let values = parse_numbers(idx, fields, 4)?;
                parsed.map_points.push(MapPointRecord {
                    id: parse_id(idx, values[0])?,
                    position: Vector3::new(values[1], values[2], values[3]),
                });
            }
            Some(tag) => return Err(malformed(idx, format!("unknown record tag {tag:?}"))),
        }
    }

    Ok(parsed)
}

fn malformed(idx: usize, reason: String) -> MapError {
    MapError::Malformed {
        line: idx + 1,
        reason,
    }
}

fn parse_numbers<'a>(
    idx: usize,
    fields: impl Iterator<Item = &'a str>,
    expected: usize,
) -> Result<Vec<f64>, MapError> {
    let values: Vec<f64> = fields
        .map(str::parse::<f64>)
        .collect::<Result<_, _>>()
        .map_err(|e| malformed(idx, format!("bad number: {e}")))?;
    if values.len() != expected {
        return Err(malformed(
            idx,
            format!("expected {expected} values, found {}", values.len()),
        ));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(malformed(idx, "non-finite value".into()));
    }
    Ok(values)
}

fn parse_id(idx: usize, value: f64) -> Result<u64, MapError> {
    if value < 0.0 || value.fract() != 0.0 || value > u64::MAX as f64 {
        return Err(malformed(idx, format!("bad id {value}")));
    }
    Ok(value as u64)
}
