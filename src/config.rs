//! System settings, loaded from YAML.
//!
//! Every field has a default, so an empty document (or no file at all) gives the
//! stock configuration:
//!
//! ```yaml
//! camera:
//!   width: 512
//!   height: 512
//! tracking:
//!   keyframe_interval: 10
//! loop_closing:
//!   detection_radius: 2.0
//! cache_dir: /tmp/sphere-slam
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::platform::Platform;
use crate::tracking::matching::{NN_RATIO, TH_LOW};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Cube face width in pixels.
    pub width: u32,
    /// Cube face height in pixels.
    pub height: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    /// Every Nth frame tracked in OK becomes a keyframe.
    pub keyframe_interval: u64,

    /// Keypoint noise (pixels) assumed by the initializer.
    pub init_sigma: f64,

    /// RANSAC hypotheses per model during initialization.
    pub init_ransac_iterations: usize,

    /// Pixel window for initialization matching.
    pub init_search_radius: f64,

    pub init_max_descriptor_distance: u32,

    pub init_nn_ratio: f32,

    /// RANSAC seed.
    pub seed: u64,

    /// Relocalization candidates tried per lost frame.
    pub relocalization_candidates: usize,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            keyframe_interval: 10,
            init_sigma: 1.0,
            init_ransac_iterations: 200,
            init_search_radius: 100.0,
            init_max_descriptor_distance: TH_LOW,
            init_nn_ratio: NN_RATIO,
            seed: 0,
            relocalization_candidates: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LocalMappingSettings {
    pub poll_interval_ms: u64,
    pub run_local_ba: bool,
}

impl Default for LocalMappingSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3,
            run_local_ba: true,
        }
    }
}

impl LocalMappingSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoopClosingSettings {
    pub poll_interval_ms: u64,

    /// Camera-center distance (meters) under which two keyframes may close a loop.
    pub detection_radius: f64,

    /// Most recent keyframes never considered as loop partners.
    pub recent_window: usize,

    /// Keyframes required before the query one for detection to run.
    pub min_prior_keyframes: usize,

    pub global_ba_iterations: usize,
}

impl Default for LoopClosingSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5,
            detection_radius: 2.0,
            recent_window: 10,
            min_prior_keyframes: 10,
            global_ba_iterations: 20,
        }
    }
}

impl LoopClosingSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub camera: CameraSettings,
    pub tracking: TrackingSettings,
    pub local_mapping: LocalMappingSettings,
    pub loop_closing: LoopClosingSettings,

    /// Directory keyframe images are written to; `None` keeps them in memory only.
    pub cache_dir: Option<PathBuf>,
}

impl Settings {
    /// Load settings from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        serde_yaml::from_reader(file).with_context(|| format!("Failed to parse {:?}", path))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("Failed to parse settings")
    }

    /// Load settings through the platform's asset loader.
    pub fn load_from_platform(platform: &dyn Platform, name: &str) -> Result<Self> {
        let bytes = platform
            .load_file(name)
            .with_context(|| format!("Failed to load settings asset {:?}", name))?;
        serde_yaml::from_slice(&bytes).with_context(|| format!("Failed to parse {:?}", name))
    }
}
