//! On-disk cache for keyframe images.
//!
//! Promoted frames write their face images as `kf_<id>_<face>.jpg` so the
//! KeyFrame does not keep pixel data in memory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::DynamicImage;
use tracing::warn;

use crate::atlas::map::KeyFrameId;

#[derive(Debug, Clone)]
pub struct ImageCache {
    dir: PathBuf,
}

impl ImageCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, kf_id: KeyFrameId, face: usize) -> PathBuf {
        self.dir.join(format!("kf_{}_{}.jpg", kf_id.0, face))
    }

    /// Write every image; failures are logged and skipped.
    ///
    /// Returns the paths that were written.
    pub fn flush(&self, kf_id: KeyFrameId, images: &[Arc<DynamicImage>]) -> Vec<PathBuf> {
        if images.is_empty() {
            return Vec::new();
        }
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            warn!("Cannot create image cache {}: {}", self.dir.display(), e);
            return Vec::new();
        }

        images
            .iter()
            .enumerate()
            .filter_map(|(face, img)| {
                let path = self.path_for(kf_id, face);
                match img.to_rgb8().save(&path) {
                    Ok(()) => Some(path),
                    Err(e) => {
                        warn!("Failed to cache {} image {}: {}", kf_id, face, e);
                        None
                    }
                }
            })
            .collect()
    }
}
