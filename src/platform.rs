//! Host services consumed by the SLAM core: logging and asset loading.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, error, info, trace, warn};

/// Severity for [`Platform::log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

pub trait Platform: Send + Sync {
    fn log(&self, level: LogLevel, tag: &str, message: &str);

    /// Read a named asset in full.
    fn load_file(&self, name: &str) -> Result<Vec<u8>>;
}

/// Desktop platform: logs through `tracing`, loads assets from a root directory.
#[derive(Debug, Clone, Default)]
pub struct NativePlatform {
    asset_root: Option<PathBuf>,
}

impl NativePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve asset names relative to `root`.
    pub fn with_asset_root(root: impl Into<PathBuf>) -> Self {
        Self {
            asset_root: Some(root.into()),
        }
    }

    fn resolve(&self, name: &str) -> PathBuf {
        match &self.asset_root {
            Some(root) => root.join(name),
            None => PathBuf::from(name),
        }
    }
}

impl Platform for NativePlatform {
    fn log(&self, level: LogLevel, tag: &str, message: &str) {
        match level {
            LogLevel::Trace => trace!(tag, "{}", message),
            LogLevel::Debug => debug!(tag, "{}", message),
            LogLevel::Info => info!(tag, "{}", message),
            LogLevel::Warn => warn!(tag, "{}", message),
            LogLevel::Error => error!(tag, "{}", message),
        }
    }

    fn load_file(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.resolve(name);
        fs::read(&path).with_context(|| format!("Failed to read {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[test]
    fn test_load_file_relative_to_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("settings.yaml"), "camera:\n  width: 128\n").unwrap();

        let platform = NativePlatform::with_asset_root(dir.path());
        assert_eq!(
            platform.load_file("settings.yaml").unwrap(),
            b"camera:\n  width: 128\n".to_vec()
        );
        assert!(platform.load_file("missing.yaml").is_err());

        let settings = Settings::load_from_platform(&platform, "settings.yaml").unwrap();
        assert_eq!(settings.camera.width, 128);
    }

    #[test]
    fn test_log_does_not_panic_without_subscriber() {
        NativePlatform::new().log(LogLevel::Info, "test", "hello");
    }
}
