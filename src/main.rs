use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use image::{DynamicImage, GrayImage};
use tracing::{error, info};

use sphere_slam::config::Settings;
use sphere_slam::optimizer::NullOptimizer;
use sphere_slam::system::SlamSystem;
use sphere_slam::tracking::frame::{FeatureExtractor, FeatureSet};

const USAGE: &str = "usage: sphere-slam <map-file> [trajectory-out] [settings.yaml]";

/// Map inspection never tracks, so no features are ever extracted.
struct NoFeatures;

impl FeatureExtractor for NoFeatures {
    fn detect_and_describe(&self, _image: &DynamicImage, _mask: Option<&GrayImage>) -> FeatureSet {
        FeatureSet::default()
    }
}

fn run(args: &[String]) -> Result<()> {
    let map_path = args.get(1).context(USAGE)?;
    let trajectory_path = args.get(2);

    let settings = match args.get(3) {
        Some(path) => {
            info!("Loading settings from {}", path);
            Settings::load(path)?
        }
        None => Settings::default(),
    };

    let mut system = SlamSystem::new(settings, Arc::new(NoFeatures), Arc::new(NullOptimizer))?;
    system
        .load_map(map_path)
        .with_context(|| format!("Failed to load map {}", map_path))?;
    info!("Loaded {}: {}", map_path, system.map_stats());

    if let Some(path) = trajectory_path {
        system.save_trajectory_tum(path)?;
    }

    system.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sphere_slam=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}
