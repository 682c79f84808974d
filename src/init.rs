//! Shared initialization for CLI commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::Device;

use crate::config::{load_config, Config};
use crate::nn::select_device;
use crate::training::CheckpointPaths;

/// Configuration, output location and device for one command.
pub struct RunContext {
    pub config: Config,
    pub results_dir: PathBuf,
    pub device: Device,
}

/// Results directory priority: explicit path > KG4TEXT_RESULTS_DIR env >
/// ./results (if exists) > ~/.kg4text/results
pub fn resolve_results_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var("KG4TEXT_RESULTS_DIR").ok().map(PathBuf::from))
        .or_else(|| {
            let local_path = Path::new("results");
            if local_path.exists() && local_path.is_dir() {
                Some(local_path.to_path_buf())
            } else {
                None
            }
        })
        .unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".kg4text").join("results"))
                .unwrap_or_else(|| PathBuf::from("results"))
        })
}

impl RunContext {
    pub fn new(config_path: Option<&Path>, results_dir: Option<PathBuf>) -> Result<Self> {
        let config = load_config(config_path).context("Failed to load configuration")?;
        let results_dir = resolve_results_dir(results_dir);
        tracing::info!("Using results directory: {}", results_dir.display());
        std::fs::create_dir_all(&results_dir).with_context(|| {
            format!("Failed to create results directory {}", results_dir.display())
        })?;

        Ok(Self {
            config,
            results_dir,
            device: select_device(),
        })
    }

    /// Checkpoint layout for `model_name`, or the configured model.
    pub fn paths(&self, model_name: Option<&str>) -> CheckpointPaths {
        let name = model_name.unwrap_or(&self.config.encoder.model_name);
        CheckpointPaths::new(&self.results_dir, name)
    }

    /// Where the bilinear scorer keeps its matrices.
    pub fn bilinear_dir(&self) -> PathBuf {
        self.results_dir.join("bilinear")
    }
}
