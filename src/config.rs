//! Run configuration.
//!
//! Loaded from a TOML file; every field has a default so a partial file (or
//! none at all) is valid.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Kg4TextError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub encoder: EncoderConfig,
    pub training: TrainingConfig,
    pub bilinear: BilinearConfig,
}

/// Shape of the knowledge-aware sequence encoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub model_name: String,
    pub vocab_size: usize,
    pub embedding_dim: usize,
    pub hidden_dim: usize,
    pub kg_vector_dim: usize,
    /// Sequences are truncated to this many tokens.
    pub max_seq_len: usize,
    /// Dropout applied to encoder inputs in training mode only.
    pub dropout: f32,
    /// Weight of the auxiliary reconstruction loss; 0 disables the decoder.
    pub reconstruction_weight: f64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            model_name: "text_encoding".to_string(),
            vocab_size: 15000,
            embedding_dim: 200,
            hidden_dim: 200,
            kg_vector_dim: 300,
            max_seq_len: 100,
            dropout: 0.0,
            reconstruction_weight: 0.0,
        }
    }
}

/// How the category flag of each training instance is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryPolicyKind {
    /// Fair coin per instance.
    Uniform,
    /// Always present the true class.
    Positive,
    /// Always present a different class.
    Negative,
}

/// Which persisted format startup restores from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreFormat {
    Checkpoint,
    Snapshot,
}

/// Controller and optimizer settings for the sequence encoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub start_learning_rate: f64,
    pub decay_rate: f64,
    pub decay_steps: u64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub train_epoch: usize,
    pub log_every: usize,
    pub holdout_fraction: f64,
    pub seed: u64,
    pub keep_checkpoints: usize,
    pub save_snapshot: bool,
    pub restore_from: RestoreFormat,
    pub category_policy: CategoryPolicyKind,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            start_learning_rate: 1e-4,
            decay_rate: 0.8,
            decay_steps: 8000,
            beta1: 0.5,
            beta2: 0.999,
            epsilon: 1e-8,
            train_epoch: 20,
            log_every: 100,
            holdout_fraction: 0.1,
            seed: 42,
            keep_checkpoints: 200,
            save_snapshot: true,
            restore_from: RestoreFormat::Checkpoint,
            category_policy: CategoryPolicyKind::Uniform,
        }
    }
}

/// Bilinear scorer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BilinearConfig {
    pub v_t_dim: usize,
    pub v_c_dim: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub n_epoch: usize,
    pub log_every: usize,
    pub seed: u64,
    /// Probability of a positive label in generated pseudo data.
    pub positive_rate: f64,
}

impl Default for BilinearConfig {
    fn default() -> Self {
        Self {
            v_t_dim: 300,
            v_c_dim: 300,
            batch_size: 50,
            learning_rate: 1e-4,
            n_epoch: 500,
            log_every: 10,
            seed: 7,
            positive_rate: 0.3,
        }
    }
}

impl Config {
    /// Parse a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Kg4TextError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&contents).map_err(|e| {
            Kg4TextError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.training.batch_size == 0 || self.bilinear.batch_size == 0 {
            return Err(Kg4TextError::Config(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.training.holdout_fraction) {
            return Err(Kg4TextError::Config(format!(
                "holdout_fraction must be in [0, 1), got {}",
                self.training.holdout_fraction
            )));
        }
        if self.training.decay_steps == 0 {
            return Err(Kg4TextError::Config(
                "decay_steps must be at least 1".to_string(),
            ));
        }
        if self.encoder.max_seq_len == 0 {
            return Err(Kg4TextError::Config(
                "max_seq_len must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration with priority:
/// 1. Explicit path
/// 2. `KG4TEXT_CONFIG` env var (path)
/// 3. `./kg4text.toml` if it exists
/// 4. Defaults
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let candidate = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var("KG4TEXT_CONFIG").ok().map(PathBuf::from))
        .or_else(|| {
            let local = Path::new("kg4text.toml");
            local.exists().then(|| local.to_path_buf())
        });

    match candidate {
        Some(path) => {
            let config = Config::from_file(&path)?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        }
        None => Ok(Config::default()),
    }
}
