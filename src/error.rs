use std::path::PathBuf;

use thiserror::Error;

/// Custom error type for kg4text operations.
#[derive(Debug, Error)]
pub enum Kg4TextError {
    /// Two matrices or tensors that must agree in shape do not.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A parameter snapshot contains the same name more than once.
    #[error("Duplication in parameter snapshot {path}: '{name}'")]
    CheckpointCorruption { path: PathBuf, name: String },

    /// More than one trainable parameter matches a snapshot name.
    #[error("Multiple candidate parameters to be assigned for name '{name}': {candidates:?}")]
    AmbiguousParameterBinding {
        name: String,
        candidates: Vec<String>,
    },

    /// A snapshot name has no trainable parameter to bind to.
    ///
    /// Restore logs this and keeps going; it is surfaced in the restore report.
    #[error("Tensor named '{0}' not found in network")]
    MissingParameterBinding(String),

    /// The requested checkpoint file does not exist.
    #[error("Checkpoint not found: {}", .0.display())]
    CheckpointNotFound(PathBuf),

    /// Operation not allowed in the controller's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration could not be read or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input validation failed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Tensor computation failed.
    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Kg4TextError> = std::result::Result<T, E>;
