//! Training/inference controller with checkpointing.

pub mod checkpoint;
pub mod controller;
pub mod history;

pub use checkpoint::{CheckpointMeta, CheckpointPaths, RestoreReport};
pub use controller::{Controller, ControllerState, EpochReport};
pub use history::{EpochRecord, TrainingHistory};
