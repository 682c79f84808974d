//! Integration tests for training checkpoints and parameter snapshots of the
//! full text model.

mod common;

use std::collections::HashMap;

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use common::tiny_config;
use kg4text::models::KgTextModel;
use kg4text::nn::{Adam, AdamParams};
use kg4text::training::checkpoint::{
    prune_checkpoints, restore_snapshot, restore_training_checkpoint, save_snapshot,
    save_training_checkpoint,
};
use kg4text::training::CheckpointPaths;
use kg4text::Kg4TextError;

fn parameters(varmap: &VarMap) -> HashMap<String, Vec<f32>> {
    varmap
        .data()
        .lock()
        .unwrap()
        .iter()
        .map(|(name, var)| {
            let values = var.as_tensor().flatten_all().unwrap().to_vec1::<f32>().unwrap();
            (name.clone(), values)
        })
        .collect()
}

fn model() -> KgTextModel {
    KgTextModel::new(&tiny_config().encoder, &Device::Cpu).unwrap()
}

/// Sum of squares over every parameter.
fn weight_norm(varmap: &VarMap) -> Tensor {
    varmap
        .all_vars()
        .iter()
        .map(|v| v.as_tensor().sqr().unwrap().sum_all().unwrap())
        .reduce(|a, b| (a + b).unwrap())
        .unwrap()
}

#[test]
fn test_training_checkpoint_restores_parameters_and_optimizer() {
    let dir = tempfile::tempdir().unwrap();
    let paths = CheckpointPaths::new(dir.path(), "fixture");
    let source = model();
    let mut optimizer = Adam::new(source.varmap(), AdamParams::default()).unwrap();
    // One step so the moments are non-zero.
    optimizer
        .backward_step(&weight_norm(source.varmap()))
        .unwrap();
    save_training_checkpoint(&paths, 4, 123, source.varmap(), &optimizer).unwrap();

    let target = model();
    let mut restored = Adam::new(target.varmap(), AdamParams::default()).unwrap();
    let meta = restore_training_checkpoint(&paths, 4, target.varmap(), &mut restored)
        .unwrap()
        .unwrap();

    assert_eq!(meta.epoch, 4);
    assert_eq!(meta.global_step, 123);
    assert_eq!(meta.model_name, "fixture");
    assert_eq!(restored.step_count(), 1);
    assert_eq!(parameters(target.varmap()), parameters(source.varmap()));
}

#[test]
fn test_resumed_step_matches_uninterrupted_step() {
    let dir = tempfile::tempdir().unwrap();
    let paths = CheckpointPaths::new(dir.path(), "fixture");
    let source = model();
    let mut optimizer = Adam::new(source.varmap(), AdamParams::default()).unwrap();
    optimizer
        .backward_step(&weight_norm(source.varmap()))
        .unwrap();
    save_training_checkpoint(&paths, 1, 1, source.varmap(), &optimizer).unwrap();
    optimizer
        .backward_step(&weight_norm(source.varmap()))
        .unwrap();

    let target = model();
    let mut resumed = Adam::new(target.varmap(), AdamParams::default()).unwrap();
    restore_training_checkpoint(&paths, 1, target.varmap(), &mut resumed).unwrap();
    resumed
        .backward_step(&weight_norm(target.varmap()))
        .unwrap();

    assert_eq!(resumed.step_count(), optimizer.step_count());
    assert_eq!(parameters(target.varmap()), parameters(source.varmap()));
}

#[test]
fn test_missing_checkpoint_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let paths = CheckpointPaths::new(dir.path(), "fixture");
    let target = model();
    let mut optimizer = Adam::new(target.varmap(), AdamParams::default()).unwrap();
    assert!(matches!(
        restore_training_checkpoint(&paths, 9, target.varmap(), &mut optimizer),
        Err(Kg4TextError::CheckpointNotFound(_))
    ));
}

#[test]
fn test_prune_keeps_newest() {
    let dir = tempfile::tempdir().unwrap();
    let paths = CheckpointPaths::new(dir.path(), "fixture");
    let source = model();
    let optimizer = Adam::new(source.varmap(), AdamParams::default()).unwrap();
    for epoch in 0..5 {
        save_training_checkpoint(&paths, epoch, epoch as u64, source.varmap(), &optimizer)
            .unwrap();
    }
    assert_eq!(prune_checkpoints(&paths, 2).unwrap(), vec![0, 1, 2]);
    assert_eq!(paths.checkpoint_epochs().unwrap(), vec![3, 4]);
    assert!(!paths.metadata(0).exists());
    assert!(paths.metadata(4).exists());
}

#[test]
fn test_model_snapshot_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.safetensors");
    let source = model();
    save_snapshot(&path, source.varmap()).unwrap();

    let target = model();
    let report = restore_snapshot(&path, target.varmap()).unwrap();
    assert!(report.missing.is_empty());
    assert_eq!(report.assigned.len(), source.varmap().all_vars().len());
    assert_eq!(parameters(target.varmap()), parameters(source.varmap()));
}

#[test]
fn test_snapshot_with_unknown_tensor_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("extra.safetensors");
    let source = model();
    let mut tensors: HashMap<String, Tensor> = source
        .varmap()
        .data()
        .lock()
        .unwrap()
        .iter()
        .map(|(name, var)| (name.clone(), var.as_tensor().copy().unwrap()))
        .collect();
    tensors.insert(
        "projection.weight".to_string(),
        Tensor::zeros((2, 2), candle_core::DType::F32, &Device::Cpu).unwrap(),
    );
    candle_core::safetensors::save(&tensors, &path).unwrap();

    let target = model();
    let report = restore_snapshot(&path, target.varmap()).unwrap();
    assert_eq!(report.missing.len(), 1);
    assert!(matches!(
        &report.missing[0],
        Kg4TextError::MissingParameterBinding(name) if name == "projection.weight"
    ));
    assert_eq!(parameters(target.varmap()), parameters(source.varmap()));
}
