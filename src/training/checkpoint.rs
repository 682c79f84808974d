//! Training checkpoints and parameter snapshots.
//!
//! A training checkpoint (`<model>-<epoch>.ckpt`) stores every parameter
//! under `param/<name>` and the optimizer state under `optim/...`, so a
//! restored run continues exactly where it stopped. A parameter snapshot
//! (`<model>-<epoch>.safetensors`) stores parameters by plain name and is
//! restored selectively by name matching.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use chrono::{DateTime, Utc};
use serde::de::{IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

use crate::nn::Adam;
use crate::{Kg4TextError, Result};

const PARAM_PREFIX: &str = "param/";
const OPTIM_PREFIX: &str = "optim/";
/// Upper bound on a safetensors JSON header.
const MAX_HEADER_LEN: u64 = 100_000_000;

/// File layout of one model under the results directory:
/// `<results>/<model>/{models,logs}`.
#[derive(Debug, Clone)]
pub struct CheckpointPaths {
    root: PathBuf,
    model_name: String,
}

impl CheckpointPaths {
    pub fn new(results_dir: &Path, model_name: &str) -> Self {
        Self {
            root: results_dir.join(model_name),
            model_name: model_name.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn checkpoint(&self, epoch: usize) -> PathBuf {
        self.models_dir()
            .join(format!("{}-{}.ckpt", self.model_name, epoch))
    }

    pub fn metadata(&self, epoch: usize) -> PathBuf {
        self.models_dir()
            .join(format!("{}-{}.ckpt.json", self.model_name, epoch))
    }

    pub fn snapshot(&self, epoch: usize) -> PathBuf {
        self.models_dir()
            .join(format!("{}-{}.safetensors", self.model_name, epoch))
    }

    pub fn history(&self) -> PathBuf {
        self.logs_dir().join("history.json")
    }

    pub fn create_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.models_dir())?;
        fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }

    /// Epochs with a training checkpoint on disk, ascending.
    pub fn checkpoint_epochs(&self) -> Result<Vec<usize>> {
        let dir = self.models_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let prefix = format!("{}-", self.model_name);
        let mut epochs: Vec<usize> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                name.strip_prefix(&prefix)?
                    .strip_suffix(".ckpt")?
                    .parse()
                    .ok()
            })
            .collect();
        epochs.sort_unstable();
        Ok(epochs)
    }

    pub fn latest_checkpoint_epoch(&self) -> Result<Option<usize>> {
        Ok(self.checkpoint_epochs()?.last().copied())
    }
}

/// Sidecar metadata of a training checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub model_name: String,
    pub epoch: usize,
    pub global_step: u64,
    pub learning_rate: f64,
    pub saved_at: DateTime<Utc>,
    pub parameters: Vec<String>,
}

fn sorted_vars(varmap: &VarMap) -> Result<Vec<(String, candle_core::Var)>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|e| Kg4TextError::InvalidState(format!("parameter store poisoned: {}", e)))?;
    let mut vars: Vec<(String, candle_core::Var)> =
        data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    vars.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(vars)
}

/// Shape-check `value` against `var` and convert it to the parameter's
/// device and dtype. Nothing is assigned.
fn staged(var: &candle_core::Var, name: &str, value: &Tensor) -> Result<Tensor> {
    if var.shape() != value.shape() {
        return Err(Kg4TextError::ShapeMismatch(format!(
            "'{}' is {:?} in the model but {:?} on disk",
            name,
            var.shape(),
            value.shape()
        )));
    }
    Ok(value.to_device(var.device())?.to_dtype(var.dtype())?)
}

fn assign_all(staged: Vec<(candle_core::Var, Tensor)>) -> Result<()> {
    for (var, value) in staged {
        var.set(&value)?;
    }
    Ok(())
}

/// Write parameters and optimizer state for `epoch`, plus the JSON sidecar.
pub fn save_training_checkpoint(
    paths: &CheckpointPaths,
    epoch: usize,
    global_step: u64,
    varmap: &VarMap,
    optimizer: &Adam,
) -> Result<PathBuf> {
    fs::create_dir_all(paths.models_dir())?;
    let vars = sorted_vars(varmap)?;
    let mut tensors: HashMap<String, Tensor> = HashMap::new();
    for (name, var) in &vars {
        tensors.insert(format!("{}{}", PARAM_PREFIX, name), var.as_tensor().copy()?);
    }
    for (key, tensor) in optimizer.state_tensors()? {
        tensors.insert(format!("{}{}", OPTIM_PREFIX, key), tensor);
    }

    let path = paths.checkpoint(epoch);
    candle_core::safetensors::save(&tensors, &path)?;

    let meta = CheckpointMeta {
        model_name: paths.model_name.clone(),
        epoch,
        global_step,
        learning_rate: optimizer.learning_rate(),
        saved_at: Utc::now(),
        parameters: vars.into_iter().map(|(name, _)| name).collect(),
    };
    fs::write(paths.metadata(epoch), serde_json::to_string_pretty(&meta)?)?;
    info!("[*] Saved training checkpoint {}", path.display());
    Ok(path)
}

/// Restore parameters and optimizer state saved for `epoch`. All or
/// nothing: parameters and optimizer state are validated before either is
/// assigned.
pub fn restore_training_checkpoint(
    paths: &CheckpointPaths,
    epoch: usize,
    varmap: &VarMap,
    optimizer: &mut Adam,
) -> Result<Option<CheckpointMeta>> {
    let path = paths.checkpoint(epoch);
    if !path.exists() {
        return Err(Kg4TextError::CheckpointNotFound(path));
    }
    let mut tensors = candle_core::safetensors::load(&path, &Device::Cpu)?;

    let mut params = Vec::new();
    for (name, var) in sorted_vars(varmap)? {
        let key = format!("{}{}", PARAM_PREFIX, name);
        let value = tensors.remove(&key).ok_or_else(|| {
            Kg4TextError::Validation(format!(
                "{} has no value for parameter '{}'",
                path.display(),
                name
            ))
        })?;
        let value = staged(&var, &name, &value)?;
        params.push((var, value));
    }

    let optim_state: HashMap<String, Tensor> = tensors
        .into_iter()
        .filter_map(|(k, t)| k.strip_prefix(OPTIM_PREFIX).map(|s| (s.to_string(), t)))
        .collect();
    optimizer.check_state(&optim_state)?;

    assign_all(params)?;
    optimizer.load_state(&optim_state)?;

    let meta_path = paths.metadata(epoch);
    let meta = if meta_path.exists() {
        Some(serde_json::from_str(&fs::read_to_string(&meta_path)?)?)
    } else {
        warn!("No metadata next to {}", path.display());
        None
    };
    info!("[*] Restored training checkpoint {}", path.display());
    Ok(meta)
}

/// Delete the oldest training checkpoints so at most `keep` remain.
pub fn prune_checkpoints(paths: &CheckpointPaths, keep: usize) -> Result<Vec<usize>> {
    let epochs = paths.checkpoint_epochs()?;
    let excess = epochs.len().saturating_sub(keep);
    let removed: Vec<usize> = epochs.into_iter().take(excess).collect();
    for &epoch in &removed {
        fs::remove_file(paths.checkpoint(epoch))?;
        let meta = paths.metadata(epoch);
        if meta.exists() {
            fs::remove_file(meta)?;
        }
        debug!("Pruned checkpoint for epoch {}", epoch);
    }
    Ok(removed)
}

/// Write every parameter under its own name.
pub fn save_snapshot(path: &Path, varmap: &VarMap) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    varmap.save(path)?;
    info!("[*] Saved parameter snapshot {}", path.display());
    Ok(())
}

/// Outcome of [`restore_snapshot`].
#[derive(Debug, Default)]
pub struct RestoreReport {
    /// `(snapshot key, parameter name)` pairs that were assigned.
    pub assigned: Vec<(String, String)>,
    /// Snapshot keys with no parameter to bind to.
    pub missing: Vec<Kg4TextError>,
}

impl fmt::Display for RestoreReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} assigned, {} missing",
            self.assigned.len(),
            self.missing.len()
        )
    }
}

/// Tensor names of a safetensors file in header order, duplicates kept.
struct HeaderKeys(Vec<String>);

impl<'de> Deserialize<'de> for HeaderKeys {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct KeysVisitor;

        impl<'de> Visitor<'de> for KeysVisitor {
            type Value = HeaderKeys;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a safetensors header object")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<HeaderKeys, A::Error> {
                let mut keys = Vec::new();
                while let Some(key) = map.next_key::<String>()? {
                    map.next_value::<IgnoredAny>()?;
                    if key != "__metadata__" {
                        keys.push(key);
                    }
                }
                Ok(HeaderKeys(keys))
            }
        }

        deserializer.deserialize_map(KeysVisitor)
    }
}

fn header_keys(path: &Path) -> Result<Vec<String>> {
    let mut file = fs::File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut len_bytes = [0u8; 8];
    file.read_exact(&mut len_bytes)?;
    let len = u64::from_le_bytes(len_bytes);
    if len > MAX_HEADER_LEN || len > file_len.saturating_sub(8) {
        return Err(Kg4TextError::Validation(format!(
            "{}: header length {} exceeds the file or the {} byte limit",
            path.display(),
            len,
            MAX_HEADER_LEN
        )));
    }
    let len = usize::try_from(len).map_err(|_| {
        Kg4TextError::Validation(format!("{}: header length overflows", path.display()))
    })?;
    let mut header = vec![0u8; len];
    file.read_exact(&mut header)?;
    let HeaderKeys(keys) = serde_json::from_slice::<HeaderKeys>(&header)?;
    Ok(keys)
}

/// Parameters a snapshot key binds to: the exact name, or names nested
/// under it (`key.`).
fn candidates<'a>(key: &str, names: impl Iterator<Item = &'a String>) -> Vec<String> {
    let nested = format!("{}.", key);
    names
        .filter(|name| name.as_str() == key || name.starts_with(&nested))
        .cloned()
        .collect()
}

/// Assign snapshot tensors to the matching parameters of `varmap`.
///
/// Fails on duplicate keys in the file or on a key that matches more than
/// one parameter. Keys that match nothing are logged and reported. Every
/// key is resolved and shape-checked before any parameter changes, so a
/// failed restore leaves `varmap` untouched.
pub fn restore_snapshot(path: &Path, varmap: &VarMap) -> Result<RestoreReport> {
    if !path.exists() {
        return Err(Kg4TextError::CheckpointNotFound(path.to_path_buf()));
    }
    let keys = header_keys(path)?;
    let mut seen = std::collections::HashSet::new();
    if let Some(dup) = keys.iter().find(|k| !seen.insert(k.as_str())) {
        return Err(Kg4TextError::CheckpointCorruption {
            path: path.to_path_buf(),
            name: dup.clone(),
        });
    }

    let tensors = candle_core::safetensors::load(path, &Device::Cpu)?;
    let vars: HashMap<String, candle_core::Var> = sorted_vars(varmap)?.into_iter().collect();
    let mut report = RestoreReport::default();
    let mut pending = Vec::new();

    for key in keys {
        let mut matched = candidates(&key, vars.keys());
        matched.sort();
        match matched.as_slice() {
            [] => {
                warn!("Tensor named '{}' not found in network, skipped", key);
                report.missing.push(Kg4TextError::MissingParameterBinding(key));
            }
            [name] => {
                let value = tensors.get(&key).ok_or_else(|| {
                    Kg4TextError::Validation(format!("{}: no data for '{}'", path.display(), key))
                })?;
                let var = &vars[name];
                pending.push((var.clone(), staged(var, name, value)?));
                report.assigned.push((key, name.clone()));
            }
            _ => {
                return Err(Kg4TextError::AmbiguousParameterBinding {
                    name: key,
                    candidates: matched,
                })
            }
        }
    }

    assign_all(pending)?;
    for (key, name) in &report.assigned {
        debug!("Assigned '{}' to '{}'", key, name);
    }
    info!("[*] Restored parameter snapshot {} ({})", path.display(), report);
    Ok(report)
}
