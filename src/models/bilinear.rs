//! Bilinear compatibility scorer: `H = T · M · Cᵗ`.
//!
//! `M` is the only learned parameter. Text vectors `T` (`n × v_t_dim`) and
//! class vectors `C` (`m × v_c_dim`) come from elsewhere; labels `Y`
//! (`n × m`) are multi-label 0/1.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::{Init, VarBuilder, VarMap};
use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use super::{array_to_tensor as to_tensor, tensor_to_array as to_array};
use crate::config::BilinearConfig;
use crate::metrics::{self, Stats};
use crate::nn::{sigmoid_cross_entropy, Adam, AdamParams};
use crate::{Kg4TextError, Result};

const MATRIX_NAME: &str = "bilinear_matrix";

/// `<dir>/bilinear_matrix_<dataset>.safetensors`
pub fn matrix_path(dir: &Path, dataset: &str) -> PathBuf {
    dir.join(format!("{}_{}.safetensors", MATRIX_NAME, dataset))
}

pub struct BilinearScorer {
    varmap: VarMap,
    matrix: Tensor,
    device: Device,
    config: BilinearConfig,
}

impl BilinearScorer {
    /// Fresh scorer with `M` drawn uniformly from `[0, 1)`.
    pub fn new(config: &BilinearConfig, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let matrix = vb.get_with_hints(
            (config.v_t_dim, config.v_c_dim),
            MATRIX_NAME,
            Init::Uniform { lo: 0.0, up: 1.0 },
        )?;
        Ok(Self {
            varmap,
            matrix,
            device: device.clone(),
            config: config.clone(),
        })
    }

    /// Current value of `M`.
    pub fn matrix(&self) -> Result<Array2<f32>> {
        to_array(&self.matrix)
    }

    fn check_inputs(&self, text: &ArrayView2<f32>, classes: &ArrayView2<f32>) -> Result<()> {
        if text.ncols() != self.config.v_t_dim {
            return Err(Kg4TextError::ShapeMismatch(format!(
                "text vectors have width {}, expected {}",
                text.ncols(),
                self.config.v_t_dim
            )));
        }
        if classes.ncols() != self.config.v_c_dim {
            return Err(Kg4TextError::ShapeMismatch(format!(
                "class vectors have width {}, expected {}",
                classes.ncols(),
                self.config.v_c_dim
            )));
        }
        Ok(())
    }

    fn logits_tensor(&self, text: &Tensor, classes: &Tensor) -> candle_core::Result<Tensor> {
        text.matmul(&self.matrix)?.matmul(&classes.t()?)
    }

    /// Raw scores `H` (`n × m`).
    pub fn logits(&self, text: ArrayView2<f32>, classes: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_inputs(&text, &classes)?;
        let t = to_tensor(text, &self.device)?;
        let c = to_tensor(classes, &self.device)?;
        to_array(&self.logits_tensor(&t, &c)?)
    }

    /// `sigmoid(H)`.
    pub fn probabilities(
        &self,
        text: ArrayView2<f32>,
        classes: ArrayView2<f32>,
    ) -> Result<Array2<f32>> {
        self.check_inputs(&text, &classes)?;
        let t = to_tensor(text, &self.device)?;
        let c = to_tensor(classes, &self.device)?;
        let probs = candle_nn::ops::sigmoid(&self.logits_tensor(&t, &c)?)?;
        to_array(&probs)
    }

    /// `round(sigmoid(H))`, ties to even: a zero logit predicts 0.
    pub fn predict(&self, text: ArrayView2<f32>, classes: ArrayView2<f32>) -> Result<Array2<u8>> {
        Ok(self
            .probabilities(text, classes)?
            .mapv(|p| if p.round_ties_even() >= 1.0 { 1 } else { 0 }))
    }

    /// Train `M` with Adam for `n_epoch` epochs of shuffled, exact-size
    /// minibatches, saving it to [`matrix_path`] after every epoch.
    ///
    /// Returns the mean loss of each epoch.
    pub fn train(
        &mut self,
        text: ArrayView2<f32>,
        classes: ArrayView2<f32>,
        labels: ArrayView2<u8>,
        dataset: &str,
        dir: &Path,
    ) -> Result<Vec<f32>> {
        self.check_inputs(&text, &classes)?;
        if labels.dim() != (text.nrows(), classes.nrows()) {
            return Err(Kg4TextError::ShapeMismatch(format!(
                "labels are {:?}, expected ({}, {})",
                labels.dim(),
                text.nrows(),
                classes.nrows()
            )));
        }
        let batch_size = self.config.batch_size.max(1);
        let n = text.nrows();
        if n < batch_size {
            return Err(Kg4TextError::Validation(format!(
                "{} training instances is fewer than one batch of {}",
                n, batch_size
            )));
        }

        let t = to_tensor(text, &self.device)?;
        let c = to_tensor(classes, &self.device)?;
        let y = to_tensor(labels, &self.device)?.to_dtype(DType::F32)?;
        let mut optimizer = Adam::new(
            &self.varmap,
            AdamParams {
                learning_rate: self.config.learning_rate,
                ..Default::default()
            },
        )?;
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut order: Vec<u32> = (0..n as u32).collect();
        let steps = n / batch_size;
        let log_every = self.config.log_every.max(1);
        let path = matrix_path(dir, dataset);
        std::fs::create_dir_all(dir)?;

        let mut epoch_losses = Vec::with_capacity(self.config.n_epoch);
        for epoch in 0..self.config.n_epoch {
            order.shuffle(&mut rng);
            let mut total = 0f32;
            for (step, chunk) in order.chunks_exact(batch_size).enumerate() {
                let ids = Tensor::new(chunk, &self.device)?;
                let t_batch = t.index_select(&ids, 0)?;
                let y_batch = y.index_select(&ids, 0)?;
                let loss = sigmoid_cross_entropy(&self.logits_tensor(&t_batch, &c)?, &y_batch)?;
                optimizer.backward_step(&loss)?;
                let value = loss.to_scalar::<f32>()?;
                total += value;
                if step % log_every == 0 {
                    info!("Epoch: [{:3}] [{:4}/{:4}] loss: {:.6}", epoch, step, steps, value);
                }
            }
            let mean = total / steps as f32;
            info!("Epoch: [{:3}] mean loss: {:.6}", epoch, mean);
            epoch_losses.push(mean);
            self.save(&path)?;
        }
        Ok(epoch_losses)
    }

    /// Predict and score against `labels`.
    pub fn evaluate(
        &self,
        text: ArrayView2<f32>,
        classes: ArrayView2<f32>,
        labels: ArrayView2<u8>,
        single_label: bool,
    ) -> Result<Stats> {
        let predictions = self.predict(text, classes)?;
        metrics::statistics(predictions.view(), labels, single_label)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.varmap.save(path)?;
        debug!("Saved bilinear matrix to {}", path.display());
        Ok(())
    }

    /// Replace `M` with the one saved for `dataset` under `dir`.
    pub fn load(&mut self, dir: &Path, dataset: &str) -> Result<()> {
        let path = matrix_path(dir, dataset);
        if !path.exists() {
            return Err(Kg4TextError::CheckpointNotFound(path));
        }
        self.varmap.load(&path)?;
        info!("Loaded bilinear matrix from {}", path.display());
        Ok(())
    }
}

/// Random inputs for exercising the scorer without a corpus.
#[derive(Debug, Clone)]
pub struct PseudoData {
    pub text: Array2<f32>,
    pub classes: Array2<f32>,
    pub labels: Array2<u8>,
}

impl PseudoData {
    /// `T`, `C` uniform in `[0, 1)`; each label is 1 with `positive_rate`.
    pub fn generate(
        num_text: usize,
        num_classes: usize,
        config: &BilinearConfig,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let rate = config.positive_rate.clamp(0.0, 1.0);
        let text = Array2::from_shape_simple_fn((num_text, config.v_t_dim), || rng.gen::<f32>());
        let classes =
            Array2::from_shape_simple_fn((num_classes, config.v_c_dim), || rng.gen::<f32>());
        let labels =
            Array2::from_shape_simple_fn((num_text, num_classes), || u8::from(rng.gen_bool(rate)));
        Self {
            text,
            classes,
            labels,
        }
    }
}
