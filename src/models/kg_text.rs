//! Text encoder trained to tell whether the injected knowledge matches the
//! document's class.

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder, VarMap};

use crate::config::EncoderConfig;
use crate::data::Minibatch;
use crate::nn::{sigmoid_cross_entropy, Mode, Seq2SeqBatch, Seq2SeqEncoder};

/// Device-side view of a [`Minibatch`].
#[derive(Debug, Clone)]
pub struct KgBatch {
    pub tokens: Tensor,
    pub lengths: Vec<usize>,
    pub knowledge: Tensor,
    /// `batch × 1` category flags as f32.
    pub categories: Tensor,
    pub sequences: Vec<Vec<u32>>,
}

impl KgBatch {
    pub fn from_minibatch(batch: &Minibatch, device: &Device) -> candle_core::Result<Self> {
        let rows = batch.len();
        let tokens = Tensor::from_vec(batch.tokens.clone(), (rows, batch.width), device)?;
        let knowledge = Tensor::from_vec(
            batch.knowledge.clone(),
            (rows, batch.width, batch.kg_dim),
            device,
        )?;
        let categories = Tensor::from_vec(batch.categories.clone(), (rows, 1), device)?
            .to_dtype(DType::F32)?;
        Ok(Self {
            tokens,
            lengths: batch.lengths.clone(),
            knowledge,
            categories,
            sequences: batch.sequences.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }
}

/// Encoder plus a one-logit category head, owning its parameters and device.
pub struct KgTextModel {
    varmap: VarMap,
    device: Device,
    encoder: Seq2SeqEncoder,
    head: Linear,
    reconstruction_weight: f64,
    hidden_dim: usize,
}

impl KgTextModel {
    pub fn new(config: &EncoderConfig, device: &Device) -> candle_core::Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let encoder = Seq2SeqEncoder::new(vb.clone(), config)?;
        let head = candle_nn::linear(config.hidden_dim, 1, vb.pp("category"))?;
        Ok(Self {
            varmap,
            device: device.clone(),
            encoder,
            head,
            reconstruction_weight: config.reconstruction_weight,
            hidden_dim: config.hidden_dim,
        })
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// Category loss, plus the weighted reconstruction loss when enabled.
    pub fn loss(&self, batch: &KgBatch, mode: Mode) -> candle_core::Result<Tensor> {
        let state = self
            .encoder
            .encode(&batch.tokens, &batch.lengths, Some(&batch.knowledge), mode)?;
        let logits = self.head.forward(state.h())?;
        let category_loss = sigmoid_cross_entropy(&logits, &batch.categories)?;
        if self.reconstruction_weight <= 0.0 {
            return Ok(category_loss);
        }
        let targets = Seq2SeqBatch::from_sequences(&batch.sequences, &self.device)?;
        let reconstruction = self.encoder.reconstruction_loss(&state, &targets, mode)?;
        category_loss + (reconstruction * self.reconstruction_weight)?
    }

    /// `batch × hidden_dim` encoder states, computed in eval mode.
    pub fn text_state(&self, batch: &KgBatch) -> candle_core::Result<Tensor> {
        let state =
            self.encoder
                .encode(&batch.tokens, &batch.lengths, Some(&batch.knowledge), Mode::Eval)?;
        Ok(state.h().clone())
    }
}
