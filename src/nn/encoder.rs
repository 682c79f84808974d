//! Knowledge-aware LSTM encoder with a reconstruction decoder.
//!
//! The encoder reads `[embedding ; kg_vector]` at every position and keeps
//! its state frozen once a sequence's true length is reached, so the final
//! state of each row is the state at that row's last real token.

use candle_core::{Device, Module, Tensor};
use candle_nn::rnn::{LSTMConfig, LSTMState, LSTM, RNN};
use candle_nn::{Embedding, Init, Linear, VarBuilder};

use super::{loss::masked_cross_entropy, Mode};
use crate::config::EncoderConfig;
use crate::data::vocab::{END_ID, PAD_ID, START_ID};

/// Index of the first `pad` id, or the full length when there is none.
pub fn true_length(ids: &[u32], pad: u32) -> usize {
    ids.iter().position(|&id| id == pad).unwrap_or(ids.len())
}

fn lstm_config() -> LSTMConfig {
    LSTMConfig {
        w_ih_init: Init::Uniform { lo: -0.1, up: 0.1 },
        w_hh_init: Init::Uniform { lo: -0.1, up: 0.1 },
        ..Default::default()
    }
}

/// `(batch, 1)` column of ones for rows still inside their sequence at `t`.
fn step_mask(lengths: &[usize], t: usize, device: &Device) -> candle_core::Result<Tensor> {
    let keep: Vec<f32> = lengths
        .iter()
        .map(|&len| if t < len { 1.0 } else { 0.0 })
        .collect();
    Tensor::from_vec(keep, (lengths.len(), 1), device)
}

fn blend(old: &Tensor, new: &Tensor, keep: &Tensor) -> candle_core::Result<Tensor> {
    old + (new - old)?.broadcast_mul(keep)?
}

pub struct Seq2SeqEncoder {
    embedding: Embedding,
    encoder: LSTM,
    decoder: LSTM,
    output: Linear,
    kg_dim: usize,
    dropout: f32,
}

impl Seq2SeqEncoder {
    pub fn new(vb: VarBuilder, config: &EncoderConfig) -> candle_core::Result<Self> {
        let embedding = candle_nn::embedding(
            config.vocab_size,
            config.embedding_dim,
            vb.pp("embedding"),
        )?;
        let encoder = candle_nn::rnn::lstm(
            config.embedding_dim + config.kg_vector_dim,
            config.hidden_dim,
            lstm_config(),
            vb.pp("encoder"),
        )?;
        let decoder = candle_nn::rnn::lstm(
            config.embedding_dim,
            config.hidden_dim,
            lstm_config(),
            vb.pp("decoder"),
        )?;
        let output = candle_nn::linear(config.hidden_dim, config.vocab_size, vb.pp("output"))?;
        Ok(Self {
            embedding,
            encoder,
            decoder,
            output,
            kg_dim: config.kg_vector_dim,
            dropout: config.dropout,
        })
    }

    /// Encode `tokens` (`batch × time`, u32) with aligned knowledge vectors
    /// (`batch × time × kg_dim`). Missing knowledge is treated as zeros.
    pub fn encode(
        &self,
        tokens: &Tensor,
        lengths: &[usize],
        knowledge: Option<&Tensor>,
        mode: Mode,
    ) -> candle_core::Result<LSTMState> {
        let (batch, time) = tokens.dims2()?;
        if lengths.len() != batch {
            candle_core::bail!("{} lengths for a batch of {}", lengths.len(), batch);
        }
        let embedded = self.embedding.forward(tokens)?;
        let inputs = if self.kg_dim == 0 {
            embedded
        } else {
            let knowledge = match knowledge {
                Some(kg) => kg.to_dtype(embedded.dtype())?,
                None => {
                    Tensor::zeros((batch, time, self.kg_dim), embedded.dtype(), tokens.device())?
                }
            };
            Tensor::cat(&[&embedded, &knowledge], 2)?
        };
        let inputs = mode.dropout(&inputs, self.dropout)?;

        let mut state = self.encoder.zero_state(batch)?;
        for t in 0..time {
            let x = inputs.narrow(1, t, 1)?.squeeze(1)?;
            let next = self.encoder.step(&x, &state)?;
            let keep = step_mask(lengths, t, tokens.device())?;
            state = LSTMState::new(
                blend(state.h(), next.h(), &keep)?,
                blend(state.c(), next.c(), &keep)?,
            );
        }
        Ok(state)
    }

    /// Run the decoder from `state` over `decode_tokens` (`batch × time`) and
    /// project each step to vocabulary logits, flattened to
    /// `(batch * time) × vocab`.
    pub fn decode_logits(
        &self,
        state: &LSTMState,
        decode_tokens: &Tensor,
        mode: Mode,
    ) -> candle_core::Result<Tensor> {
        let (batch, time) = decode_tokens.dims2()?;
        let embedded = mode.dropout(&self.embedding.forward(decode_tokens)?, self.dropout)?;
        let mut state = state.clone();
        let mut outputs = Vec::with_capacity(time);
        for t in 0..time {
            let x = embedded.narrow(1, t, 1)?.squeeze(1)?;
            state = self.decoder.step(&x, &state)?;
            outputs.push(state.h().clone());
        }
        let hidden = Tensor::stack(&outputs, 1)?;
        let hidden_dim = hidden.dim(2)?;
        self.output
            .forward(&hidden.reshape((batch * time, hidden_dim))?)
    }

    /// Masked cross-entropy of reconstructing `batch` from `state`.
    pub fn reconstruction_loss(
        &self,
        state: &LSTMState,
        batch: &Seq2SeqBatch,
        mode: Mode,
    ) -> candle_core::Result<Tensor> {
        let logits = self.decode_logits(state, &batch.decode, mode)?;
        masked_cross_entropy(&logits, &batch.target, &batch.mask)
    }
}

/// Decoder inputs, targets and mask for reconstructing a batch of token sequences.
#[derive(Debug, Clone)]
pub struct Seq2SeqBatch {
    /// `[START] + tokens`, padded: `batch × (max_len + 1)`.
    pub decode: Tensor,
    /// `tokens + [END]`, padded and flattened.
    pub target: Tensor,
    /// 1 over the `len + 1` real target positions of each row, flattened.
    pub mask: Tensor,
}

impl Seq2SeqBatch {
    pub fn from_sequences(sequences: &[Vec<u32>], device: &Device) -> candle_core::Result<Self> {
        let width = sequences.iter().map(Vec::len).max().unwrap_or(0) + 1;
        let rows = sequences.len();
        let mut decode = vec![PAD_ID; rows * width];
        let mut target = vec![PAD_ID; rows * width];
        let mut mask = vec![0f32; rows * width];

        for (row, seq) in sequences.iter().enumerate() {
            let base = row * width;
            decode[base] = START_ID;
            for (i, &id) in seq.iter().enumerate() {
                decode[base + i + 1] = id;
                target[base + i] = id;
            }
            target[base + seq.len()] = END_ID;
            mask[base..=base + seq.len()].fill(1.0);
        }

        Ok(Self {
            decode: Tensor::from_vec(decode, (rows, width), device)?,
            target: Tensor::from_vec(target, rows * width, device)?,
            mask: Tensor::from_vec(mask, rows * width, device)?,
        })
    }
}
