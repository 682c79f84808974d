//! Candle building blocks: device selection, training mode, losses,
//! optimizer and the sequence encoder.
//!
//! Everything here works on `candle_core::Tensor` and returns
//! `candle_core::Result`; callers convert into [`crate::Kg4TextError`].

pub mod encoder;
pub mod loss;
pub mod optim;

use candle_core::{Device, Tensor};

pub use encoder::{true_length, Seq2SeqBatch, Seq2SeqEncoder};
pub use loss::{masked_cross_entropy, sigmoid_cross_entropy};
pub use optim::{Adam, AdamParams, ExponentialDecay};

/// Whether a forward pass is part of an optimizer step.
///
/// Parameters are shared between modes; only stochastic regularisation
/// (dropout) differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

impl Mode {
    /// Apply dropout with probability `p` in training mode; identity otherwise.
    pub fn dropout(self, xs: &Tensor, p: f32) -> candle_core::Result<Tensor> {
        match self {
            Mode::Train if p > 0.0 => candle_nn::ops::dropout(xs, p),
            _ => Ok(xs.clone()),
        }
    }
}

/// Select the compute device.
///
/// Uses Metal or CUDA when the corresponding feature is enabled and a device
/// is present, otherwise the CPU.
pub fn select_device() -> Device {
    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            tracing::info!("Using Metal GPU for training");
            return device;
        }
        tracing::warn!("Metal feature enabled but no device available, falling back to CPU");
    }
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            tracing::info!("Using CUDA GPU for training");
            return device;
        }
        tracing::warn!("CUDA feature enabled but no device available, falling back to CPU");
    }
    tracing::info!("Using CPU for training");
    Device::Cpu
}
