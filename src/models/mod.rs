//! Trainable models: the bilinear scorer and the knowledge-aware text model.

pub mod bilinear;
pub mod kg_text;

use candle_core::{Device, Tensor};
use ndarray::{Array2, ArrayView2};

pub use bilinear::{BilinearScorer, PseudoData};
pub use kg_text::{KgBatch, KgTextModel};

use crate::{Kg4TextError, Result};

/// Copy a 2-D array into a tensor on `device`, in logical (row-major) order.
pub fn array_to_tensor<T: candle_core::WithDType>(
    array: ArrayView2<T>,
    device: &Device,
) -> candle_core::Result<Tensor> {
    Tensor::from_vec(array.iter().copied().collect::<Vec<T>>(), array.dim(), device)
}

/// Copy a 2-D f32 tensor back to the host.
pub fn tensor_to_array(tensor: &Tensor) -> Result<Array2<f32>> {
    let (rows, cols) = tensor.dims2()?;
    let values = tensor.flatten_all()?.to_dtype(candle_core::DType::F32)?.to_vec1::<f32>()?;
    Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| Kg4TextError::ShapeMismatch(e.to_string()))
}
