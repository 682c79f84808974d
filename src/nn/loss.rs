//! Loss functions.

use candle_core::{DType, Tensor, D};

/// Mean element-wise sigmoid cross-entropy between logits and {0,1} labels.
///
/// Uses `max(x, 0) - x * z + ln(1 + exp(-|x|))`, which stays finite for
/// saturated logits.
pub fn sigmoid_cross_entropy(logits: &Tensor, labels: &Tensor) -> candle_core::Result<Tensor> {
    let labels = labels.to_dtype(logits.dtype())?;
    let positive_part = logits.relu()?;
    let cross = (logits * &labels)?;
    let softplus = logits.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    ((positive_part - cross)? + softplus)?.mean_all()
}

/// Cross-entropy over positions whose mask is 1, averaged by the mask sum.
///
/// `logits` is `(n, vocab)`, `targets` is `(n,)` of `u32` ids and `mask`
/// is `(n,)` of zeros and ones.
pub fn masked_cross_entropy(
    logits: &Tensor,
    targets: &Tensor,
    mask: &Tensor,
) -> candle_core::Result<Tensor> {
    let log_probs = candle_nn::ops::log_softmax(logits, D::Minus1)?;
    let picked = log_probs
        .gather(&targets.unsqueeze(1)?.contiguous()?, 1)?
        .squeeze(1)?;
    let mask = mask.to_dtype(DType::F32)?;
    let total = (picked.neg()? * &mask)?.sum_all()?;
    let count = mask.sum_all()?.to_scalar::<f32>()?.max(1.0);
    total / count as f64
}
