//! Shared mathematical utilities for vector operations.

/// Element-wise vector product: a ⊙ b.
pub fn vector_multiply(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).collect()
}

/// Index of the largest value; the first one wins on ties.
/// Returns None for an empty input.
pub fn argmax<T: PartialOrd>(values: impl IntoIterator<Item = T>) -> Option<usize> {
    let mut best: Option<(usize, T)> = None;
    for (idx, value) in values.into_iter().enumerate() {
        let is_better = best.as_ref().map_or(true, |(_, current)| value > *current);
        if is_better {
            best = Some((idx, value));
        }
    }
    best.map(|(idx, _)| idx)
}
