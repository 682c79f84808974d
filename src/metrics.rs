//! Precision, recall and F1 over binary prediction / ground-truth matrices.
//!
//! Micro averages pool every instance-class pair before scoring. Macro
//! averages score each class column separately and average only over the
//! classes where the ratio is defined, so classes absent from both the
//! prediction and the ground truth never drag the macro scores down.

use std::fmt;

use ndarray::{ArrayView1, ArrayView2};
use serde::Serialize;

use crate::utils::math::argmax;
use crate::{Kg4TextError, Result};

/// Precision, recall and F1 for one binary sequence pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PrecisionRecallF1 {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// True positive / false positive / false negative counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Confusion {
    pub true_positive: usize,
    pub false_positive: usize,
    pub false_negative: usize,
}

impl Confusion {
    fn count<'a>(
        prediction: impl Iterator<Item = &'a u8>,
        ground_truth: impl Iterator<Item = &'a u8>,
    ) -> Self {
        let mut counts = Self::default();
        for (&p, &g) in prediction.zip(ground_truth) {
            match (p, g) {
                (1, 1) => counts.true_positive += 1,
                (1, 0) => counts.false_positive += 1,
                (0, 1) => counts.false_negative += 1,
                _ => {}
            }
        }
        counts
    }

    /// No positive appears in either sequence.
    pub fn is_undefined(&self) -> bool {
        self.true_positive == 0 && self.false_positive == 0 && self.false_negative == 0
    }

    /// Scores with every zero denominator defined as 0.
    pub fn scores(&self) -> PrecisionRecallF1 {
        let tp = self.true_positive as f64;
        let precision = ratio(tp, tp + self.false_positive as f64);
        let recall = ratio(tp, tp + self.false_negative as f64);
        PrecisionRecallF1 {
            precision,
            recall,
            f1: harmonic_mean(precision, recall),
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

fn harmonic_mean(precision: f64, recall: f64) -> f64 {
    ratio(2.0 * precision * recall, precision + recall)
}

fn mean(values: &[f64]) -> f64 {
    ratio(values.iter().sum(), values.len() as f64)
}

fn check_same_len(prediction: &ArrayView1<u8>, ground_truth: &ArrayView1<u8>) -> Result<()> {
    if prediction.len() != ground_truth.len() {
        return Err(Kg4TextError::ShapeMismatch(format!(
            "prediction has {} elements, ground truth has {}",
            prediction.len(),
            ground_truth.len()
        )));
    }
    Ok(())
}

/// Precision/recall/F1 of a 1-D binary prediction against its ground truth.
///
/// Zero denominators yield 0, so all-negative inputs score (0, 0, 0).
pub fn precision_recall_f1(
    prediction: ArrayView1<u8>,
    ground_truth: ArrayView1<u8>,
) -> Result<PrecisionRecallF1> {
    check_same_len(&prediction, &ground_truth)?;
    Ok(Confusion::count(prediction.iter(), ground_truth.iter()).scores())
}

/// Like [`precision_recall_f1`], but `None` when TP = FP = FN = 0.
pub fn precision_recall_f1_strict(
    prediction: ArrayView1<u8>,
    ground_truth: ArrayView1<u8>,
) -> Result<Option<PrecisionRecallF1>> {
    check_same_len(&prediction, &ground_truth)?;
    let counts = Confusion::count(prediction.iter(), ground_truth.iter());
    if counts.is_undefined() {
        Ok(None)
    } else {
        Ok(Some(counts.scores()))
    }
}

/// Evaluation statistics for one prediction matrix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub accuracy: f64,
    #[serde(rename = "micro-precision")]
    pub micro_precision: f64,
    #[serde(rename = "micro-recall")]
    pub micro_recall: f64,
    #[serde(rename = "micro-F1")]
    pub micro_f1: f64,
    #[serde(rename = "macro-precision")]
    pub macro_precision: f64,
    #[serde(rename = "macro-recall")]
    pub macro_recall: f64,
    #[serde(rename = "macro-F1")]
    pub macro_f1: f64,
    #[serde(rename = "single-label-error", skip_serializing_if = "Option::is_none")]
    pub single_label_error: Option<f64>,
}

impl Stats {
    /// `(key, value)` pairs sorted by key.
    pub fn entries(&self) -> Vec<(&'static str, f64)> {
        let mut entries = vec![
            ("accuracy", self.accuracy),
            ("micro-precision", self.micro_precision),
            ("micro-recall", self.micro_recall),
            ("micro-F1", self.micro_f1),
            ("macro-precision", self.macro_precision),
            ("macro-recall", self.macro_recall),
            ("macro-F1", self.macro_f1),
        ];
        if let Some(error) = self.single_label_error {
            entries.push(("single-label-error", error));
        }
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .entries()
            .into_iter()
            .map(|(key, value)| format!("{}: {:.3}", key, value))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Accuracy, micro and macro P/R/F1 of `prediction` against `ground_truth`.
///
/// With `single_label`, also reports the fraction of rows whose argmax
/// differs between prediction and ground truth.
pub fn statistics(
    prediction: ArrayView2<u8>,
    ground_truth: ArrayView2<u8>,
    single_label: bool,
) -> Result<Stats> {
    if prediction.dim() != ground_truth.dim() {
        return Err(Kg4TextError::ShapeMismatch(format!(
            "prediction is {:?}, ground truth is {:?}",
            prediction.dim(),
            ground_truth.dim()
        )));
    }
    let (num_instance, num_class) = prediction.dim();

    let matching = prediction
        .iter()
        .zip(ground_truth.iter())
        .filter(|(p, g)| p == g)
        .count();
    let accuracy = ratio(matching as f64, (num_instance * num_class) as f64);

    let micro = Confusion::count(prediction.iter(), ground_truth.iter()).scores();

    let mut precisions = Vec::with_capacity(num_class);
    let mut recalls = Vec::with_capacity(num_class);
    for j in 0..num_class {
        let predicted = prediction.column(j);
        let truth = ground_truth.column(j);
        let Some(scores) = precision_recall_f1_strict(predicted, truth)? else {
            continue;
        };
        if predicted.iter().any(|&v| v > 0) {
            precisions.push(scores.precision);
        }
        if truth.iter().any(|&v| v > 0) {
            recalls.push(scores.recall);
        }
    }
    let macro_precision = mean(&precisions);
    let macro_recall = mean(&recalls);

    let single_label_error = single_label.then(|| {
        let mismatched = prediction
            .rows()
            .into_iter()
            .zip(ground_truth.rows())
            .filter(|(p, g)| argmax(p.iter().copied()) != argmax(g.iter().copied()))
            .count();
        ratio(mismatched as f64, num_instance as f64)
    });

    Ok(Stats {
        accuracy,
        micro_precision: micro.precision,
        micro_recall: micro.recall,
        micro_f1: micro.f1,
        macro_precision,
        macro_recall,
        macro_f1: harmonic_mean(macro_precision, macro_recall),
        single_label_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, Array2};

    #[test]
    fn test_precision_recall_f1_one_of_each() {
        let scores =
            precision_recall_f1(arr1(&[1, 1, 0, 0]).view(), arr1(&[1, 0, 1, 0]).view()).unwrap();
        assert_eq!(scores.precision, 0.5);
        assert_eq!(scores.recall, 0.5);
        assert_eq!(scores.f1, 0.5);
    }

    #[test]
    fn test_precision_recall_f1_all_negative_is_zero() {
        let zeros = arr1(&[0u8, 0, 0]);
        let scores = precision_recall_f1(zeros.view(), zeros.view()).unwrap();
        assert_eq!((scores.precision, scores.recall, scores.f1), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_strict_variant_is_undefined_without_positives() {
        let zeros = arr1(&[0u8, 0, 0]);
        assert_eq!(
            precision_recall_f1_strict(zeros.view(), zeros.view()).unwrap(),
            None
        );
    }

    #[test]
    fn test_strict_variant_defined_with_only_false_positives() {
        let scores = precision_recall_f1_strict(arr1(&[1u8, 0]).view(), arr1(&[0u8, 0]).view())
            .unwrap()
            .expect("false positive makes the ratio defined");
        assert_eq!(scores.precision, 0.0);
        assert_eq!(scores.recall, 0.0);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let result = precision_recall_f1(arr1(&[1u8, 0]).view(), arr1(&[1u8]).view());
        assert!(matches!(result, Err(Kg4TextError::ShapeMismatch(_))));
    }

    #[test]
    fn test_statistics_shape_mismatch() {
        let a = Array2::<u8>::zeros((2, 3));
        let b = Array2::<u8>::zeros((3, 2));
        assert!(matches!(
            statistics(a.view(), b.view(), false),
            Err(Kg4TextError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_statistics_known_values() {
        let prediction = arr2(&[[1u8, 1, 0], [0, 1, 0], [0, 0, 1]]);
        let truth = arr2(&[[1u8, 0, 0], [0, 1, 0], [1, 0, 0]]);
        let stats = statistics(prediction.view(), truth.view(), true).unwrap();

        assert!((stats.accuracy - 6.0 / 9.0).abs() < 1e-12);
        assert_eq!(stats.micro_precision, 0.5);
        assert!((stats.micro_recall - 2.0 / 3.0).abs() < 1e-12);
        // Class 2 has no ground-truth positive, so its recall is not averaged.
        assert_eq!(stats.macro_precision, 0.5);
        assert_eq!(stats.macro_recall, 0.75);
        assert!((stats.macro_f1 - 0.6).abs() < 1e-12);
        assert!((stats.single_label_error.unwrap() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_statistics_display_sorted_keys() {
        let prediction = arr2(&[[1u8, 1, 0], [0, 1, 0], [0, 0, 1]]);
        let truth = arr2(&[[1u8, 0, 0], [0, 1, 0], [1, 0, 0]]);
        let stats = statistics(prediction.view(), truth.view(), true).unwrap();
        insta::assert_snapshot!(
            stats.to_string(),
            @"accuracy: 0.667, macro-F1: 0.600, macro-precision: 0.500, macro-recall: 0.750, micro-F1: 0.571, micro-precision: 0.500, micro-recall: 0.667, single-label-error: 0.333"
        );
    }

    #[test]
    fn test_statistics_all_zero_has_no_division_error() {
        let zeros = Array2::<u8>::zeros((4, 3));
        let stats = statistics(zeros.view(), zeros.view(), false).unwrap();
        assert_eq!(stats.accuracy, 1.0);
        assert_eq!(stats.micro_f1, 0.0);
        assert_eq!(stats.macro_f1, 0.0);
        assert_eq!(stats.single_label_error, None);
    }

    #[test]
    fn test_empty_class_does_not_drag_macro_down() {
        // Class 1 never appears anywhere; a perfect score on class 0 stays perfect.
        let matrix = arr2(&[[1u8, 0], [0, 0], [1, 0]]);
        let stats = statistics(matrix.view(), matrix.view(), false).unwrap();
        assert_eq!(stats.macro_precision, 1.0);
        assert_eq!(stats.macro_recall, 1.0);
        assert_eq!(stats.macro_f1, 1.0);
    }

    #[test]
    fn test_stats_serialize_keys() {
        let matrix = arr2(&[[1u8, 0], [0, 1]]);
        let stats = statistics(matrix.view(), matrix.view(), true).unwrap();
        let json = serde_json::to_value(&stats).unwrap();
        for key in [
            "accuracy",
            "micro-precision",
            "micro-recall",
            "micro-F1",
            "macro-precision",
            "macro-recall",
            "macro-F1",
            "single-label-error",
        ] {
            assert!(json.get(key).is_some(), "missing key {key}");
        }
    }

    // -- Property-based tests --

    mod prop_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_pair() -> impl Strategy<Value = (Array2<u8>, Array2<u8>)> {
            (1usize..12, 1usize..6).prop_flat_map(|(rows, cols)| {
                let cells = rows * cols;
                (
                    proptest::collection::vec(0u8..=1, cells),
                    proptest::collection::vec(0u8..=1, cells),
                )
                    .prop_map(move |(p, g)| {
                        (
                            Array2::from_shape_vec((rows, cols), p).unwrap(),
                            Array2::from_shape_vec((rows, cols), g).unwrap(),
                        )
                    })
            })
        }

        proptest! {
            #[test]
            fn prop_accuracy_is_mean_agreement((p, g) in arb_pair()) {
                let stats = statistics(p.view(), g.view(), false).unwrap();
                let agree = p.iter().zip(g.iter()).filter(|(a, b)| a == b).count();
                prop_assert!((stats.accuracy - agree as f64 / p.len() as f64).abs() < 1e-12);
            }

            #[test]
            fn prop_self_accuracy_is_one((p, _g) in arb_pair()) {
                let stats = statistics(p.view(), p.view(), true).unwrap();
                prop_assert_eq!(stats.accuracy, 1.0);
                prop_assert_eq!(stats.single_label_error, Some(0.0));
            }

            #[test]
            fn prop_swap_preserves_accuracy_and_exchanges_precision_recall((p, g) in arb_pair()) {
                let forward = statistics(p.view(), g.view(), false).unwrap();
                let swapped = statistics(g.view(), p.view(), false).unwrap();
                prop_assert_eq!(forward.accuracy, swapped.accuracy);
                prop_assert_eq!(forward.micro_precision, swapped.micro_recall);
                prop_assert_eq!(forward.micro_recall, swapped.micro_precision);
            }

            #[test]
            fn prop_scores_within_unit_interval((p, g) in arb_pair()) {
                let stats = statistics(p.view(), g.view(), true).unwrap();
                for (key, value) in stats.entries() {
                    prop_assert!((0.0..=1.0).contains(&value), "{} out of range: {}", key, value);
                }
            }
        }
    }
}
