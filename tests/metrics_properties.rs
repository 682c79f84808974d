//! Integration tests for the metrics engine on realistic prediction matrices.

use kg4text::config::BilinearConfig;
use kg4text::metrics::{precision_recall_f1, precision_recall_f1_strict, statistics};
use kg4text::models::PseudoData;
use ndarray::{arr1, arr2};
use pretty_assertions::assert_eq;

fn labels(seed: u64) -> ndarray::Array2<u8> {
    let config = BilinearConfig {
        v_t_dim: 1,
        v_c_dim: 1,
        positive_rate: 0.3,
        ..Default::default()
    };
    PseudoData::generate(1000, 10, &config, seed).labels
}

#[test]
fn test_half_right_sequence() {
    let scores = precision_recall_f1(arr1(&[1u8, 1, 0, 0]).view(), arr1(&[1u8, 0, 1, 0]).view())
        .unwrap();
    assert_eq!(scores.precision, 0.5);
    assert_eq!(scores.recall, 0.5);
    assert_eq!(scores.f1, 0.5);
}

#[test]
fn test_all_negative_is_zero_or_undefined() {
    let zeros = arr1(&[0u8, 0, 0]);
    let scores = precision_recall_f1(zeros.view(), zeros.view()).unwrap();
    assert_eq!((scores.precision, scores.recall, scores.f1), (0.0, 0.0, 0.0));
    assert!(precision_recall_f1_strict(zeros.view(), zeros.view())
        .unwrap()
        .is_none());
}

#[test]
fn test_random_predictions_against_random_truth() {
    let truth = labels(1);
    let prediction = labels(2);
    let stats = statistics(prediction.view(), truth.view(), false).unwrap();

    // Independent 30% positives: P(match) = 0.3² + 0.7² = 0.58.
    assert!((stats.accuracy - 0.58).abs() < 0.03, "{}", stats);
    assert!((stats.micro_precision - 0.3).abs() < 0.03, "{}", stats);
    assert!((stats.micro_recall - 0.3).abs() < 0.03, "{}", stats);
    assert!((stats.macro_f1 - 0.3).abs() < 0.05, "{}", stats);
    assert!(stats.single_label_error.is_none());
}

#[test]
fn test_perfect_prediction_scores_one() {
    let truth = labels(3);
    let stats = statistics(truth.view(), truth.view(), false).unwrap();
    assert_eq!(stats.accuracy, 1.0);
    assert_eq!(stats.micro_f1, 1.0);
    assert_eq!(stats.macro_precision, 1.0);
    assert_eq!(stats.macro_recall, 1.0);
}

#[test]
fn test_single_label_error_counts_argmax_disagreements() {
    let truth = arr2(&[[1u8, 0, 0], [0, 1, 0], [0, 0, 1], [1, 0, 0]]);
    let prediction = arr2(&[[1u8, 0, 0], [0, 0, 1], [0, 0, 1], [0, 1, 0]]);
    let stats = statistics(prediction.view(), truth.view(), true).unwrap();
    assert_eq!(stats.single_label_error, Some(0.5));
    assert_eq!(stats.accuracy, 8.0 / 12.0);
}

#[test]
fn test_mismatched_shapes_rejected() {
    let a = arr2(&[[1u8, 0]]);
    let b = arr2(&[[1u8, 0, 0]]);
    assert!(statistics(a.view(), b.view(), false).is_err());
}

#[test]
fn test_stats_serialize_with_metric_names() {
    let truth = arr2(&[[1u8, 0], [0, 1]]);
    let stats = statistics(truth.view(), truth.view(), true).unwrap();
    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["micro-F1"], 1.0);
    assert_eq!(json["single-label-error"], 0.0);
}
