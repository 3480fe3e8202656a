//! Confusion matrix and per-class precision / recall / F1.
//!
//! Zero denominators are a defined case, not a fault: the affected value is 0.

use crate::types::{ClassLabel, Prediction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 2×2 counts indexed `[ground truth][predicted]`, order `[Real, Fake]` on both axes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix(pub [[u32; 2]; 2]);

impl ConfusionMatrix {
    pub fn record(&mut self, truth: ClassLabel, predicted: ClassLabel) {
        self.0[truth.index()][predicted.index()] += 1;
    }

    pub fn get(&self, truth: ClassLabel, predicted: ClassLabel) -> u32 {
        self.0[truth.index()][predicted.index()]
    }

    /// Number of samples whose ground truth is `class`.
    pub fn row_sum(&self, class: ClassLabel) -> u32 {
        self.0[class.index()].iter().sum()
    }

    /// Number of samples predicted as `class`.
    pub fn column_sum(&self, class: ClassLabel) -> u32 {
        self.0.iter().map(|row| row[class.index()]).sum()
    }

    pub fn total(&self) -> u32 {
        self.0.iter().flatten().sum()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl ClassMetrics {
    /// Derive the metrics for one class. Precision and recall are rounded to
    /// two decimals first; F1 is computed from the rounded values and rounded.
    pub fn for_class(cm: &ConfusionMatrix, class: ClassLabel) -> Self {
        let hits = cm.get(class, class);
        let precision = round2(ratio(hits, cm.column_sum(class)));
        let recall = round2(ratio(hits, cm.row_sum(class)));

        let f1 = if precision + recall > 0.0 {
            round2(2.0 * precision * recall / (precision + recall))
        } else {
            0.0
        };

        Self { precision, recall, f1 }
    }
}

/// Evaluation of one batch against its ground-truth labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub confusion_matrix: ConfusionMatrix,
    pub per_class: BTreeMap<ClassLabel, ClassMetrics>,
    /// Ids counted in the matrix, in input order.
    pub valid_ids: Vec<i64>,
}

impl MetricsReport {
    pub fn class(&self, class: ClassLabel) -> ClassMetrics {
        self.per_class.get(&class).copied().unwrap_or_default()
    }
}

/// Build the report over every prediction carrying a "Real"/"Fake" ground truth.
///
/// Unlabeled predictions are skipped, as are labels outside the two classes.
/// An empty input yields an all-zero report.
pub fn aggregate(predictions: &[Prediction]) -> MetricsReport {
    let mut confusion_matrix = ConfusionMatrix::default();
    let mut valid_ids = Vec::new();

    for prediction in predictions.iter().filter(|p| p.is_labeled()) {
        match prediction.ground_truth_label.parse::<ClassLabel>() {
            Ok(truth) => {
                confusion_matrix.record(truth, prediction.predicted_label);
                valid_ids.push(prediction.id);
            }
            Err(e) => {
                tracing::warn!(id = prediction.id, error = %e, "excluding prediction from metrics");
            }
        }
    }

    let per_class = ClassLabel::ALL
        .iter()
        .map(|&class| (class, ClassMetrics::for_class(&confusion_matrix, class)))
        .collect();

    MetricsReport {
        confusion_matrix,
        per_class,
        valid_ids,
    }
}

fn ratio(numerator: u32, denominator: u32) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        f64::from(numerator) / f64::from(denominator)
    }
}

/// Two decimals, exact ties to even (0.125 -> 0.12, 0.625 -> 0.62).
fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}
