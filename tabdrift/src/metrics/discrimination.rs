//! Discrimination metrics over `(y_true, y_prob)` pairs.
//!
//! - ROC AUC (rank-based, ties get average ranks)
//! - Average precision (area under the precision-recall step curve)
//! - Brier score (mean squared error of the probability)
//!
//! All functions are pure. Metrics that need both classes fail with
//! [`MetricsError::DegenerateLabelSet`]; [`DiscriminationMetrics::compute`]
//! turns that into an undefined (`None`) entry instead.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricsError {
    #[error("Empty label set")]
    EmptyLabelSet,

    #[error("Degenerate label set for {metric}: {detail}")]
    DegenerateLabelSet { metric: &'static str, detail: String },

    #[error("Length mismatch: {labels} labels vs {probs} probabilities")]
    LengthMismatch { labels: usize, probs: usize },

    #[error("Probability out of range at row {row}: {value}")]
    ProbabilityOutOfRange { row: usize, value: f64 },

    #[error("Invalid label at row {row}: {value}")]
    InvalidLabel { row: usize, value: u8 },

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
}

pub const ROC_AUC: &str = "roc_auc";
pub const PR_AUC: &str = "pr_auc";
pub const BRIER: &str = "brier";

/// Validate a label/probability pair of vectors.
///
/// Labels must be 0 or 1, probabilities finite and within [0, 1].
pub fn check_inputs(y_true: &[u8], y_prob: &[f64]) -> Result<(), MetricsError> {
    if y_true.len() != y_prob.len() {
        return Err(MetricsError::LengthMismatch {
            labels: y_true.len(),
            probs: y_prob.len(),
        });
    }
    if y_true.is_empty() {
        return Err(MetricsError::EmptyLabelSet);
    }
    if let Some((row, &value)) = y_true.iter().enumerate().find(|&(_, &y)| y > 1) {
        return Err(MetricsError::InvalidLabel { row, value });
    }
    if let Some((row, &value)) = y_prob
        .iter()
        .enumerate()
        .find(|(_, p)| !p.is_finite() || **p < 0.0 || **p > 1.0)
    {
        return Err(MetricsError::ProbabilityOutOfRange { row, value });
    }
    Ok(())
}

fn class_counts(y_true: &[u8]) -> (usize, usize) {
    let pos = y_true.iter().filter(|&&y| y == 1).count();
    (pos, y_true.len() - pos)
}

/// Area under the ROC curve via the Mann-Whitney rank statistic.
pub fn roc_auc(y_true: &[u8], y_prob: &[f64]) -> Result<f64, MetricsError> {
    check_inputs(y_true, y_prob)?;
    let (pos, neg) = class_counts(y_true);
    if pos == 0 || neg == 0 {
        return Err(MetricsError::DegenerateLabelSet {
            metric: ROC_AUC,
            detail: format!("{} positives, {} negatives", pos, neg),
        });
    }

    let mut order: Vec<usize> = (0..y_prob.len()).collect();
    order.sort_by(|&a, &b| y_prob[a].total_cmp(&y_prob[b]));

    // Average 1-based ranks over tie groups.
    let mut rank_sum_pos = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && y_prob[order[end]] == y_prob[order[start]] {
            end += 1;
        }
        let avg_rank = (start + 1 + end) as f64 / 2.0;
        let tied_pos = order[start..end].iter().filter(|&&i| y_true[i] == 1).count();
        rank_sum_pos += avg_rank * tied_pos as f64;
        start = end;
    }

    let pos_f = pos as f64;
    let u = rank_sum_pos - pos_f * (pos_f + 1.0) / 2.0;
    Ok(u / (pos_f * neg as f64))
}

/// Average precision: sum over distinct thresholds of `(R_k - R_{k-1}) * P_k`.
///
/// Requires at least one positive.
pub fn average_precision(y_true: &[u8], y_prob: &[f64]) -> Result<f64, MetricsError> {
    check_inputs(y_true, y_prob)?;
    let (pos, neg) = class_counts(y_true);
    if pos == 0 {
        return Err(MetricsError::DegenerateLabelSet {
            metric: PR_AUC,
            detail: format!("0 positives, {} negatives", neg),
        });
    }

    let mut order: Vec<usize> = (0..y_prob.len()).collect();
    order.sort_by(|&a, &b| y_prob[b].total_cmp(&y_prob[a]));

    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut prev_recall = 0.0;
    let mut ap = 0.0;
    let mut idx = 0;
    while idx < order.len() {
        let score = y_prob[order[idx]];
        while idx < order.len() && y_prob[order[idx]] == score {
            if y_true[order[idx]] == 1 {
                tp += 1;
            } else {
                fp += 1;
            }
            idx += 1;
        }
        let recall = tp as f64 / pos as f64;
        let precision = tp as f64 / (tp + fp) as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }
    Ok(ap)
}

/// Mean squared difference between probability and outcome.
pub fn brier_score(y_true: &[u8], y_prob: &[f64]) -> Result<f64, MetricsError> {
    check_inputs(y_true, y_prob)?;
    let sum: f64 = y_true
        .iter()
        .zip(y_prob)
        .map(|(&y, &p)| (p - y as f64).powi(2))
        .sum();
    Ok(sum / y_true.len() as f64)
}

/// Discrimination metrics for one scored set. `None` means undefined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscriminationMetrics {
    pub roc_auc: Option<f64>,
    pub pr_auc: Option<f64>,
    pub brier: Option<f64>,
}

impl DiscriminationMetrics {
    /// Compute all three metrics, mapping degenerate label sets to `None`.
    ///
    /// Empty or malformed input is still an error.
    pub fn compute(y_true: &[u8], y_prob: &[f64]) -> Result<Self, MetricsError> {
        check_inputs(y_true, y_prob)?;
        Ok(Self {
            roc_auc: undefined_if_degenerate(roc_auc(y_true, y_prob))?,
            pr_auc: undefined_if_degenerate(average_precision(y_true, y_prob))?,
            brier: Some(brier_score(y_true, y_prob)?),
        })
    }

    /// Defined metrics keyed by name. Undefined metrics are left out.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        [(ROC_AUC, self.roc_auc), (PR_AUC, self.pr_auc), (BRIER, self.brier)]
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name.to_string(), v)))
            .collect()
    }
}

/// Turn a `DegenerateLabelSet` failure into `Ok(None)`.
pub fn undefined_if_degenerate(result: Result<f64, MetricsError>) -> Result<Option<f64>, MetricsError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(MetricsError::DegenerateLabelSet { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Compare two floats treating NaN as equal (for sorting statistics).
pub(crate) fn cmp_f64(a: &f64, b: &f64) -> Ordering {
    a.partial_cmp(b).unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roc_auc_perfect_and_inverted() {
        let y = [0, 0, 1, 1];
        assert_eq!(roc_auc(&y, &[0.1, 0.2, 0.8, 0.9]).unwrap(), 1.0);
        assert_eq!(roc_auc(&y, &[0.9, 0.8, 0.2, 0.1]).unwrap(), 0.0);
    }

    #[test]
    fn test_roc_auc_known_value() {
        // sklearn: roc_auc_score([0, 0, 1, 1], [0.1, 0.4, 0.35, 0.8]) == 0.75
        let auc = roc_auc(&[0, 0, 1, 1], &[0.1, 0.4, 0.35, 0.8]).unwrap();
        assert!((auc - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_roc_auc_ties() {
        let auc = roc_auc(&[0, 1, 0, 1], &[0.5, 0.5, 0.5, 0.5]).unwrap();
        assert!((auc - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_roc_auc_monotonic_invariance() {
        let y = [0, 1, 0, 1, 1, 0, 1];
        let p = [0.1, 0.7, 0.3, 0.4, 0.9, 0.35, 0.2];
        let squashed: Vec<f64> = p.iter().map(|v: &f64| v.powi(3)).collect();
        assert_eq!(roc_auc(&y, &p).unwrap(), roc_auc(&y, &squashed).unwrap());
    }

    #[test]
    fn test_roc_auc_single_class() {
        assert!(matches!(
            roc_auc(&[1, 1], &[0.2, 0.9]),
            Err(MetricsError::DegenerateLabelSet { .. })
        ));
    }

    #[test]
    fn test_average_precision_known_value() {
        // sklearn: average_precision_score([0, 0, 1, 1], [0.1, 0.4, 0.35, 0.8]) == 0.8333...
        let ap = average_precision(&[0, 0, 1, 1], &[0.1, 0.4, 0.35, 0.8]).unwrap();
        assert!((ap - 5.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_average_precision_needs_positive() {
        assert!(average_precision(&[0, 0], &[0.2, 0.9]).is_err());
        assert_eq!(average_precision(&[1, 1], &[0.2, 0.9]).unwrap(), 1.0);
    }

    #[test]
    fn test_brier() {
        let b = brier_score(&[0, 1], &[0.2, 0.6]).unwrap();
        assert!((b - (0.04 + 0.16) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_compute_marks_undefined() {
        let m = DiscriminationMetrics::compute(&[0, 0, 0], &[0.1, 0.2, 0.3]).unwrap();
        assert_eq!(m.roc_auc, None);
        assert_eq!(m.pr_auc, None);
        assert!(m.brier.is_some());
        assert_eq!(m.to_map().keys().collect::<Vec<_>>(), vec!["brier"]);
    }

    #[test]
    fn test_input_validation() {
        assert_eq!(
            DiscriminationMetrics::compute(&[], &[]),
            Err(MetricsError::EmptyLabelSet)
        );
        assert!(matches!(
            brier_score(&[0, 1], &[0.5]),
            Err(MetricsError::LengthMismatch { .. })
        ));
        assert!(matches!(
            brier_score(&[0, 2], &[0.5, 0.5]),
            Err(MetricsError::InvalidLabel { .. })
        ));
        assert!(matches!(
            brier_score(&[0, 1], &[0.5, 1.5]),
            Err(MetricsError::ProbabilityOutOfRange { .. })
        ));
    }
}
