//! Cost-sensitive threshold selection.
//!
//! Sweeps the candidate thresholds of a [`CostModel`] in declared order,
//! binarizes at `prob >= t`, and picks the threshold with the lowest expected
//! cost. On ties the earliest-listed threshold wins.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CostError {
    #[error("Empty label set")]
    EmptyLabelSet,

    #[error("Cost model has no threshold candidates")]
    NoThresholds,

    #[error("Threshold {0} is outside [0, 1]")]
    ThresholdOutOfRange(f64),

    #[error("Cost {name} must be finite and non-negative, got {value}")]
    InvalidCost { name: &'static str, value: f64 },

    #[error("Length mismatch: {labels} labels vs {probs} probabilities")]
    LengthMismatch { labels: usize, probs: usize },
}

fn default_zero() -> f64 {
    0.0
}

/// Per-outcome costs plus an ordered list of candidate thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    /// Candidate thresholds, swept in this order.
    pub thresholds: Vec<f64>,
    /// Cost of a false positive.
    pub c_fp: f64,
    /// Cost of a false negative.
    pub c_fn: f64,
    /// Cost of a true positive.
    #[serde(default = "default_zero")]
    pub c_tp: f64,
    /// Cost of a true negative.
    #[serde(default = "default_zero")]
    pub c_tn: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            thresholds: (1..20).map(|i| i as f64 * 0.05).collect(),
            c_fp: 1.0,
            c_fn: 5.0,
            c_tp: 0.0,
            c_tn: 0.0,
        }
    }
}

impl CostModel {
    /// Check the model invariants: at least one threshold, thresholds in
    /// [0, 1], costs finite and non-negative.
    pub fn validate(&self) -> Result<(), CostError> {
        if self.thresholds.is_empty() {
            return Err(CostError::NoThresholds);
        }
        if let Some(&t) = self
            .thresholds
            .iter()
            .find(|t| !(t.is_finite() && (0.0..=1.0).contains(*t)))
        {
            return Err(CostError::ThresholdOutOfRange(t));
        }
        for (name, value) in [
            ("c_fp", self.c_fp),
            ("c_fn", self.c_fn),
            ("c_tp", self.c_tp),
            ("c_tn", self.c_tn),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CostError::InvalidCost { name, value });
            }
        }
        Ok(())
    }

    /// Weighted cost of a confusion matrix.
    pub fn cost_of(&self, counts: &ConfusionCounts) -> f64 {
        self.c_fp * counts.fp as f64
            + self.c_fn * counts.fn_ as f64
            + self.c_tp * counts.tp as f64
            + self.c_tn * counts.tn as f64
    }
}

/// Confusion counts at one threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
}

impl ConfusionCounts {
    /// Count outcomes for `predict = prob >= threshold`.
    pub fn at_threshold(y_true: &[u8], y_prob: &[f64], threshold: f64) -> Self {
        let mut counts = Self::default();
        for (&y, &p) in y_true.iter().zip(y_prob) {
            match (p >= threshold, y == 1) {
                (true, true) => counts.tp += 1,
                (true, false) => counts.fp += 1,
                (false, false) => counts.tn += 1,
                (false, true) => counts.fn_ += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.tp + self.fp + self.tn + self.fn_
    }
}

/// Chosen threshold and its expected cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdDecision {
    pub threshold: f64,
    pub expected_cost: f64,
}

/// One row of a threshold sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCost {
    pub threshold: f64,
    pub expected_cost: f64,
    pub counts: ConfusionCounts,
}

fn check_lengths(y_true: &[u8], y_prob: &[f64]) -> Result<(), CostError> {
    if y_true.len() != y_prob.len() {
        return Err(CostError::LengthMismatch {
            labels: y_true.len(),
            probs: y_prob.len(),
        });
    }
    if y_true.is_empty() {
        return Err(CostError::EmptyLabelSet);
    }
    Ok(())
}

/// Expected cost of binarizing at `threshold`.
///
/// Defined for single-class label sets as well.
pub fn expected_cost(
    y_true: &[u8],
    y_prob: &[f64],
    threshold: f64,
    model: &CostModel,
) -> Result<f64, CostError> {
    check_lengths(y_true, y_prob)?;
    Ok(model.cost_of(&ConfusionCounts::at_threshold(y_true, y_prob, threshold)))
}

/// Cost of every candidate threshold, in declared order.
pub fn sweep(
    y_true: &[u8],
    y_prob: &[f64],
    model: &CostModel,
) -> Result<Vec<ThresholdCost>, CostError> {
    model.validate()?;
    check_lengths(y_true, y_prob)?;
    Ok(model
        .thresholds
        .par_iter()
        .map(|&threshold| {
            let counts = ConfusionCounts::at_threshold(y_true, y_prob, threshold);
            ThresholdCost {
                threshold,
                expected_cost: model.cost_of(&counts),
                counts,
            }
        })
        .collect())
}

/// Pick the cheapest row of a sweep; the first minimum wins.
pub fn best_of(rows: &[ThresholdCost]) -> Option<ThresholdDecision> {
    let mut best: Option<&ThresholdCost> = None;
    for row in rows {
        match best {
            Some(b) if row.expected_cost >= b.expected_cost => {}
            _ => best = Some(row),
        }
    }
    best.map(|b| ThresholdDecision {
        threshold: b.threshold,
        expected_cost: b.expected_cost,
    })
}

/// Select the cost-minimizing threshold on a labeled set.
pub fn select_threshold(
    y_true: &[u8],
    y_prob: &[f64],
    model: &CostModel,
) -> Result<ThresholdDecision, CostError> {
    let rows = sweep(y_true, y_prob, model)?;
    best_of(&rows).ok_or(CostError::NoThresholds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(thresholds: Vec<f64>, c_fp: f64, c_fn: f64) -> CostModel {
        CostModel {
            thresholds,
            c_fp,
            c_fn,
            c_tp: 0.0,
            c_tn: 0.0,
        }
    }

    #[test]
    fn test_inclusive_boundary() {
        let counts = ConfusionCounts::at_threshold(&[1, 0], &[0.5, 0.5], 0.5);
        assert_eq!(counts.tp, 1);
        assert_eq!(counts.fp, 1);
        assert_eq!(counts.total(), 2);
    }

    #[test]
    fn test_select_minimum() {
        let y = [0, 0, 1, 1, 1];
        let p = [0.1, 0.4, 0.35, 0.8, 0.9];
        let m = model(vec![0.2, 0.3, 0.5, 0.7], 1.0, 5.0);
        let decision = select_threshold(&y, &p, &m).unwrap();
        // t = 0.2 and t = 0.3 both give FP = 1 (0.4), FN = 0; 0.2 is listed first.
        assert_eq!(decision.threshold, 0.2);
        assert_eq!(decision.expected_cost, 1.0);
    }

    #[test]
    fn test_no_candidate_beats_selection() {
        let y = [0, 1, 0, 1, 1, 0, 0, 1, 0, 0];
        let p = [0.05, 0.9, 0.6, 0.4, 0.75, 0.3, 0.5, 0.55, 0.2, 0.1];
        let m = model((0..=20).map(|i| i as f64 / 20.0).collect(), 2.0, 3.0);
        let decision = select_threshold(&y, &p, &m).unwrap();
        for &t in &m.thresholds {
            assert!(decision.expected_cost <= expected_cost(&y, &p, t, &m).unwrap());
        }
    }

    #[test]
    fn test_first_minimum_wins() {
        // Every threshold above all probabilities costs the same.
        let y = [0, 0];
        let p = [0.1, 0.2];
        let m = model(vec![0.9, 0.5, 0.3], 1.0, 1.0);
        let decision = select_threshold(&y, &p, &m).unwrap();
        assert_eq!(decision.threshold, 0.9);
        assert_eq!(decision.expected_cost, 0.0);
    }

    #[test]
    fn test_cost_monotone_in_unit_costs() {
        let counts = ConfusionCounts {
            tp: 3,
            fp: 2,
            tn: 4,
            fn_: 1,
        };
        let mut previous = 0.0;
        for step in 0..5 {
            let c = step as f64;
            let cost = model(vec![0.5], c, c).cost_of(&counts);
            assert!(cost >= 0.0);
            assert!(cost >= previous);
            previous = cost;
        }
        let low = model(vec![0.5], 1.0, 1.0).cost_of(&counts);
        let high_fn = model(vec![0.5], 1.0, 4.0).cost_of(&counts);
        assert!(high_fn >= low);
    }

    #[test]
    fn test_single_class_cost_is_defined() {
        let m = model(vec![0.5], 1.0, 10.0);
        let decision = select_threshold(&[1, 1, 1], &[0.2, 0.7, 0.9], &m).unwrap();
        assert_eq!(decision.expected_cost, 10.0);
    }

    #[test]
    fn test_errors() {
        let m = model(vec![0.5], 1.0, 1.0);
        assert_eq!(select_threshold(&[], &[], &m), Err(CostError::EmptyLabelSet));
        assert_eq!(
            select_threshold(&[1], &[0.5], &model(vec![], 1.0, 1.0)),
            Err(CostError::NoThresholds)
        );
        assert_eq!(
            model(vec![1.5], 1.0, 1.0).validate(),
            Err(CostError::ThresholdOutOfRange(1.5))
        );
        assert!(matches!(
            model(vec![0.5], -1.0, 1.0).validate(),
            Err(CostError::InvalidCost { name: "c_fp", .. })
        ));
    }

    #[test]
    fn test_true_outcome_costs() {
        let m = CostModel {
            thresholds: vec![0.5],
            c_fp: 1.0,
            c_fn: 1.0,
            c_tp: 0.5,
            c_tn: 0.25,
        };
        let cost = expected_cost(&[1, 0], &[0.9, 0.1], 0.5, &m).unwrap();
        assert_eq!(cost, 0.75);
    }
}
