//! Calibration diagnostics: reliability bins and expected calibration error.
//!
//! `[0, 1]` is split into `n_bins` equal-width bins with edges `b / n_bins`.
//! Bins are half-open `[lo, hi)` except the last, which is closed so that a
//! probability of exactly 1.0 is counted. A probability is placed by
//! comparing it against the edges themselves, so one that equals an edge
//! always opens the bin above it. Empty bins are skipped. ECE weights each
//! non-empty bin by `bin_count / total_count`, where `total_count` is the
//! full sample size.

use serde::{Deserialize, Serialize};

use super::bootstrap::{bootstrap_ci, BootstrapConfig, ConfidenceInterval};
use super::discrimination::{check_inputs, MetricsError};

pub const DEFAULT_N_BINS: usize = 15;

/// One non-empty reliability bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub mean_predicted: f64,
    pub observed_fraction: f64,
}

/// Calibration summary for one scored set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub n_bins: usize,
    pub n_samples: usize,
    pub bins: Vec<CalibrationBin>,
    pub ece: f64,
    pub ece_ci: ConfidenceInterval,
}

impl CalibrationReport {
    /// Reliability bins, ECE, and a bootstrap interval for the ECE.
    pub fn compute(
        y_true: &[u8],
        y_prob: &[f64],
        n_bins: usize,
        bootstrap: &BootstrapConfig,
    ) -> Result<Self, MetricsError> {
        let bins = reliability_bins(y_true, y_prob, n_bins)?;
        let ece = ece_from_bins(&bins, y_true.len());
        let ece_ci = bootstrap_ci(
            y_true,
            y_prob,
            |y, p| expected_calibration_error(y, p, n_bins),
            bootstrap,
        )?;
        Ok(Self {
            n_bins,
            n_samples: y_true.len(),
            bins,
            ece,
            ece_ci,
        })
    }

    /// Mean predicted probability per non-empty bin.
    pub fn mean_predicted(&self) -> Vec<f64> {
        self.bins.iter().map(|b| b.mean_predicted).collect()
    }

    /// Observed positive fraction per non-empty bin.
    pub fn observed_fraction(&self) -> Vec<f64> {
        self.bins.iter().map(|b| b.observed_fraction).collect()
    }
}

/// Bin edges `0, 1/n, ..., 1`.
pub fn bin_edges(n_bins: usize) -> Vec<f64> {
    (0..=n_bins).map(|b| b as f64 / n_bins as f64).collect()
}

/// Index of the bin holding `p`, searched over `edges` from [`bin_edges`].
pub fn bin_index_in(p: f64, edges: &[f64]) -> usize {
    let last = edges.len().saturating_sub(2);
    edges.partition_point(|&e| e <= p).saturating_sub(1).min(last)
}

/// Index of the bin holding `p`.
pub fn bin_index(p: f64, n_bins: usize) -> usize {
    bin_index_in(p, &bin_edges(n_bins))
}

/// Non-empty reliability bins in ascending order.
pub fn reliability_bins(
    y_true: &[u8],
    y_prob: &[f64],
    n_bins: usize,
) -> Result<Vec<CalibrationBin>, MetricsError> {
    if n_bins == 0 {
        return Err(MetricsError::InvalidSetting("n_bins must be >= 1".to_string()));
    }
    check_inputs(y_true, y_prob)?;

    let edges = bin_edges(n_bins);
    let mut counts = vec![0usize; n_bins];
    let mut prob_sums = vec![0.0f64; n_bins];
    let mut pos_counts = vec![0usize; n_bins];

    for (&y, &p) in y_true.iter().zip(y_prob) {
        let idx = bin_index_in(p, &edges);
        counts[idx] += 1;
        prob_sums[idx] += p;
        pos_counts[idx] += y as usize;
    }

    Ok((0..n_bins)
        .filter(|&b| counts[b] > 0)
        .map(|b| CalibrationBin {
            lower: edges[b],
            upper: edges[b + 1],
            count: counts[b],
            mean_predicted: prob_sums[b] / counts[b] as f64,
            observed_fraction: pos_counts[b] as f64 / counts[b] as f64,
        })
        .collect())
}

/// Expected calibration error over equal-width bins.
pub fn expected_calibration_error(
    y_true: &[u8],
    y_prob: &[f64],
    n_bins: usize,
) -> Result<f64, MetricsError> {
    let bins = reliability_bins(y_true, y_prob, n_bins)?;
    Ok(ece_from_bins(&bins, y_true.len()))
}

fn ece_from_bins(bins: &[CalibrationBin], total: usize) -> f64 {
    bins.iter()
        .map(|b| (b.observed_fraction - b.mean_predicted).abs() * (b.count as f64 / total as f64))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_edges() {
        assert_eq!(bin_index(0.0, 10), 0);
        assert_eq!(bin_index(0.1, 10), 1);
        assert_eq!(bin_index(0.95, 10), 9);
        // Final bin is closed on the right.
        assert_eq!(bin_index(1.0, 10), 9);
    }

    #[test]
    fn test_values_on_an_edge_open_the_upper_bin() {
        assert_eq!(bin_index(0.3, 10), 3);
        assert_eq!(bin_index(0.7, 10), 7);
        for n_bins in [3, 7, 10, 15, 20] {
            let edges = bin_edges(n_bins);
            assert_eq!(edges.len(), n_bins + 1);
            assert_eq!(edges[n_bins], 1.0);
            for b in 1..n_bins {
                let edge = edges[b];
                let below = f64::from_bits(edge.to_bits() - 1);
                assert_eq!(bin_index(edge, n_bins), b, "edge {} of {}", b, n_bins);
                assert_eq!(bin_index(below, n_bins), b - 1, "below edge {} of {}", b, n_bins);
            }
        }
    }

    #[test]
    fn test_bin_bounds_are_the_edges() {
        let bins = reliability_bins(&[0, 1, 1], &[0.3, 0.3, 1.0], 10).unwrap();
        assert_eq!(bins.len(), 2);
        assert_eq!((bins[0].lower, bins[0].upper), (0.3, 0.4));
        assert_eq!(bins[0].count, 2);
        assert_eq!((bins[1].lower, bins[1].upper), (0.9, 1.0));
    }

    #[test]
    fn test_empty_bins_skipped() {
        let bins = reliability_bins(&[0, 1, 1], &[0.05, 0.92, 1.0], 10).unwrap();
        assert_eq!(bins.len(), 2);
        assert_eq!(bins[0].count, 1);
        assert_eq!(bins[1].count, 2);
        assert_eq!(bins[1].upper, 1.0);
        assert!((bins[1].mean_predicted - 0.96).abs() < 1e-12);
        assert_eq!(bins[1].observed_fraction, 1.0);
    }

    #[test]
    fn test_ece_known_value() {
        // Bin [0, 0.5): p = 0.2, 0.2 with y = 0, 1 -> |0.5 - 0.2| * 2/4
        // Bin [0.5, 1]: p = 0.8, 0.8 with y = 1, 1 -> |1.0 - 0.8| * 2/4
        let ece = expected_calibration_error(&[0, 1, 1, 1], &[0.2, 0.2, 0.8, 0.8], 2).unwrap();
        assert!((ece - (0.15 + 0.1)).abs() < 1e-12);
    }

    #[test]
    fn test_ece_perfect_calibration() {
        let ece = expected_calibration_error(&[0, 1], &[0.0, 1.0], 5).unwrap();
        assert_eq!(ece, 0.0);
    }

    #[test]
    fn test_ece_order_independent() {
        let y = [0, 1, 1, 0, 1, 0, 0, 1, 1, 0];
        let p = [0.1, 0.8, 0.65, 0.3, 0.9, 0.45, 0.05, 0.55, 0.7, 0.2];
        let base = expected_calibration_error(&y, &p, 5).unwrap();

        let perm = [9, 3, 0, 7, 1, 5, 8, 2, 6, 4];
        let y2: Vec<u8> = perm.iter().map(|&i| y[i]).collect();
        let p2: Vec<f64> = perm.iter().map(|&i| p[i]).collect();
        let permuted = expected_calibration_error(&y2, &p2, 5).unwrap();

        assert!((base - permuted).abs() < 1e-12);
    }

    #[test]
    fn test_zero_bins_rejected() {
        assert!(reliability_bins(&[0], &[0.5], 0).is_err());
    }

    #[test]
    fn test_report() {
        let y: Vec<u8> = (0..100).map(|i| u8::from(i % 3 == 0)).collect();
        let p: Vec<f64> = (0..100).map(|i| (i % 10) as f64 / 10.0).collect();
        let report = CalibrationReport::compute(&y, &p, 10, &BootstrapConfig::default()).unwrap();
        assert_eq!(report.n_samples, 100);
        assert_eq!(report.bins.iter().map(|b| b.count).sum::<usize>(), 100);
        assert!(report.ece_ci.lo <= report.ece_ci.hi);
        assert_eq!(report.mean_predicted().len(), report.observed_fraction().len());
    }
}
