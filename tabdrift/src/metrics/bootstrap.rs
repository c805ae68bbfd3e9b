//! Percentile bootstrap confidence intervals.
//!
//! Each resample draws `n` row indices with replacement. Per-resample seeds
//! are taken sequentially from one seeded generator, so the evaluation can run
//! in parallel and still produce the same interval for a given seed.
//!
//! The interval bounds are index-based quantiles of the sorted resample values:
//! `floor(alpha/2 * B)` and `floor((1 - alpha/2) * B) - 1`, clipped into range.
//! This is an approximation that relies on `B` being reasonably large.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::discrimination::{check_inputs, cmp_f64, MetricsError};

/// A two-sided bootstrap interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lo: f64,
    pub hi: f64,
    pub alpha: f64,
    /// Resamples requested.
    pub n_boot: usize,
    /// Resamples on which the statistic was defined.
    pub n_valid: usize,
}

impl ConfidenceInterval {
    pub fn contains(&self, value: f64) -> bool {
        self.lo <= value && value <= self.hi
    }

    pub fn width(&self) -> f64 {
        self.hi - self.lo
    }
}

/// Bootstrap settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub n_boot: usize,
    pub alpha: f64,
    pub seed: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            n_boot: 200,
            alpha: 0.05,
            seed: 42,
        }
    }
}

impl BootstrapConfig {
    pub fn validate(&self) -> Result<(), MetricsError> {
        if self.n_boot == 0 {
            return Err(MetricsError::InvalidSetting("n_boot must be >= 1".to_string()));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(MetricsError::InvalidSetting(format!(
                "alpha must be in (0, 1), got {}",
                self.alpha
            )));
        }
        Ok(())
    }
}

/// Lower and upper quantile indices into `n` sorted values.
pub fn quantile_indices(n: usize, alpha: f64) -> (usize, usize) {
    let last = n.saturating_sub(1) as i64;
    let lo = ((alpha / 2.0) * n as f64).floor() as i64;
    let hi = ((1.0 - alpha / 2.0) * n as f64).floor() as i64 - 1;
    (lo.clamp(0, last) as usize, hi.clamp(0, last) as usize)
}

/// Bootstrap interval for `statistic` over `(y_true, y_prob)`.
///
/// Resamples where the statistic is undefined (`DegenerateLabelSet`, e.g. a
/// single-class draw for ROC AUC) are dropped and the quantiles are taken over
/// the remaining values. If every resample is undefined the error is returned.
pub fn bootstrap_ci<F>(
    y_true: &[u8],
    y_prob: &[f64],
    statistic: F,
    config: &BootstrapConfig,
) -> Result<ConfidenceInterval, MetricsError>
where
    F: Fn(&[u8], &[f64]) -> Result<f64, MetricsError> + Sync,
{
    config.validate()?;
    check_inputs(y_true, y_prob)?;

    let n = y_true.len();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let seeds: Vec<u64> = (0..config.n_boot).map(|_| rng.gen()).collect();

    let draws: Vec<Result<Option<f64>, MetricsError>> = seeds
        .par_iter()
        .map(|&seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut ys = Vec::with_capacity(n);
            let mut ps = Vec::with_capacity(n);
            for _ in 0..n {
                let idx = rng.gen_range(0..n);
                ys.push(y_true[idx]);
                ps.push(y_prob[idx]);
            }
            match statistic(&ys, &ps) {
                Ok(v) => Ok(Some(v)),
                Err(MetricsError::DegenerateLabelSet { .. }) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .collect();

    let mut values = Vec::with_capacity(config.n_boot);
    for draw in draws {
        if let Some(v) = draw? {
            values.push(v);
        }
    }

    if values.is_empty() {
        return Err(MetricsError::DegenerateLabelSet {
            metric: "bootstrap",
            detail: format!("statistic undefined on all {} resamples", config.n_boot),
        });
    }

    values.sort_by(cmp_f64);
    let (lo, hi) = quantile_indices(values.len(), config.alpha);

    Ok(ConfidenceInterval {
        lo: values[lo],
        hi: values[hi],
        alpha: config.alpha,
        n_boot: config.n_boot,
        n_valid: values.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::discrimination::{brier_score, roc_auc};

    fn synthetic(n: usize, seed: u64) -> (Vec<u8>, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut ys = Vec::with_capacity(n);
        let mut ps = Vec::with_capacity(n);
        for _ in 0..n {
            let p: f64 = rng.gen();
            ys.push(u8::from(rng.gen::<f64>() < p));
            ps.push(p);
        }
        (ys, ps)
    }

    #[test]
    fn test_quantile_indices() {
        assert_eq!(quantile_indices(200, 0.05), (5, 194));
        assert_eq!(quantile_indices(1, 0.05), (0, 0));
        assert_eq!(quantile_indices(10, 0.5), (2, 6));
    }

    #[test]
    fn test_bootstrap_is_deterministic() {
        let (y, p) = synthetic(300, 7);
        let config = BootstrapConfig::default();
        let a = bootstrap_ci(&y, &p, brier_score, &config).unwrap();
        let b = bootstrap_ci(&y, &p, brier_score, &config).unwrap();
        assert_eq!(a, b);
        assert!(a.lo <= a.hi);
        assert_eq!(a.n_valid, 200);
    }

    #[test]
    fn test_point_estimate_inside_interval() {
        let (y, p) = synthetic(500, 11);
        let point = brier_score(&y, &p).unwrap();
        let ci = bootstrap_ci(&y, &p, brier_score, &BootstrapConfig::default()).unwrap();
        assert!(ci.contains(point), "{:?} does not contain {}", ci, point);
    }

    #[test]
    fn test_coverage_approaches_nominal() {
        // E[(p - y)^2] = E[p(1 - p)] = 1/6 for p ~ U(0, 1), y ~ Bernoulli(p).
        let truth = 1.0 / 6.0;
        let trials = 60;
        let mut covered = 0;
        for trial in 0..trials {
            let (y, p) = synthetic(400, 1_000 + trial);
            let config = BootstrapConfig {
                n_boot: 200,
                alpha: 0.05,
                seed: trial,
            };
            let ci = bootstrap_ci(&y, &p, brier_score, &config).unwrap();
            if ci.contains(truth) {
                covered += 1;
            }
        }
        let coverage = covered as f64 / trials as f64;
        assert!(coverage >= 0.85, "coverage {}", coverage);
    }

    #[test]
    fn test_degenerate_resamples_are_dropped() {
        // One positive in 20 rows: some resamples miss it entirely.
        let mut y = vec![0u8; 20];
        y[3] = 1;
        let p: Vec<f64> = (0..20).map(|i| i as f64 / 20.0).collect();
        let ci = bootstrap_ci(&y, &p, roc_auc, &BootstrapConfig::default()).unwrap();
        assert!(ci.n_valid < ci.n_boot);
        assert!(ci.n_valid > 0);
    }

    #[test]
    fn test_all_degenerate_fails() {
        let y = vec![0u8; 10];
        let p = vec![0.3; 10];
        assert!(matches!(
            bootstrap_ci(&y, &p, roc_auc, &BootstrapConfig::default()),
            Err(MetricsError::DegenerateLabelSet { .. })
        ));
    }

    #[test]
    fn test_invalid_settings() {
        let (y, p) = synthetic(10, 1);
        let config = BootstrapConfig {
            n_boot: 0,
            ..BootstrapConfig::default()
        };
        assert!(bootstrap_ci(&y, &p, brier_score, &config).is_err());
    }
}
