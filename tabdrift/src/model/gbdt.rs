//! Gradient-boosted decision stumps under logistic loss.
//!
//! Features are quantile-binned once before boosting. Each round fits one
//! depth-1 split by second-order gain on a seeded row subsample.

use ndarray::{Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::logistic::sigmoid;

const LAMBDA: f64 = 1.0;

/// Boosting hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbdtConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    /// Maximum number of quantile bins per feature.
    pub max_bins: usize,
    pub min_samples_leaf: usize,
    /// Fraction of rows sampled per round, in (0, 1].
    pub subsample: f64,
}

impl Default for GbdtConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_bins: 32,
            min_samples_leaf: 20,
            subsample: 1.0,
        }
    }
}

/// One depth-1 tree: `x[feature] <= threshold` goes left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stump {
    pub feature: usize,
    pub threshold: f64,
    pub left: f64,
    pub right: f64,
}

impl Stump {
    fn score(&self, row: &ArrayView1<f64>) -> f64 {
        if row[self.feature] <= self.threshold {
            self.left
        } else {
            self.right
        }
    }
}

/// Fitted ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedStumps {
    pub base_score: f64,
    pub stumps: Vec<Stump>,
}

struct Split {
    feature: usize,
    bin: usize,
    gain: f64,
    left: f64,
    right: f64,
}

impl GradientBoostedStumps {
    pub fn fit(x: &Array2<f64>, y: &[u8], config: &GbdtConfig, seed: u64) -> Self {
        let n = x.nrows();
        let prior = (y.iter().map(|&v| v as f64).sum::<f64>() / n as f64).clamp(1e-6, 1.0 - 1e-6);
        let base_score = (prior / (1.0 - prior)).ln();

        let edges: Vec<Vec<f64>> = x
            .axis_iter(Axis(1))
            .map(|column| quantile_edges(column, config.max_bins))
            .collect();
        let binned: Vec<Vec<usize>> = x
            .axis_iter(Axis(1))
            .zip(&edges)
            .map(|(column, cuts)| {
                column
                    .iter()
                    .map(|&v| cuts.partition_point(|&e| e < v))
                    .collect()
            })
            .collect();

        let n_sample = ((config.subsample.clamp(0.0, 1.0) * n as f64).round() as usize).clamp(1, n);
        let min_leaf = config.min_samples_leaf.max(1);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut raw = vec![base_score; n];
        let mut stumps = Vec::with_capacity(config.n_estimators);

        for round in 0..config.n_estimators {
            let rows: Vec<usize> = if n_sample < n {
                let mut picked = sample(&mut rng, n, n_sample).into_vec();
                picked.sort_unstable();
                picked
            } else {
                (0..n).collect()
            };

            let grad: Vec<f64> = raw.iter().zip(y).map(|(&r, &t)| sigmoid(r) - t as f64).collect();
            let hess: Vec<f64> = raw
                .iter()
                .map(|&r| {
                    let p = sigmoid(r);
                    p * (1.0 - p)
                })
                .collect();

            let Some(split) = best_split(&binned, &edges, &rows, &grad, &hess, min_leaf) else {
                debug!("Boosting stopped after {} rounds: no valid split", round);
                break;
            };

            let stump = Stump {
                feature: split.feature,
                threshold: edges[split.feature][split.bin],
                left: config.learning_rate * split.left,
                right: config.learning_rate * split.right,
            };
            for (i, r) in raw.iter_mut().enumerate() {
                *r += if binned[split.feature][i] <= split.bin {
                    stump.left
                } else {
                    stump.right
                };
            }
            stumps.push(stump);
        }

        Self { base_score, stumps }
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Vec<f64> {
        x.outer_iter()
            .map(|row| {
                sigmoid(self.base_score + self.stumps.iter().map(|s| s.score(&row)).sum::<f64>())
            })
            .collect()
    }
}

/// Distinct quantile cut points of `values`, ascending.
fn quantile_edges(values: ArrayView1<f64>, max_bins: usize) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let bins = max_bins.max(2);
    let mut edges: Vec<f64> = (1..bins)
        .map(|q| sorted[(q * sorted.len() / bins).min(sorted.len() - 1)])
        .collect();
    edges.dedup();
    edges
}

fn best_split(
    binned: &[Vec<usize>],
    edges: &[Vec<f64>],
    rows: &[usize],
    grad: &[f64],
    hess: &[f64],
    min_leaf: usize,
) -> Option<Split> {
    let g_total: f64 = rows.iter().map(|&i| grad[i]).sum();
    let h_total: f64 = rows.iter().map(|&i| hess[i]).sum();
    let parent = g_total * g_total / (h_total + LAMBDA);

    let mut best: Option<Split> = None;
    for (feature, bins) in binned.iter().enumerate() {
        let n_bins = edges[feature].len() + 1;
        let mut g = vec![0.0; n_bins];
        let mut h = vec![0.0; n_bins];
        let mut c = vec![0usize; n_bins];
        for &i in rows {
            let b = bins[i];
            g[b] += grad[i];
            h[b] += hess[i];
            c[b] += 1;
        }

        let (mut gl, mut hl, mut cl) = (0.0, 0.0, 0usize);
        for bin in 0..edges[feature].len() {
            gl += g[bin];
            hl += h[bin];
            cl += c[bin];
            let cr = rows.len() - cl;
            if cl < min_leaf || cr < min_leaf {
                continue;
            }
            let (gr, hr) = (g_total - gl, h_total - hl);
            let gain = gl * gl / (hl + LAMBDA) + gr * gr / (hr + LAMBDA) - parent;
            if gain > best.as_ref().map_or(1e-12, |s| s.gain) {
                best = Some(Split {
                    feature,
                    bin,
                    gain,
                    left: -gl / (hl + LAMBDA),
                    right: -gr / (hr + LAMBDA),
                });
            }
        }
    }
    best
}
