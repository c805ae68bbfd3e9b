//! L2-regularized logistic regression trained by mini-batch gradient descent.

use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Logistic regression hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticConfig {
    /// Inverse regularization strength. The L2 penalty is `1 / c`.
    #[serde(alias = "C")]
    pub c: f64,
    /// Passes over the training rows.
    pub max_iter: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
}

impl Default for LogisticConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 200,
            learning_rate: 0.1,
            batch_size: 256,
        }
    }
}

/// Fitted coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub weights: Vec<f64>,
    pub intercept: f64,
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

impl LogisticRegression {
    /// Fit on `x` and 0/1 labels `y`. Row order is shuffled each epoch with
    /// a generator seeded from `seed`.
    pub fn fit(x: &Array2<f64>, y: &[u8], config: &LogisticConfig, seed: u64) -> Self {
        let (n, d) = x.dim();
        let mut weights = Array1::<f64>::zeros(d);
        let mut intercept = 0.0;

        let batch_size = config.batch_size.max(1);
        let decay = config.learning_rate / (config.c * n as f64);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..n).collect();
        let mut grad = Array1::<f64>::zeros(d);

        for _ in 0..config.max_iter {
            order.shuffle(&mut rng);
            for batch in order.chunks(batch_size) {
                grad.fill(0.0);
                let mut grad_b = 0.0;
                for &i in batch {
                    let row = x.row(i);
                    let err = sigmoid(row.dot(&weights) + intercept) - y[i] as f64;
                    grad.scaled_add(err, &row);
                    grad_b += err;
                }
                let scale = config.learning_rate / batch.len() as f64;
                weights *= 1.0 - decay;
                weights.scaled_add(-scale, &grad);
                intercept -= scale * grad_b;
            }
        }

        Self {
            weights: weights.to_vec(),
            intercept,
        }
    }

    /// Positive-class probability per row.
    pub fn predict_proba(&self, x: &Array2<f64>) -> Vec<f64> {
        x.dot(&ArrayView1::from(self.weights.as_slice()))
            .iter()
            .map(|z| sigmoid(z + self.intercept))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FeatureColumn, FeatureFrame};
    use crate::model::preprocess::Preprocessor;

    fn separable() -> (Array2<f64>, Vec<u8>) {
        let values: Vec<Option<f64>> = (0..40).map(|i| Some(i as f64)).collect();
        let labels: Vec<u8> = (0..40).map(|i| u8::from(i >= 20)).collect();
        let frame = FeatureFrame::from_columns(
            40,
            vec![("trip_distance".to_string(), FeatureColumn::Numeric(values))],
        )
        .unwrap();
        let pre = Preprocessor::fit(&frame, &frame.schema()).unwrap();
        (pre.transform(&frame).unwrap(), labels)
    }

    #[test]
    fn test_sigmoid_bounds() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(800.0) <= 1.0);
        assert!(sigmoid(-800.0) >= 0.0);
    }

    #[test]
    fn test_learns_separable_signal() {
        let (x, y) = separable();
        let model = LogisticRegression::fit(&x, &y, &LogisticConfig::default(), 42);
        assert!(model.weights[0] > 0.0);
        let p = model.predict_proba(&x);
        assert!(p[0] < 0.5);
        assert!(p[39] > 0.5);
    }

    #[test]
    fn test_same_seed_same_model() {
        let (x, y) = separable();
        let config = LogisticConfig {
            batch_size: 7,
            max_iter: 20,
            ..LogisticConfig::default()
        };
        let a = LogisticRegression::fit(&x, &y, &config, 3);
        let b = LogisticRegression::fit(&x, &y, &config, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_matrix_scores_nothing() {
        let (x, y) = separable();
        let model = LogisticRegression::fit(&x, &y, &LogisticConfig::default(), 42);
        assert!(model.predict_proba(&Array2::zeros((0, 1))).is_empty());
    }

    #[test]
    fn test_stronger_penalty_shrinks_weights() {
        let (x, y) = separable();
        let loose = LogisticRegression::fit(&x, &y, &LogisticConfig::default(), 1);
        let tight = LogisticRegression::fit(
            &x,
            &y,
            &LogisticConfig {
                c: 0.01,
                ..LogisticConfig::default()
            },
            1,
        );
        assert!(tight.weights[0].abs() < loose.weights[0].abs());
    }
}
