//! Walk-forward window generation.
//!
//! Expanding windows over an ordered bucket list. For step `i` (from
//! `min_train` to `K - 1`) the test bucket is `b_i`, the validation bucket is
//! `b_{i-1}`, and training covers `b_0 .. b_{i-2}`. With a single prior
//! bucket, training and validation are the same bucket.

use serde::{Deserialize, Serialize};

use super::scheduler::WalkForwardError;
use crate::data::TimeBucket;

/// A single walk-forward window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkForwardWindow {
    /// Window number (1-indexed).
    pub window_num: usize,
    /// Training buckets, oldest first.
    pub train_buckets: Vec<TimeBucket>,
    /// Most recent bucket before the test bucket.
    pub validation_bucket: TimeBucket,
    /// Held-out bucket.
    pub test_bucket: TimeBucket,
}

impl WalkForwardWindow {
    /// True when training and validation use the same bucket.
    pub fn is_collapsed(&self) -> bool {
        self.train_buckets.len() == 1 && self.train_buckets[0] == self.validation_bucket
    }
}

/// Generator for walk-forward windows.
pub struct WalkForwardWindows {
    buckets: Vec<TimeBucket>,
    min_train: usize,
}

impl WalkForwardWindows {
    /// Create a window generator. `min_train` is the index of the first test bucket.
    pub fn new(buckets: Vec<TimeBucket>, min_train: usize) -> Self {
        Self { buckets, min_train }
    }

    /// Number of windows the bucket list supports.
    pub fn expected_windows(&self) -> usize {
        self.buckets.len().saturating_sub(self.min_train.max(1))
    }

    /// Generate all windows in test-bucket order.
    ///
    /// Fails with `UnorderedBuckets` if the buckets are not strictly increasing,
    /// and with `InsufficientHistory` if no window can be formed.
    pub fn generate(&self) -> Result<Vec<WalkForwardWindow>, WalkForwardError> {
        TimeBucket::validate_sequence(&self.buckets)?;

        // A test bucket needs at least one prior bucket.
        let first = self.min_train.max(1);
        if self.buckets.len() <= first {
            return Err(WalkForwardError::InsufficientHistory {
                available: self.buckets.len(),
                min_train: self.min_train,
            });
        }

        Ok((first..self.buckets.len())
            .enumerate()
            .map(|(idx, i)| {
                let candidate = &self.buckets[..i];
                let validation_bucket = candidate[candidate.len() - 1].clone();
                let train_buckets = if candidate.len() > 1 {
                    candidate[..candidate.len() - 1].to_vec()
                } else {
                    candidate.to_vec()
                };
                WalkForwardWindow {
                    window_num: idx + 1,
                    train_buckets,
                    validation_bucket,
                    test_bucket: self.buckets[i].clone(),
                }
            })
            .collect())
    }
}
