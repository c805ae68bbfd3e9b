//! Mean and population standard deviation across seed runs.
//!
//! Each metric is aggregated over the runs that reported it. A metric that is
//! missing (or undefined) in some runs is not imputed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use thiserror::Error;

/// Named metric values from one run.
pub type MetricRecord = BTreeMap<String, f64>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregateError {
    #[error("Empty run set: nothing to aggregate")]
    EmptyRunSet,
}

/// One `(experiment, seed)` execution and the metrics it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedRun {
    pub seed: u64,
    pub metrics: MetricRecord,
}

/// Mean and population std of one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeedAggregate {
    pub mean: f64,
    pub std: f64,
    /// Number of runs that reported the metric.
    pub n: usize,
}

/// Aggregate per-seed metric records into `{mean, std}` per metric.
///
/// The std of a single run is 0.
pub fn aggregate(
    runs: &[MetricRecord],
) -> Result<BTreeMap<String, SeedAggregate>, AggregateError> {
    if runs.is_empty() {
        return Err(AggregateError::EmptyRunSet);
    }

    let mut values: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for run in runs {
        for (name, &value) in run {
            if value.is_finite() {
                values.entry(name.as_str()).or_default().push(value);
            }
        }
    }

    Ok(values
        .into_iter()
        .map(|(name, vals)| {
            let n = vals.len();
            let mean = vals.iter().mean();
            let std = if n > 1 { vals.iter().population_std_dev() } else { 0.0 };
            (name.to_string(), SeedAggregate { mean, std, n })
        })
        .collect())
}

impl SeedRun {
    pub fn new(seed: u64, metrics: MetricRecord) -> Self {
        Self { seed, metrics }
    }

    /// Aggregate a list of runs by their metric records.
    pub fn aggregate_all(runs: &[SeedRun]) -> Result<BTreeMap<String, SeedAggregate>, AggregateError> {
        let records: Vec<MetricRecord> = runs.iter().map(|r| r.metrics.clone()).collect();
        aggregate(&records)
    }
}
