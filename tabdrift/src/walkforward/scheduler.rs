//! Walk-forward scheduling.
//!
//! For each window: load slices, fit a fresh classifier on train, select the
//! cost-minimizing threshold on validation, then score the test bucket at that
//! threshold. Windows run sequentially and results come back in test-bucket
//! order.
//!
//! A window that fails to fit, select, or score is recorded as a
//! [`WindowFailure`] and the remaining windows still run. Missing partitions
//! and schema mismatches abort the whole run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use super::windows::{WalkForwardWindow, WalkForwardWindows};
use crate::aggregate::{aggregate, AggregateError, SeedAggregate};
use crate::cost::{expected_cost, select_threshold, CostError, CostModel};
use crate::data::{StoreError, TableSource, TimeBucket, TimePartitionedStore};
use crate::metrics::{DiscriminationMetrics, MetricsError};
use crate::model::{ModelError, ModelFactory};
use crate::report::RunObserver;

/// Default number of leading buckets before the first test bucket.
pub const DEFAULT_MIN_TRAIN: usize = 3;

#[derive(Error, Debug)]
pub enum WalkForwardError {
    #[error("Insufficient history: {available} buckets, need more than {min_train}")]
    InsufficientHistory { available: usize, min_train: usize },

    #[error("Invalid cost model: {0}")]
    InvalidCostModel(CostError),

    #[error("Fit failed for test bucket {test_bucket} (seed {seed}): {source}")]
    Fit {
        test_bucket: String,
        seed: u64,
        source: ModelError,
    },

    #[error(
        "Threshold selection failed on validation bucket {validation_bucket} \
         (test bucket {test_bucket}): {source}"
    )]
    Threshold {
        test_bucket: String,
        validation_bucket: String,
        source: CostError,
    },

    #[error("Expected cost failed on test bucket {test_bucket}: {source}")]
    TestCost {
        test_bucket: String,
        source: CostError,
    },

    #[error("Scoring failed for test bucket {test_bucket}: {source}")]
    Metrics {
        test_bucket: String,
        source: MetricsError,
    },

    #[error("{failed} of {total} windows failed; first at test bucket {test_bucket}: {error}")]
    WindowsFailed {
        failed: usize,
        total: usize,
        test_bucket: String,
        error: String,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Aggregation error: {0}")]
    Aggregate(#[from] AggregateError),
}

impl WalkForwardError {
    /// Failures confined to one window. Anything else aborts the run.
    pub fn is_window_local(&self) -> bool {
        matches!(
            self,
            Self::Fit { .. } | Self::Threshold { .. } | Self::TestCost { .. } | Self::Metrics { .. }
        )
    }
}

/// One walk-forward step. Undefined metrics serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowResult {
    pub test_bucket: TimeBucket,
    pub validation_bucket: TimeBucket,
    pub train_buckets: Vec<TimeBucket>,
    pub selected_threshold: f64,
    /// Expected cost of the selected threshold on the validation bucket.
    pub validation_cost: f64,
    pub metrics: DiscriminationMetrics,
    /// Expected cost on the test bucket at the selected threshold.
    pub expected_cost: f64,
    pub test_row_count: usize,
}

impl WindowResult {
    /// Defined metrics plus threshold, cost, and row count, keyed by name.
    pub fn metric_record(&self) -> BTreeMap<String, f64> {
        let mut record = self.metrics.to_map();
        record.insert("best_threshold".to_string(), self.selected_threshold);
        record.insert("expected_cost".to_string(), self.expected_cost);
        record.insert("n_test".to_string(), self.test_row_count as f64);
        record
    }
}

/// A window that could not be completed, kept in place of its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowFailure {
    pub test_bucket: TimeBucket,
    pub validation_bucket: TimeBucket,
    pub train_buckets: Vec<TimeBucket>,
    pub seed: u64,
    pub error: String,
}

impl WindowFailure {
    fn new(window: &WalkForwardWindow, seed: u64, err: &WalkForwardError) -> Self {
        Self {
            test_bucket: window.test_bucket.clone(),
            validation_bucket: window.validation_bucket.clone(),
            train_buckets: window.train_buckets.clone(),
            seed,
            error: err.to_string(),
        }
    }
}

/// Completed and failed windows of one run, each in test-bucket order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollingRun {
    pub results: Vec<WindowResult>,
    pub failures: Vec<WindowFailure>,
}

impl RollingRun {
    pub fn window_count(&self) -> usize {
        self.results.len() + self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// `WindowsFailed` naming the first failed test bucket, if any window failed.
    pub fn ensure_complete(&self) -> Result<(), WalkForwardError> {
        match self.failures.first() {
            None => Ok(()),
            Some(first) => Err(WalkForwardError::WindowsFailed {
                failed: self.failures.len(),
                total: self.window_count(),
                test_bucket: first.test_bucket.to_string(),
                error: first.error.clone(),
            }),
        }
    }

    /// Completed results, provided no window failed.
    pub fn into_complete(self) -> Result<Vec<WindowResult>, WalkForwardError> {
        self.ensure_complete()?;
        Ok(self.results)
    }
}

/// Walk-forward evaluation over time buckets.
pub struct WalkForwardScheduler {
    cost_model: CostModel,
    min_train: usize,
    seed: u64,
}

impl WalkForwardScheduler {
    /// Create a new scheduler.
    pub fn new(cost_model: CostModel) -> Self {
        Self {
            cost_model,
            min_train: DEFAULT_MIN_TRAIN,
            seed: 42,
        }
    }

    /// Set the number of buckets before the first test bucket.
    pub fn with_min_train(mut self, min_train: usize) -> Self {
        self.min_train = min_train;
        self
    }

    /// Set the seed passed to every model build.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Windows for `buckets`, without running anything.
    pub fn plan(&self, buckets: &[TimeBucket]) -> Result<Vec<WalkForwardWindow>, WalkForwardError> {
        WalkForwardWindows::new(buckets.to_vec(), self.min_train).generate()
    }

    /// Run every window over all buckets the store holds.
    pub fn run_available<S: TableSource>(
        &self,
        store: &TimePartitionedStore<S>,
        factory: &dyn ModelFactory,
        observer: Option<&dyn RunObserver>,
    ) -> Result<RollingRun, WalkForwardError> {
        let buckets = store.available_buckets()?;
        self.run(store, &buckets, factory, observer)
    }

    /// Run every window over `buckets`, in order.
    ///
    /// Fails before fitting anything if the bucket list is unordered or too
    /// short, or if the cost model is invalid. Window-local failures are
    /// collected in the returned run; store errors abort it.
    pub fn run<S: TableSource>(
        &self,
        store: &TimePartitionedStore<S>,
        buckets: &[TimeBucket],
        factory: &dyn ModelFactory,
        observer: Option<&dyn RunObserver>,
    ) -> Result<RollingRun, WalkForwardError> {
        self.cost_model
            .validate()
            .map_err(WalkForwardError::InvalidCostModel)?;
        let windows = self.plan(buckets)?;

        info!(
            "Generated {} walk-forward windows over {} buckets (min_train = {}, seed = {})",
            windows.len(),
            buckets.len(),
            self.min_train,
            self.seed
        );
        if let Some(obs) = observer {
            obs.on_run_start(
                "rolling",
                &json!({
                    "seed": self.seed,
                    "min_train": self.min_train,
                    "windows": windows.len(),
                    "c_fp": self.cost_model.c_fp,
                    "c_fn": self.cost_model.c_fn,
                }),
            );
        }

        let mut run = RollingRun::default();
        for window in &windows {
            info!(
                "Processing window {}/{}: train {:?}, validate {}, test {}",
                window.window_num,
                windows.len(),
                window.train_buckets.iter().map(TimeBucket::as_str).collect::<Vec<_>>(),
                window.validation_bucket,
                window.test_bucket
            );

            let result = match self.run_window(store, window, factory) {
                Ok(result) => result,
                Err(e) if e.is_window_local() => {
                    error!("  Window {}/{} failed: {}", window.window_num, windows.len(), e);
                    run.failures.push(WindowFailure::new(window, self.seed, &e));
                    continue;
                }
                Err(e) => return Err(e),
            };

            info!(
                "  Window {}/{} complete: threshold = {}, test cost = {:.2}, roc_auc = {}",
                window.window_num,
                windows.len(),
                result.selected_threshold,
                result.expected_cost,
                result
                    .metrics
                    .roc_auc
                    .map_or_else(|| "undefined".to_string(), |v| format!("{:.4}", v))
            );
            if let Some(obs) = observer {
                obs.on_metrics(window.window_num, &result.metric_record());
            }
            run.results.push(result);
        }

        if !run.is_complete() {
            warn!("{} of {} windows failed", run.failures.len(), windows.len());
        }
        if let Some(obs) = observer {
            obs.on_run_end("rolling");
        }
        Ok(run)
    }

    /// Fit, select, and score one window.
    pub fn run_window<S: TableSource>(
        &self,
        store: &TimePartitionedStore<S>,
        window: &WalkForwardWindow,
        factory: &dyn ModelFactory,
    ) -> Result<WindowResult, WalkForwardError> {
        let test_id = window.test_bucket.to_string();
        if window.is_collapsed() {
            warn!(
                "Window {}: training and validation share bucket {}; threshold selection is in-sample",
                test_id, window.validation_bucket
            );
        }

        let train = store.load(&window.train_buckets)?;
        let valid = store.load(std::slice::from_ref(&window.validation_bucket))?;
        let test = store.load(std::slice::from_ref(&window.test_bucket))?;

        let fit_error = |source| WalkForwardError::Fit {
            test_bucket: test_id.clone(),
            seed: self.seed,
            source,
        };

        let mut model = factory.build(&train.features.schema(), self.seed);
        model.fit(&train.features, &train.labels).map_err(fit_error)?;
        let p_valid = model.predict_proba(&valid.features).map_err(fit_error)?;
        let p_test = model.predict_proba(&test.features).map_err(fit_error)?;

        let decision = select_threshold(&valid.labels, &p_valid, &self.cost_model).map_err(
            |source| WalkForwardError::Threshold {
                test_bucket: test_id.clone(),
                validation_bucket: window.validation_bucket.to_string(),
                source,
            },
        )?;
        let test_cost = expected_cost(&test.labels, &p_test, decision.threshold, &self.cost_model)
            .map_err(|source| WalkForwardError::TestCost {
                test_bucket: test_id.clone(),
                source,
            })?;

        let metrics = DiscriminationMetrics::compute(&test.labels, &p_test).map_err(|source| {
            WalkForwardError::Metrics {
                test_bucket: test_id.clone(),
                source,
            }
        })?;
        if test.is_single_class() {
            warn!("Test bucket {} is single-class; ranking metrics undefined", test_id);
        }

        Ok(WindowResult {
            test_bucket: window.test_bucket.clone(),
            validation_bucket: window.validation_bucket.clone(),
            train_buckets: window.train_buckets.clone(),
            selected_threshold: decision.threshold,
            validation_cost: decision.expected_cost,
            metrics,
            expected_cost: test_cost,
            test_row_count: test.len(),
        })
    }
}

/// Mean and std of each window metric across the result log.
pub fn summarize_windows(
    results: &[WindowResult],
) -> Result<BTreeMap<String, SeedAggregate>, WalkForwardError> {
    let records: Vec<BTreeMap<String, f64>> = results.iter().map(WindowResult::metric_record).collect();
    Ok(aggregate(&records)?)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::data::{FeatureColumn, FeatureFrame, FeatureSchema, MemorySource, Table};
    use crate::model::Classifier;

    /// Scores rows by their `score` column as-is; fails on single-class labels.
    struct PassThrough {
        fitted: bool,
    }

    impl Classifier for PassThrough {
        fn fit(&mut self, _features: &FeatureFrame, labels: &[u8]) -> Result<(), ModelError> {
            let pos = labels.iter().filter(|&&y| y == 1).count();
            if pos == 0 || pos == labels.len() {
                return Err(ModelError::SingleClass(labels[0]));
            }
            self.fitted = true;
            Ok(())
        }

        fn predict_proba(&self, features: &FeatureFrame) -> Result<Vec<f64>, ModelError> {
            if !self.fitted {
                return Err(ModelError::NotFitted);
            }
            match features.column("score") {
                Some(FeatureColumn::Numeric(v)) => Ok(v.iter().map(|x| x.unwrap_or(0.5)).collect()),
                _ => Err(ModelError::MissingFeature("score".to_string())),
            }
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        builds: AtomicUsize,
    }

    impl ModelFactory for CountingFactory {
        fn build(&self, _schema: &FeatureSchema, _seed: u64) -> Box<dyn Classifier> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Box::new(PassThrough { fitted: false })
        }
    }

    fn table(bucket: &str, scores: &[f64], labels: &[u8]) -> Table {
        let features = FeatureFrame::from_columns(
            scores.len(),
            vec![(
                "score".to_string(),
                FeatureColumn::Numeric(scores.iter().copied().map(Some).collect()),
            )],
        )
        .unwrap();
        Table::new(TimeBucket::new(bucket).unwrap(), features, labels.to_vec()).unwrap()
    }

    fn store() -> TimePartitionedStore<MemorySource> {
        let mut source = MemorySource::new();
        for bucket in ["202301", "202302", "202303", "202304"] {
            source.insert(table(bucket, &[0.1, 0.4, 0.6, 0.9], &[0, 0, 1, 1]));
        }
        TimePartitionedStore::new(source)
    }

    fn cost_model() -> CostModel {
        CostModel {
            thresholds: vec![0.3, 0.5, 0.7],
            c_fp: 1.0,
            c_fn: 5.0,
            c_tp: 0.0,
            c_tn: 0.0,
        }
    }

    #[test]
    fn test_two_windows_in_order() {
        let factory = CountingFactory::default();
        let scheduler = WalkForwardScheduler::new(cost_model()).with_min_train(2);
        let results = scheduler
            .run_available(&store(), &factory, None)
            .unwrap()
            .into_complete()
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].test_bucket.as_str(), "202303");
        assert_eq!(results[1].test_bucket.as_str(), "202304");
        assert_eq!(results[0].validation_bucket.as_str(), "202302");
        // A fresh model per window.
        assert_eq!(factory.builds.load(Ordering::SeqCst), 2);

        let first = &results[0];
        assert_eq!(first.selected_threshold, 0.5);
        assert_eq!(first.expected_cost, 0.0);
        assert_eq!(first.metrics.roc_auc, Some(1.0));
        assert_eq!(first.test_row_count, 4);
    }

    #[test]
    fn test_single_class_test_bucket_is_undefined() {
        let mut source = MemorySource::new();
        source.insert(table("202301", &[0.2, 0.8], &[0, 1]));
        source.insert(table("202302", &[0.2, 0.8], &[0, 1]));
        source.insert(table("202303", &[0.3, 0.7], &[0, 0]));
        let store = TimePartitionedStore::new(source);

        let results = WalkForwardScheduler::new(cost_model())
            .with_min_train(2)
            .run_available(&store, &CountingFactory::default(), None)
            .unwrap()
            .into_complete()
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metrics.roc_auc, None);
        assert_eq!(results[0].metrics.pr_auc, None);
        assert!(results[0].metrics.brier.is_some());
        // Threshold 0.3 is the first zero-cost candidate on validation; both
        // test rows become false positives.
        assert_eq!(results[0].selected_threshold, 0.3);
        assert_eq!(results[0].expected_cost, 2.0);
    }

    #[test]
    fn test_fit_failure_names_coordinate() {
        let mut source = MemorySource::new();
        source.insert(table("202301", &[0.2, 0.8], &[1, 1]));
        source.insert(table("202302", &[0.2, 0.8], &[0, 1]));
        source.insert(table("202303", &[0.2, 0.8], &[0, 1]));
        let store = TimePartitionedStore::new(source);

        let run = WalkForwardScheduler::new(cost_model())
            .with_min_train(2)
            .with_seed(43)
            .run_available(&store, &CountingFactory::default(), None)
            .unwrap();

        assert!(run.results.is_empty());
        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.failures[0].test_bucket.as_str(), "202303");
        assert_eq!(run.failures[0].seed, 43);
        assert!(run.failures[0].error.contains("seed 43"));

        match run.into_complete().unwrap_err() {
            WalkForwardError::WindowsFailed { failed, total, test_bucket, .. } => {
                assert_eq!((failed, total), (1, 1));
                assert_eq!(test_bucket, "202303");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_empty_test_bucket_keeps_sibling_windows() {
        let mut source = MemorySource::new();
        for bucket in ["202301", "202302", "202303", "202304"] {
            source.insert(table(bucket, &[0.2, 0.8], &[0, 1]));
        }
        source.insert(table("202305", &[], &[]));
        let store = TimePartitionedStore::new(source);

        let run = WalkForwardScheduler::new(cost_model())
            .with_min_train(2)
            .run_available(&store, &CountingFactory::default(), None)
            .unwrap();

        let done: Vec<&str> = run.results.iter().map(|r| r.test_bucket.as_str()).collect();
        assert_eq!(done, vec!["202303", "202304"]);
        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.failures[0].test_bucket.as_str(), "202305");
        assert_eq!(
            run.failures[0].error,
            "Expected cost failed on test bucket 202305: Empty label set"
        );

        let err = run.ensure_complete().unwrap_err();
        assert!(matches!(
            err,
            WalkForwardError::WindowsFailed { failed: 1, total: 3, ref test_bucket, .. }
                if test_bucket == "202305"
        ));
    }

    #[test]
    fn test_empty_validation_bucket_is_isolated() {
        let mut source = MemorySource::new();
        for bucket in ["202301", "202302", "202304", "202305"] {
            source.insert(table(bucket, &[0.2, 0.8], &[0, 1]));
        }
        source.insert(table("202303", &[], &[]));
        let store = TimePartitionedStore::new(source);
        let factory = CountingFactory::default();

        let run = WalkForwardScheduler::new(cost_model())
            .with_min_train(2)
            .run_available(&store, &factory, None)
            .unwrap();

        // 202303 is empty as a test bucket, then as the validation bucket.
        let failed: Vec<&str> = run.failures.iter().map(|f| f.test_bucket.as_str()).collect();
        assert_eq!(failed, vec!["202303", "202304"]);
        assert!(run.failures[1].error.contains("validation bucket 202303"));
        assert_eq!(run.results.len(), 1);
        assert_eq!(run.results[0].test_bucket.as_str(), "202305");
        assert_eq!(run.results[0].test_row_count, 2);
        assert_eq!(factory.builds.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_insufficient_history_before_fitting() {
        let factory = CountingFactory::default();
        let result = WalkForwardScheduler::new(cost_model())
            .with_min_train(4)
            .run_available(&store(), &factory, None);
        assert!(matches!(
            result,
            Err(WalkForwardError::InsufficientHistory { available: 4, min_train: 4 })
        ));
        assert_eq!(factory.builds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_partition_is_fatal() {
        let buckets = TimeBucket::parse_all(["202301", "202302", "202309"]).unwrap();
        let result = WalkForwardScheduler::new(cost_model())
            .with_min_train(2)
            .run(&store(), &buckets, &CountingFactory::default(), None);
        assert!(matches!(
            result,
            Err(WalkForwardError::Store(StoreError::MissingPartition(_)))
        ));
    }

    #[test]
    fn test_summarize_windows() {
        let run = WalkForwardScheduler::new(cost_model())
            .with_min_train(2)
            .run_available(&store(), &CountingFactory::default(), None)
            .unwrap();
        let summary = summarize_windows(&run.results).unwrap();
        assert_eq!(summary["roc_auc"].n, 2);
        assert_eq!(summary["roc_auc"].std, 0.0);
        assert!(summarize_windows(&[]).is_err());
    }
}
