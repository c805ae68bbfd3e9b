//! Fixed-split experiments.
//!
//! - `train`: fit one model per seed on the train buckets, score the
//!   validation buckets, persist the model
//! - `evaluate`: reload each seed's model, score the test buckets, sweep the
//!   cost thresholds, aggregate across seeds
//! - `calibrate`: reliability bins and ECE with a bootstrap interval for one
//!   saved (seed, model) pair
//!
//! Seeds are fitted in parallel. Artifacts are written afterwards in seed order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

use crate::aggregate::{AggregateError, SeedAggregate, SeedRun};
use crate::config::EvalConfig;
use crate::cost::{best_of, sweep, CostError, CostModel, ThresholdCost};
use crate::data::{ParquetDir, StoreError, TableSource, TimeBucket, TimePartitionedStore};
use crate::metrics::{BootstrapConfig, CalibrationReport, DiscriminationMetrics, MetricsError};
use crate::model::{model_path, Classifier, FittedPipeline, ModelError, ModelKind, PipelineFactory};
use crate::report::{ArtifactError, ArtifactStore, RunObserver};

#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("No seeds given")]
    NoSeeds,

    #[error("Invalid cost model: {0}")]
    InvalidCostModel(CostError),

    #[error("Model error for seed {seed}: {source}")]
    Model { seed: u64, source: ModelError },

    #[error("Scoring failed for seed {seed}: {source}")]
    Metrics { seed: u64, source: MetricsError },

    #[error("Threshold sweep failed for seed {seed}: {source}")]
    Cost { seed: u64, source: CostError },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Aggregation error: {0}")]
    Aggregate(#[from] AggregateError),
}

/// Test-split scores of one model for one seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestMetrics {
    #[serde(flatten)]
    pub metrics: DiscriminationMetrics,
    pub best_threshold: f64,
    pub min_expected_cost: f64,
}

impl TestMetrics {
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        let mut record = self.metrics.to_map();
        record.insert("best_threshold".to_string(), self.best_threshold);
        record.insert("min_expected_cost".to_string(), self.min_expected_cost);
        record
    }
}

/// One seed's test evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    pub seed: u64,
    pub metrics: TestMetrics,
    pub thresholds: Vec<ThresholdCost>,
}

/// Per-seed test runs and their mean/std across seeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub model: ModelKind,
    pub runs: Vec<TestRun>,
    pub aggregate: BTreeMap<String, SeedAggregate>,
}

/// Runs train / evaluate / calibrate for one model backend.
pub struct FixedSplitRunner<S> {
    store: TimePartitionedStore<S>,
    factory: PipelineFactory,
    models_dir: PathBuf,
    artifacts: ArtifactStore,
}

impl FixedSplitRunner<ParquetDir> {
    /// Runner over the config's processed directory and output locations.
    pub fn from_config(config: &EvalConfig, kind: ModelKind) -> Self {
        Self::new(
            TimePartitionedStore::new(config.parquet_source()),
            PipelineFactory::new(kind, config.models.clone()),
            &config.output.models_dir,
            ArtifactStore::new(&config.output.reports_dir),
        )
    }
}

impl<S: TableSource + Sync> FixedSplitRunner<S> {
    pub fn new(
        store: TimePartitionedStore<S>,
        factory: PipelineFactory,
        models_dir: impl Into<PathBuf>,
        artifacts: ArtifactStore,
    ) -> Self {
        Self {
            store,
            factory,
            models_dir: models_dir.into(),
            artifacts,
        }
    }

    pub fn kind(&self) -> ModelKind {
        self.factory.kind
    }

    pub fn model_path(&self, seed: u64) -> PathBuf {
        model_path(&self.models_dir, seed, self.factory.kind)
    }

    fn load_model(&self, seed: u64) -> Result<FittedPipeline, ExperimentError> {
        FittedPipeline::load(&self.model_path(seed))
            .map_err(|source| ExperimentError::Model { seed, source })
    }

    /// Fit one model per seed and score it on the validation buckets.
    ///
    /// Writes `models/seed_{seed}/{model}.json` and
    /// `metrics/valid_seed_{seed}.json` for every seed.
    pub fn train(
        &self,
        train_buckets: &[TimeBucket],
        valid_buckets: &[TimeBucket],
        seeds: &[u64],
        observer: Option<&dyn RunObserver>,
    ) -> Result<Vec<SeedRun>, ExperimentError> {
        if seeds.is_empty() {
            return Err(ExperimentError::NoSeeds);
        }
        let train = self.store.load(train_buckets)?;
        let valid = self.store.load(valid_buckets)?;
        let schema = train.features.schema();
        info!(
            "Training {} on {} rows ({} features), validating on {} rows",
            self.kind(),
            train.len(),
            schema.len(),
            valid.len()
        );

        let outcomes: Vec<Result<(FittedPipeline, DiscriminationMetrics), ExperimentError>> = seeds
            .par_iter()
            .map(|&seed| {
                info!("[seed {}] Fitting {}...", seed, self.kind());
                let model_error = |source| ExperimentError::Model { seed, source };
                let mut pipeline = self.factory.pipeline(&schema, seed);
                pipeline
                    .fit(&train.features, &train.labels)
                    .map_err(model_error)?;
                let p_valid = pipeline.predict_proba(&valid.features).map_err(model_error)?;
                let metrics = DiscriminationMetrics::compute(&valid.labels, &p_valid)
                    .map_err(|source| ExperimentError::Metrics { seed, source })?;
                Ok((pipeline.into_fitted().map_err(model_error)?, metrics))
            })
            .collect();
        let fitted = first_error(outcomes)?;

        if let Some(obs) = observer {
            obs.on_run_start("train", &json!({ "model": self.kind(), "seeds": seeds }));
        }
        let mut runs = Vec::with_capacity(seeds.len());
        for (step, (&seed, (model, metrics))) in seeds.iter().zip(fitted).enumerate() {
            let path = self.model_path(seed);
            model
                .save(&path)
                .map_err(|source| ExperimentError::Model { seed, source })?;
            let record: BTreeMap<&str, &DiscriminationMetrics> =
                [(self.kind().name(), &metrics)].into_iter().collect();
            self.artifacts
                .write_json(format!("metrics/valid_seed_{}.json", seed), &record)?;
            info!("[seed {}] Done. Model saved to {}", seed, path.display());

            let run = SeedRun::new(seed, metrics.to_map());
            if let Some(obs) = observer {
                obs.on_metrics(step, &run.metrics);
            }
            runs.push(run);
        }
        if let Some(obs) = observer {
            obs.on_run_end("train");
        }
        Ok(runs)
    }

    /// Score each seed's saved model on the test buckets.
    ///
    /// Writes the per-seed threshold table and scores, then
    /// `summary/metrics_mean_std.json`.
    pub fn evaluate(
        &self,
        test_buckets: &[TimeBucket],
        cost_model: &CostModel,
        seeds: &[u64],
        observer: Option<&dyn RunObserver>,
    ) -> Result<EvaluationSummary, ExperimentError> {
        if seeds.is_empty() {
            return Err(ExperimentError::NoSeeds);
        }
        cost_model
            .validate()
            .map_err(ExperimentError::InvalidCostModel)?;
        let test = self.store.load(test_buckets)?;
        info!("Evaluating {} on {} test rows", self.kind(), test.len());

        let outcomes: Vec<Result<TestRun, ExperimentError>> = seeds
            .par_iter()
            .map(|&seed| {
                let model = self.load_model(seed)?;
                let p = model
                    .predict_proba(&test.features)
                    .map_err(|source| ExperimentError::Model { seed, source })?;
                let metrics = DiscriminationMetrics::compute(&test.labels, &p)
                    .map_err(|source| ExperimentError::Metrics { seed, source })?;
                let cost_error = |source| ExperimentError::Cost { seed, source };
                let thresholds = sweep(&test.labels, &p, cost_model).map_err(cost_error)?;
                let best = best_of(&thresholds).ok_or(CostError::NoThresholds).map_err(cost_error)?;
                Ok(TestRun {
                    seed,
                    metrics: TestMetrics {
                        metrics,
                        best_threshold: best.threshold,
                        min_expected_cost: best.expected_cost,
                    },
                    thresholds,
                })
            })
            .collect();
        let runs = first_error(outcomes)?;

        let name = self.kind().name();
        if let Some(obs) = observer {
            obs.on_run_start("evaluate", &json!({ "model": self.kind(), "seeds": seeds }));
        }
        for (step, run) in runs.iter().enumerate() {
            self.artifacts.write_json(
                format!("metrics/test_thresholds_seed_{}_{}.json", run.seed, name),
                &run.thresholds,
            )?;
            let record: BTreeMap<&str, &TestMetrics> = [(name, &run.metrics)].into_iter().collect();
            self.artifacts
                .write_json(format!("metrics/test_seed_{}.json", run.seed), &record)?;
            info!(
                "[seed {}] best threshold = {}, min expected cost = {:.2}",
                run.seed, run.metrics.best_threshold, run.metrics.min_expected_cost
            );
            if let Some(obs) = observer {
                obs.on_metrics(step, &run.metrics.to_map());
            }
        }
        if let Some(obs) = observer {
            obs.on_run_end("evaluate");
        }

        let seed_runs: Vec<SeedRun> = runs
            .iter()
            .map(|r| SeedRun::new(r.seed, r.metrics.to_map()))
            .collect();
        let aggregate = SeedRun::aggregate_all(&seed_runs)?;
        let summary: BTreeMap<&str, &BTreeMap<String, SeedAggregate>> =
            [(name, &aggregate)].into_iter().collect();
        self.artifacts
            .write_json("summary/metrics_mean_std.json", &summary)?;

        Ok(EvaluationSummary {
            model: self.kind(),
            runs,
            aggregate,
        })
    }

    /// Reliability diagram data and ECE for one saved model.
    ///
    /// Writes `calibration/calibration_seed{seed}_{model}.json`.
    pub fn calibrate(
        &self,
        test_buckets: &[TimeBucket],
        seed: u64,
        n_bins: usize,
        bootstrap: &BootstrapConfig,
    ) -> Result<CalibrationReport, ExperimentError> {
        let test = self.store.load(test_buckets)?;
        let model = self.load_model(seed)?;
        let p = model
            .predict_proba(&test.features)
            .map_err(|source| ExperimentError::Model { seed, source })?;
        let report = CalibrationReport::compute(&test.labels, &p, n_bins, bootstrap)
            .map_err(|source| ExperimentError::Metrics { seed, source })?;

        let path = self.artifacts.write_json(
            format!("calibration/calibration_seed{}_{}.json", seed, self.kind().name()),
            &report,
        )?;
        info!(
            "ECE = {:.4} [{:.4}, {:.4}] over {} rows, saved to {}",
            report.ece,
            report.ece_ci.lo,
            report.ece_ci.hi,
            report.n_samples,
            path.display()
        );
        Ok(report)
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }
}

/// Log every failure, then return the first in input order.
fn first_error<T>(outcomes: Vec<Result<T, ExperimentError>>) -> Result<Vec<T>, ExperimentError> {
    for e in outcomes.iter().filter_map(|o| o.as_ref().err()) {
        error!("{}", e);
    }
    outcomes.into_iter().collect()
}
