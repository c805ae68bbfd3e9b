//! Feature-group ablation over repeated seeds.
//!
//! Every (experiment, seed) pair is an independent fit on the fixed training
//! split, scored on the fixed validation split. Pairs run in parallel; results
//! are collected in experiment order then seed order.
//!
//! A pair that fails to fit or score is recorded as an [`ExperimentFailure`];
//! experiments whose seeds all succeeded still get their summary.

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::groups::{select_columns, ExperimentSpec, FeatureGroups};
use crate::aggregate::{AggregateError, SeedAggregate, SeedRun};
use crate::data::{DatasetSlice, StoreError};
use crate::metrics::{DiscriminationMetrics, MetricsError};
use crate::model::{ModelError, ModelFactory};
use crate::report::RunObserver;

#[derive(Error, Debug)]
pub enum AblationError {
    #[error("Experiment {experiment} names unknown feature group '{group}'")]
    UnknownGroup { experiment: String, group: String },

    #[error("Duplicate experiment name: {0}")]
    DuplicateExperiment(String),

    #[error("No seeds given")]
    NoSeeds,

    #[error("Fit failed for experiment {experiment} (seed {seed}): {source}")]
    Fit {
        experiment: String,
        seed: u64,
        source: ModelError,
    },

    #[error("Scoring failed for experiment {experiment} (seed {seed}): {source}")]
    Metrics {
        experiment: String,
        seed: u64,
        source: MetricsError,
    },

    #[error("Aggregation failed for experiment {experiment}: {source}")]
    Aggregate {
        experiment: String,
        source: AggregateError,
    },

    #[error("{failed} of {total} experiment runs failed; first: {experiment} (seed {seed}): {error}")]
    ExperimentsFailed {
        failed: usize,
        total: usize,
        experiment: String,
        seed: u64,
        error: String,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// A failed (experiment, seed) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentFailure {
    pub experiment: String,
    pub seed: u64,
    pub error: String,
}

/// Summaries of complete experiments plus every failed pair, both in
/// experiment then seed order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AblationRun {
    pub summaries: Vec<ExperimentSummary>,
    pub failures: Vec<ExperimentFailure>,
    /// Number of (experiment, seed) pairs attempted.
    pub attempted: usize,
}

impl AblationRun {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// `ExperimentsFailed` naming the first failed pair, if any pair failed.
    pub fn ensure_complete(&self) -> Result<(), AblationError> {
        match self.failures.first() {
            None => Ok(()),
            Some(first) => Err(AblationError::ExperimentsFailed {
                failed: self.failures.len(),
                total: self.attempted,
                experiment: first.experiment.clone(),
                seed: first.seed,
                error: first.error.clone(),
            }),
        }
    }

    pub fn into_complete(self) -> Result<Vec<ExperimentSummary>, AblationError> {
        self.ensure_complete()?;
        Ok(self.summaries)
    }
}

/// Aggregated outcome of one experiment across seeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSummary {
    pub experiment: String,
    /// Columns the experiment trained on.
    pub columns: Vec<String>,
    pub runs: Vec<SeedRun>,
    pub aggregate: BTreeMap<String, SeedAggregate>,
}

/// Runs ablation experiments on fixed train/validation splits.
pub struct AblationHarness {
    groups: FeatureGroups,
    seeds: Vec<u64>,
}

impl AblationHarness {
    /// Create a new harness.
    pub fn new(groups: FeatureGroups, seeds: Vec<u64>) -> Self {
        Self { groups, seeds }
    }

    /// Columns an experiment uses: its selection over the training columns,
    /// restricted to columns the validation split also has.
    pub fn resolve_columns(
        &self,
        experiment: &ExperimentSpec,
        train: &DatasetSlice,
        valid: &DatasetSlice,
    ) -> Result<Vec<String>, AblationError> {
        let selected = select_columns(&train.features.column_names(), &self.groups, experiment)?;
        let (present, absent): (Vec<String>, Vec<String>) =
            selected.into_iter().partition(|c| valid.features.contains(c));
        if !absent.is_empty() {
            debug!(
                "Experiment {}: excluding columns absent from validation: {:?}",
                experiment.name, absent
            );
        }
        Ok(present)
    }

    /// Run every experiment for every seed.
    ///
    /// All pairs run to completion. Failed pairs are logged and returned in
    /// [`AblationRun::failures`]; an experiment with any failed seed has no
    /// summary. Setup errors (unknown groups, duplicates, no seeds) abort
    /// before any fit.
    pub fn run(
        &self,
        train: &DatasetSlice,
        valid: &DatasetSlice,
        experiments: &[ExperimentSpec],
        factory: &dyn ModelFactory,
        observer: Option<&dyn RunObserver>,
    ) -> Result<AblationRun, AblationError> {
        if self.seeds.is_empty() {
            return Err(AblationError::NoSeeds);
        }
        let mut names = BTreeSet::new();
        for exp in experiments {
            if !names.insert(exp.name.as_str()) {
                return Err(AblationError::DuplicateExperiment(exp.name.clone()));
            }
        }

        let resolved: Vec<(&ExperimentSpec, Vec<String>)> = experiments
            .iter()
            .map(|exp| Ok((exp, self.resolve_columns(exp, train, valid)?)))
            .collect::<Result<_, AblationError>>()?;

        let jobs: Vec<(usize, u64)> = (0..resolved.len())
            .flat_map(|e| self.seeds.iter().map(move |&s| (e, s)))
            .collect();
        info!(
            "Running {} experiments x {} seeds ({} fits)",
            resolved.len(),
            self.seeds.len(),
            jobs.len()
        );

        let outcomes: Vec<Result<SeedRun, AblationError>> = jobs
            .par_iter()
            .map(|&(e, seed)| {
                let (exp, columns) = &resolved[e];
                run_one(exp, columns, seed, train, valid, factory)
            })
            .collect();

        let mut run = AblationRun {
            attempted: jobs.len(),
            ..AblationRun::default()
        };
        let mut outcomes = outcomes.into_iter();
        for (exp, columns) in resolved {
            let mut runs = Vec::with_capacity(self.seeds.len());
            let mut failed = false;
            for (outcome, &seed) in outcomes.by_ref().take(self.seeds.len()).zip(&self.seeds) {
                match outcome {
                    Ok(seed_run) => runs.push(seed_run),
                    Err(e) => {
                        error!("{}", e);
                        failed = true;
                        run.failures.push(ExperimentFailure {
                            experiment: exp.name.clone(),
                            seed,
                            error: e.to_string(),
                        });
                    }
                }
            }
            if failed {
                continue;
            }

            let aggregate =
                SeedRun::aggregate_all(&runs).map_err(|source| AblationError::Aggregate {
                    experiment: exp.name.clone(),
                    source,
                })?;
            info!(
                "Experiment {} ({} columns): {}",
                exp.name,
                columns.len(),
                aggregate
                    .iter()
                    .map(|(k, v)| format!("{} = {:.4} +/- {:.4}", k, v.mean, v.std))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            run.summaries.push(ExperimentSummary {
                experiment: exp.name.clone(),
                columns,
                runs,
                aggregate,
            });
        }

        if !run.is_complete() {
            warn!(
                "{} of {} experiment runs failed; {} experiments complete",
                run.failures.len(),
                run.attempted,
                run.summaries.len()
            );
        }

        if let Some(obs) = observer {
            for summary in &run.summaries {
                obs.on_run_start(
                    &summary.experiment,
                    &json!({ "columns": summary.columns, "seeds": self.seeds }),
                );
                for (step, seed_run) in summary.runs.iter().enumerate() {
                    obs.on_metrics(step, &seed_run.metrics);
                }
                obs.on_run_end(&summary.experiment);
            }
        }

        Ok(run)
    }
}

fn run_one(
    exp: &ExperimentSpec,
    columns: &[String],
    seed: u64,
    train: &DatasetSlice,
    valid: &DatasetSlice,
    factory: &dyn ModelFactory,
) -> Result<SeedRun, AblationError> {
    let fit_error = |source| AblationError::Fit {
        experiment: exp.name.clone(),
        seed,
        source,
    };

    let x_train = train.features.select(columns)?;
    let x_valid = valid.features.select(columns)?;

    let mut model = factory.build(&x_train.schema(), seed);
    model.fit(&x_train, &train.labels).map_err(fit_error)?;
    let p_valid = model.predict_proba(&x_valid).map_err(fit_error)?;

    let metrics = DiscriminationMetrics::compute(&valid.labels, &p_valid).map_err(|source| {
        AblationError::Metrics {
            experiment: exp.name.clone(),
            seed,
            source,
        }
    })?;
    debug!("Experiment {} seed {} done", exp.name, seed);
    Ok(SeedRun::new(seed, metrics.to_map()))
}
