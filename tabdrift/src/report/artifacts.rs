//! Result artifacts written under the reports directory.
//!
//! Layout:
//! - `rolling/windows/{test_bucket}.json`, `rolling/metrics.csv`, `rolling/summary.json`
//! - `ablation/experiments/{name}.json`, `ablation/ablation_summary.csv`
//! - `metrics/`, `summary/` and `calibration/` for the fixed-split commands
//! - `{command}/run_manifest.json` per command (`calibrate` uses `calibration/`)
//!
//! Tables carry no timestamps so identical runs produce identical bytes.
//! Undefined metrics are written as the literal `undefined` in CSV and `null`
//! in JSON.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::ablation::ExperimentSummary;
use crate::aggregate::SeedAggregate;
use crate::walkforward::{RollingRun, WindowFailure, WindowResult};

/// Marker for metrics that are not defined on a window (single-class labels).
pub const UNDEFINED: &str = "undefined";

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("Invalid artifact name: {0:?}")]
    InvalidName(String),
}

/// Provenance for one CLI invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub command: String,
    pub seeds: Vec<u64>,
    pub model: Option<String>,
    pub config_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

impl RunManifest {
    /// Manifest location, inside the directory holding the command's outputs.
    pub fn relative_path(&self) -> PathBuf {
        let dir = match self.command.as_str() {
            "calibrate" => "calibration",
            other => other,
        };
        Path::new(dir).join("run_manifest.json")
    }

    pub fn new(command: &str, seeds: Vec<u64>, model: Option<&str>, config_path: &Path) -> Self {
        Self {
            command: command.to_string(),
            seeds,
            model: model.map(str::to_string),
            config_path: config_path.to_path_buf(),
            started_at: Utc::now(),
        }
    }
}

/// Writes artifacts relative to a root directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Pretty JSON at `relative`, creating parent directories.
    pub fn write_json<T: Serialize + ?Sized>(
        &self,
        relative: impl AsRef<Path>,
        value: &T,
    ) -> Result<PathBuf, ArtifactError> {
        let path = self.root.join(relative);
        ensure_parent(&path)?;
        let text = serde_json::to_string_pretty(value)?;
        fs::write(&path, text).map_err(|source| ArtifactError::Io {
            path: path.clone(),
            source,
        })?;
        debug!("Wrote {}", path.display());
        Ok(path)
    }

    /// CSV at `relative` with nulls written as `undefined`.
    pub fn write_csv(
        &self,
        relative: impl AsRef<Path>,
        df: &mut DataFrame,
    ) -> Result<PathBuf, ArtifactError> {
        let path = self.root.join(relative);
        ensure_parent(&path)?;
        let mut file = File::create(&path).map_err(|source| ArtifactError::Io {
            path: path.clone(),
            source,
        })?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .with_null_value(UNDEFINED.to_string())
            .finish(df)?;
        debug!("Wrote {} ({} rows)", path.display(), df.height());
        Ok(path)
    }

    pub fn write_manifest(&self, manifest: &RunManifest) -> Result<PathBuf, ArtifactError> {
        checked_name(&manifest.command)?;
        self.write_json(manifest.relative_path(), manifest)
    }

    /// Per-window JSON records, the metrics table and the window summary.
    ///
    /// Failed windows get a record and a table row marked `failed`.
    pub fn write_rolling(
        &self,
        run: &RollingRun,
        summary: &BTreeMap<String, SeedAggregate>,
    ) -> Result<PathBuf, ArtifactError> {
        let records = window_records(run);
        for record in &records {
            let name = checked_name(record.test_bucket())?;
            self.write_json(format!("rolling/windows/{}.json", name), record)?;
        }
        self.write_json("rolling/summary.json", summary)?;

        let mut df = rolling_table(run)?;
        let path = self.write_csv("rolling/metrics.csv", &mut df)?;
        info!(
            "Saved {} window results ({} failed) to {}",
            records.len(),
            run.failures.len(),
            path.display()
        );
        Ok(path)
    }

    /// Per-experiment JSON records and the aggregate table.
    pub fn write_ablation(&self, summaries: &[ExperimentSummary]) -> Result<PathBuf, ArtifactError> {
        for summary in summaries {
            let name = checked_name(&summary.experiment)?;
            self.write_json(format!("ablation/experiments/{}.json", name), summary)?;
        }

        let mut df = ablation_table(summaries)?;
        let path = self.write_csv("ablation/ablation_summary.csv", &mut df)?;
        info!("Saved {} ablation experiments to {}", summaries.len(), path.display());
        Ok(path)
    }
}

fn ensure_parent(path: &Path) -> Result<(), ArtifactError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ArtifactError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

fn checked_name(name: &str) -> Result<&str, ArtifactError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(ArtifactError::InvalidName(name.to_string()));
    }
    Ok(name)
}

/// A completed or failed window, tagged with its status.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum WindowRecord<'a> {
    Ok(&'a WindowResult),
    Failed(&'a WindowFailure),
}

impl WindowRecord<'_> {
    fn test_bucket(&self) -> &str {
        match self {
            Self::Ok(r) => r.test_bucket.as_str(),
            Self::Failed(f) => f.test_bucket.as_str(),
        }
    }
}

/// Every window of a run, in test-bucket order.
fn window_records(run: &RollingRun) -> Vec<WindowRecord<'_>> {
    let mut records: Vec<WindowRecord<'_>> = run
        .results
        .iter()
        .map(WindowRecord::Ok)
        .chain(run.failures.iter().map(WindowRecord::Failed))
        .collect();
    records.sort_by(|a, b| a.test_bucket().cmp(b.test_bucket()));
    records
}

/// One row per window in test-bucket order. Failed windows have null scores
/// and `status = failed`.
pub fn rolling_table(run: &RollingRun) -> Result<DataFrame, ArtifactError> {
    let records = window_records(run);
    let completed = |f: fn(&WindowResult) -> Option<f64>| -> Vec<Option<f64>> {
        records
            .iter()
            .map(|r| match r {
                WindowRecord::Ok(result) => f(result),
                WindowRecord::Failed(_) => None,
            })
            .collect()
    };

    let test_bucket: Vec<&str> = records.iter().map(WindowRecord::test_bucket).collect();
    let valid_bucket: Vec<&str> = records
        .iter()
        .map(|r| match r {
            WindowRecord::Ok(result) => result.validation_bucket.as_str(),
            WindowRecord::Failed(failure) => failure.validation_bucket.as_str(),
        })
        .collect();
    let n_test: Vec<Option<u64>> = records
        .iter()
        .map(|r| match r {
            WindowRecord::Ok(result) => Some(result.test_row_count as u64),
            WindowRecord::Failed(_) => None,
        })
        .collect();
    let status: Vec<&str> = records
        .iter()
        .map(|r| match r {
            WindowRecord::Ok(_) => "ok",
            WindowRecord::Failed(_) => "failed",
        })
        .collect();

    let df = DataFrame::new(vec![
        Series::new("test_bucket".into(), test_bucket).into(),
        Series::new("valid_bucket".into(), valid_bucket).into(),
        Series::new("roc_auc".into(), completed(|r| r.metrics.roc_auc)).into(),
        Series::new("pr_auc".into(), completed(|r| r.metrics.pr_auc)).into(),
        Series::new("brier".into(), completed(|r| r.metrics.brier)).into(),
        Series::new("best_threshold".into(), completed(|r| Some(r.selected_threshold))).into(),
        Series::new("expected_cost".into(), completed(|r| Some(r.expected_cost))).into(),
        Series::new("n_test".into(), n_test).into(),
        Series::new("status".into(), status).into(),
    ])?;
    Ok(df)
}

/// One row per experiment: every `{metric}_mean` column, then every `{metric}_std`.
///
/// A metric no seed of an experiment reported is null in that row.
pub fn ablation_table(summaries: &[ExperimentSummary]) -> Result<DataFrame, ArtifactError> {
    let metric_names: BTreeSet<&str> = summaries
        .iter()
        .flat_map(|s| s.aggregate.keys().map(String::as_str))
        .collect();

    let experiment: Vec<&str> = summaries.iter().map(|s| s.experiment.as_str()).collect();
    let mut columns: Vec<Column> = vec![Series::new("experiment".into(), experiment).into()];

    for metric in &metric_names {
        let values: Vec<Option<f64>> = summaries
            .iter()
            .map(|s| s.aggregate.get(*metric).map(|a| a.mean))
            .collect();
        columns.push(Series::new(format!("{}_mean", metric).into(), values).into());
    }
    for metric in &metric_names {
        let values: Vec<Option<f64>> = summaries
            .iter()
            .map(|s| s.aggregate.get(*metric).map(|a| a.std))
            .collect();
        columns.push(Series::new(format!("{}_std", metric).into(), values).into());
    }

    Ok(DataFrame::new(columns)?)
}
