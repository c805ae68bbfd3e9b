//! TOML configuration.
//!
//! Two files drive a run:
//! - the evaluation config (`[data]`, `[models.*]`, `[costs]`, `[calibration]`,
//!   `[rolling]`, `[output]`)
//! - the ablation config (`[feature_groups]`, `[[experiments]]`)

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ablation::{ExperimentSpec, FeatureGroups};
use crate::cost::{CostError, CostModel};
use crate::data::{ParquetDir, TableLayout, TimeBucket, DEFAULT_FILE_PREFIX};
use crate::metrics::{BootstrapConfig, DEFAULT_N_BINS};
use crate::model::ModelParams;
use crate::walkforward::DEFAULT_MIN_TRAIN;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid cost model: {0}")]
    Cost(#[from] CostError),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Dataset location and column roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub processed_dir: PathBuf,
    pub label_col: String,
    pub time_col: String,
    /// Feature columns declared categorical. Everything else is numeric.
    pub categorical_cols: Vec<String>,
    pub train_months: Vec<String>,
    pub valid_months: Vec<String>,
    pub test_months: Vec<String>,
    pub file_prefix: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            processed_dir: PathBuf::from("data/processed"),
            label_col: "label".to_string(),
            time_col: "pickup_datetime".to_string(),
            categorical_cols: Vec::new(),
            train_months: Vec::new(),
            valid_months: Vec::new(),
            test_months: Vec::new(),
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
        }
    }
}

/// Calibration diagnostic settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub n_bins: usize,
    pub n_boot: usize,
    pub alpha: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            n_bins: DEFAULT_N_BINS,
            n_boot: 200,
            alpha: 0.05,
        }
    }
}

impl CalibrationConfig {
    pub fn bootstrap(&self, seed: u64) -> BootstrapConfig {
        BootstrapConfig {
            n_boot: self.n_boot,
            alpha: self.alpha,
            seed,
        }
    }
}

/// Walk-forward settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollingConfig {
    pub min_train_months: usize,
}

impl Default for RollingConfig {
    fn default() -> Self {
        Self {
            min_train_months: DEFAULT_MIN_TRAIN,
        }
    }
}

/// Artifact locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub reports_dir: PathBuf,
    pub models_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            reports_dir: PathBuf::from("reports"),
            models_dir: PathBuf::from("models"),
        }
    }
}

/// Main evaluation config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    pub data: DataConfig,
    pub models: ModelParams,
    pub costs: CostModel,
    pub calibration: CalibrationConfig,
    pub rolling: RollingConfig,
    pub output: OutputConfig,
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn buckets(field: &str, ids: &[String]) -> Result<Vec<TimeBucket>, ConfigError> {
    TimeBucket::parse_all(ids.iter().cloned())
        .map_err(|e| ConfigError::Invalid(format!("data.{}: {}", field, e)))
}

impl EvalConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::parse(&read(path)?)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML without validating.
    pub fn parse(toml_content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_content)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.costs.validate()?;

        if self.data.label_col == self.data.time_col {
            return Err(ConfigError::Invalid(
                "data.label_col and data.time_col must differ".to_string(),
            ));
        }
        if self.calibration.n_bins == 0 {
            return Err(ConfigError::Invalid("calibration.n_bins must be >= 1".to_string()));
        }
        self.calibration
            .bootstrap(0)
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("calibration: {}", e)))?;

        let lr = &self.models.logistic_regression;
        if !(lr.c > 0.0 && lr.c.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "models.logistic_regression.c must be positive, got {}",
                lr.c
            )));
        }
        if !(lr.learning_rate > 0.0) || lr.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "models.logistic_regression needs learning_rate > 0 and batch_size >= 1".to_string(),
            ));
        }

        let gb = &self.models.gbdt;
        if !(gb.learning_rate > 0.0) || gb.max_bins < 2 {
            return Err(ConfigError::Invalid(
                "models.gbdt needs learning_rate > 0 and max_bins >= 2".to_string(),
            ));
        }
        if !(gb.subsample > 0.0 && gb.subsample <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "models.gbdt.subsample must be in (0, 1], got {}",
                gb.subsample
            )));
        }

        for (field, ids) in [
            ("train_months", &self.data.train_months),
            ("valid_months", &self.data.valid_months),
            ("test_months", &self.data.test_months),
        ] {
            buckets(field, ids)?;
        }
        Ok(())
    }

    /// Column roles for the partition files.
    pub fn layout(&self) -> TableLayout {
        TableLayout::new(&self.data.label_col, &self.data.time_col)
            .with_categorical(self.data.categorical_cols.iter().cloned())
    }

    /// Parquet source for `data.processed_dir`.
    pub fn parquet_source(&self) -> ParquetDir {
        ParquetDir::new(&self.data.processed_dir, self.layout()).with_prefix(&self.data.file_prefix)
    }

    pub fn train_buckets(&self) -> Result<Vec<TimeBucket>, ConfigError> {
        buckets("train_months", &self.data.train_months)
    }

    pub fn valid_buckets(&self) -> Result<Vec<TimeBucket>, ConfigError> {
        buckets("valid_months", &self.data.valid_months)
    }

    pub fn test_buckets(&self) -> Result<Vec<TimeBucket>, ConfigError> {
        buckets("test_months", &self.data.test_months)
    }
}

/// Ablation experiments and the feature groups they refer to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AblationConfig {
    pub feature_groups: FeatureGroups,
    #[serde(default)]
    pub experiments: Vec<ExperimentSpec>,
}

impl AblationConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::parse(&read(path)?)?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(toml_content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_content)?)
    }

    /// At least one experiment, unique names, and only declared groups.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.experiments.is_empty() {
            return Err(ConfigError::Invalid("no [[experiments]] defined".to_string()));
        }
        let mut names = BTreeSet::new();
        for exp in &self.experiments {
            if !names.insert(exp.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate experiment name '{}'",
                    exp.name
                )));
            }
            let referenced = exp.keep_groups.iter().chain(exp.drop_groups.iter()).flatten();
            for group in referenced {
                if !self.feature_groups.contains_key(group) {
                    return Err(ConfigError::Invalid(format!(
                        "experiment '{}' references unknown group '{}'",
                        exp.name, group
                    )));
                }
            }
        }
        Ok(())
    }
}
