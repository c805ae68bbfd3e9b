//! Fit/predict capability and the shipped preprocessing + classifier pipeline.
//!
//! Evaluation code depends only on [`Classifier`] and [`ModelFactory`].
//! [`PipelineFactory`] is the concrete factory used by the CLI.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use polars::prelude::PolarsError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::gbdt::{GbdtConfig, GradientBoostedStumps};
use super::logistic::{LogisticConfig, LogisticRegression};
use super::preprocess::Preprocessor;
use crate::data::{FeatureFrame, FeatureSchema, StoreError};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("No feature columns to fit on")]
    NoFeatures,

    #[error("Empty training set")]
    EmptyTrainingSet,

    #[error("Training labels contain a single class ({0})")]
    SingleClass(u8),

    #[error("Length mismatch: {rows} rows vs {labels} labels")]
    LengthMismatch { rows: usize, labels: usize },

    #[error("Missing feature column: {0}")]
    MissingFeature(String),

    #[error("Column kind does not match the fitted schema: {0}")]
    KindMismatch(String),

    #[error("Model has not been fitted")]
    NotFitted,

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Invalid input: {0}")]
    InvalidInput(#[from] StoreError),

    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Anything that can be fit on labeled rows and score new rows.
pub trait Classifier {
    /// Fit on `features` and 0/1 `labels`, replacing any previous fit.
    fn fit(&mut self, features: &FeatureFrame, labels: &[u8]) -> Result<(), ModelError>;

    /// Positive-class probability per row.
    fn predict_proba(&self, features: &FeatureFrame) -> Result<Vec<f64>, ModelError>;
}

/// Builds fresh, unfitted classifiers.
///
/// Shared across threads when seeds or experiments run in parallel.
pub trait ModelFactory: Sync {
    fn build(&self, schema: &FeatureSchema, seed: u64) -> Box<dyn Classifier>;
}

/// Shipped classifier backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Logreg,
    Gbdt,
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Logreg => "logreg",
            Self::Gbdt => "gbdt",
        }
    }

    pub fn parse(name: &str) -> Result<Self, ModelError> {
        match name {
            "logreg" => Ok(Self::Logreg),
            "gbdt" => Ok(Self::Gbdt),
            other => Err(ModelError::UnknownModel(other.to_string())),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hyperparameters for every backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    pub logistic_regression: LogisticConfig,
    pub gbdt: GbdtConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum Backend {
    Logistic(LogisticRegression),
    Gbdt(GradientBoostedStumps),
}

/// A fitted preprocessor plus backend. This is the persisted model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedPipeline {
    pub kind: ModelKind,
    pub seed: u64,
    pub schema: FeatureSchema,
    pub preprocessor: Preprocessor,
    pub backend: Backend,
}

impl FittedPipeline {
    pub fn predict_proba(&self, features: &FeatureFrame) -> Result<Vec<f64>, ModelError> {
        let x = self.preprocessor.transform(features)?;
        Ok(match &self.backend {
            Backend::Logistic(m) => m.predict_proba(&x),
            Backend::Gbdt(m) => m.predict_proba(&x),
        })
    }

    /// Write the pipeline as pretty JSON, creating parent directories.
    ///
    /// Floats are written in shortest round-trip form and parsed back exactly,
    /// so a loaded pipeline scores rows bit-for-bit like the saved one.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        debug!("Saved {} model to {}", self.kind, path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Location of a saved model: `{models_dir}/seed_{seed}/{model}.json`.
pub fn model_path(models_dir: &Path, seed: u64, kind: ModelKind) -> PathBuf {
    models_dir
        .join(format!("seed_{}", seed))
        .join(format!("{}.json", kind.name()))
}

/// Unfitted-or-fitted pipeline for one backend and seed.
#[derive(Debug, Clone)]
pub struct ClassifierPipeline {
    kind: ModelKind,
    seed: u64,
    schema: FeatureSchema,
    params: ModelParams,
    fitted: Option<FittedPipeline>,
}

impl ClassifierPipeline {
    pub fn new(kind: ModelKind, schema: FeatureSchema, params: ModelParams, seed: u64) -> Self {
        Self {
            kind,
            seed,
            schema,
            params,
            fitted: None,
        }
    }

    pub fn fitted(&self) -> Option<&FittedPipeline> {
        self.fitted.as_ref()
    }

    pub fn into_fitted(self) -> Result<FittedPipeline, ModelError> {
        self.fitted.ok_or(ModelError::NotFitted)
    }
}

impl Classifier for ClassifierPipeline {
    fn fit(&mut self, features: &FeatureFrame, labels: &[u8]) -> Result<(), ModelError> {
        if features.height() != labels.len() {
            return Err(ModelError::LengthMismatch {
                rows: features.height(),
                labels: labels.len(),
            });
        }
        let preprocessor = Preprocessor::fit(features, &self.schema)?;
        let positives = labels.iter().filter(|&&y| y == 1).count();
        if positives == 0 || positives == labels.len() {
            return Err(ModelError::SingleClass(labels[0]));
        }

        let x = preprocessor.transform(features)?;
        let backend = match self.kind {
            ModelKind::Logreg => Backend::Logistic(LogisticRegression::fit(
                &x,
                labels,
                &self.params.logistic_regression,
                self.seed,
            )),
            ModelKind::Gbdt => Backend::Gbdt(GradientBoostedStumps::fit(
                &x,
                labels,
                &self.params.gbdt,
                self.seed,
            )),
        };

        self.fitted = Some(FittedPipeline {
            kind: self.kind,
            seed: self.seed,
            schema: self.schema.clone(),
            preprocessor,
            backend,
        });
        Ok(())
    }

    fn predict_proba(&self, features: &FeatureFrame) -> Result<Vec<f64>, ModelError> {
        self.fitted
            .as_ref()
            .ok_or(ModelError::NotFitted)?
            .predict_proba(features)
    }
}

/// Factory for [`ClassifierPipeline`]s of one backend.
#[derive(Debug, Clone)]
pub struct PipelineFactory {
    pub kind: ModelKind,
    pub params: ModelParams,
}

impl PipelineFactory {
    pub fn new(kind: ModelKind, params: ModelParams) -> Self {
        Self { kind, params }
    }

    /// Concrete pipeline, for callers that need to persist the fit.
    pub fn pipeline(&self, schema: &FeatureSchema, seed: u64) -> ClassifierPipeline {
        ClassifierPipeline::new(self.kind, schema.clone(), self.params.clone(), seed)
    }
}

impl ModelFactory for PipelineFactory {
    fn build(&self, schema: &FeatureSchema, seed: u64) -> Box<dyn Classifier> {
        Box::new(self.pipeline(schema, seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FeatureColumn;

    fn training_frame() -> (FeatureFrame, Vec<u8>) {
        let n = 60;
        let distance: Vec<Option<f64>> = (0..n).map(|i| Some(i as f64 / 10.0)).collect();
        let payment: Vec<Option<String>> = (0..n)
            .map(|i| Some(if i % 2 == 0 { "card" } else { "cash" }.to_string()))
            .collect();
        let labels: Vec<u8> = (0..n).map(|i| u8::from(i >= 30)).collect();
        let frame = FeatureFrame::from_columns(
            n,
            vec![
                ("trip_distance".to_string(), FeatureColumn::Numeric(distance)),
                ("payment_type".to_string(), FeatureColumn::Categorical(payment)),
            ],
        )
        .unwrap();
        (frame, labels)
    }

    #[test]
    fn test_factory_builds_fresh_models() {
        let (frame, labels) = training_frame();
        for kind in [ModelKind::Logreg, ModelKind::Gbdt] {
            let factory = PipelineFactory::new(kind, ModelParams::default());
            let mut model = factory.build(&frame.schema(), 42);
            assert!(matches!(model.predict_proba(&frame), Err(ModelError::NotFitted)));
            model.fit(&frame, &labels).unwrap();
            let p = model.predict_proba(&frame).unwrap();
            assert_eq!(p.len(), frame.height());
            assert!(p.iter().all(|v| (0.0..=1.0).contains(v)));
            assert!(p[55] > p[5], "{} did not rank rows", kind);
        }
    }

    #[test]
    fn test_single_class_rejected() {
        let (frame, _) = training_frame();
        let mut model = PipelineFactory::new(ModelKind::Logreg, ModelParams::default())
            .build(&frame.schema(), 1);
        assert!(matches!(
            model.fit(&frame, &vec![0; frame.height()]),
            Err(ModelError::SingleClass(0))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let (frame, labels) = training_frame();
        for kind in [ModelKind::Logreg, ModelKind::Gbdt] {
            let factory = PipelineFactory::new(kind, ModelParams::default());
            let mut pipeline = factory.pipeline(&frame.schema(), 7);
            pipeline.fit(&frame, &labels).unwrap();
            let fitted = pipeline.into_fitted().unwrap();

            let dir = tempfile::tempdir().unwrap();
            let path = model_path(dir.path(), 7, kind);
            assert!(path.ends_with(format!("seed_7/{}.json", kind)));
            fitted.save(&path).unwrap();

            let loaded = FittedPipeline::load(&path).unwrap();
            assert_eq!(loaded, fitted, "{} changed on reload", kind);
            assert_eq!(
                loaded.predict_proba(&frame).unwrap(),
                fitted.predict_proba(&frame).unwrap()
            );
        }
    }

    #[test]
    fn test_reload_keeps_split_edges() {
        // Rows sit exactly on the stump thresholds, which are training values.
        let n = 90;
        let distance: Vec<Option<f64>> = (0..n).map(|i| Some(0.1 * (i % 30) as f64 + 1e-3)).collect();
        let labels: Vec<u8> = (0..n).map(|i| u8::from(i % 30 >= 13)).collect();
        let frame = FeatureFrame::from_columns(
            n,
            vec![("trip_distance".to_string(), FeatureColumn::Numeric(distance))],
        )
        .unwrap();
        let params = ModelParams {
            gbdt: GbdtConfig {
                min_samples_leaf: 3,
                ..GbdtConfig::default()
            },
            ..ModelParams::default()
        };
        let mut pipeline = PipelineFactory::new(ModelKind::Gbdt, params).pipeline(&frame.schema(), 11);
        pipeline.fit(&frame, &labels).unwrap();
        let fitted = pipeline.into_fitted().unwrap();

        let text = serde_json::to_string(&fitted).unwrap();
        let loaded: FittedPipeline = serde_json::from_str(&text).unwrap();
        assert_eq!(loaded, fitted);
        assert_eq!(
            loaded.predict_proba(&frame).unwrap(),
            fitted.predict_proba(&frame).unwrap()
        );
    }

    #[test]
    fn test_model_kind_names() {
        assert_eq!(ModelKind::parse("gbdt").unwrap(), ModelKind::Gbdt);
        assert!(ModelKind::parse("xgb").is_err());
        assert_eq!(ModelKind::Logreg.to_string(), "logreg");
    }
}
