//! Classifier pipeline.
//!
//! - `pipeline`: the [`Classifier`] / [`ModelFactory`] capability plus the
//!   shipped preprocessing + backend pipeline
//! - `preprocess`: imputation, scaling, one-hot encoding
//! - `logistic`: L2 logistic regression
//! - `gbdt`: gradient-boosted stumps

pub mod gbdt;
pub mod logistic;
pub mod pipeline;
pub mod preprocess;

pub use gbdt::{GbdtConfig, GradientBoostedStumps};
pub use logistic::{LogisticConfig, LogisticRegression};
pub use pipeline::{
    model_path, Backend, Classifier, ClassifierPipeline, FittedPipeline, ModelError, ModelFactory,
    ModelKind, ModelParams, PipelineFactory,
};
pub use preprocess::Preprocessor;
