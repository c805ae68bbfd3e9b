//! Walk-forward evaluation and cost-sensitive threshold selection for tabular
//! classifiers under temporal drift.
//!
//! - `data`: time-partitioned tables with a declared column schema
//! - `model`: the classifier capability and the shipped pipelines
//! - `cost`: cost model and threshold sweep
//! - `metrics`: discrimination, calibration, bootstrap intervals
//! - `walkforward`: expanding-window scheduler
//! - `ablation`: feature-group ablation across seeds
//! - `experiment`: fixed-split train / evaluate / calibrate
//! - `report`: artifacts and run tracking
//! - `serving`: cached single-row scoring

pub mod ablation;
pub mod aggregate;
pub mod config;
pub mod cost;
pub mod data;
pub mod experiment;
pub mod metrics;
pub mod model;
pub mod report;
pub mod serving;
pub mod walkforward;

// Re-export commonly used types
pub use ablation::{AblationHarness, ExperimentSpec, ExperimentSummary, FeatureGroups};
pub use aggregate::{aggregate, SeedAggregate, SeedRun};
pub use config::{AblationConfig, EvalConfig};
pub use cost::{select_threshold, CostModel, ThresholdDecision};
pub use data::{DatasetSlice, FeatureSchema, TimeBucket, TimePartitionedStore};
pub use experiment::FixedSplitRunner;
pub use metrics::{CalibrationReport, DiscriminationMetrics};
pub use model::{Classifier, ModelFactory, ModelKind, PipelineFactory};
pub use report::{ArtifactStore, RunObserver};
pub use serving::ModelCache;
pub use walkforward::{WalkForwardScheduler, WindowResult};
