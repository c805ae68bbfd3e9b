//! Fixed train/validation/test split experiments.

pub mod fixed_split;

pub use fixed_split::{EvaluationSummary, ExperimentError, FixedSplitRunner, TestMetrics, TestRun};
