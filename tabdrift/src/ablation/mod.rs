//! Feature-group ablation.
//!
//! Experiments keep or drop named feature groups, repeat the fixed-split fit
//! across seeds, and report one aggregated row each.

pub mod groups;
pub mod harness;

pub use groups::{select_columns, ExperimentSpec, FeatureGroups};
pub use harness::{
    AblationError, AblationHarness, AblationRun, ExperimentFailure, ExperimentSummary,
};
