//! Metrics module.
//!
//! Provides evaluation statistics for scored label sets:
//! - ROC AUC, average precision, Brier score
//! - Reliability bins and expected calibration error
//! - Percentile bootstrap confidence intervals

pub mod bootstrap;
pub mod calibration;
pub mod discrimination;

pub use bootstrap::{bootstrap_ci, quantile_indices, BootstrapConfig, ConfidenceInterval};
pub use calibration::{
    expected_calibration_error, reliability_bins, CalibrationBin, CalibrationReport,
    DEFAULT_N_BINS,
};
pub use discrimination::{
    average_precision, brier_score, roc_auc, DiscriminationMetrics, MetricsError, BRIER, PR_AUC,
    ROC_AUC,
};
