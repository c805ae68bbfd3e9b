//! Walk-forward evaluation.
//!
//! Expanding windows over time buckets with train/validate/test splits:
//! - Train: every bucket before the validation bucket
//! - Validate: the bucket just before the test bucket (threshold selection)
//! - Test: one held-out bucket
//! - Roll: one bucket per window

pub mod scheduler;
pub mod windows;

pub use scheduler::{
    summarize_windows, RollingRun, WalkForwardError, WalkForwardScheduler, WindowFailure,
    WindowResult, DEFAULT_MIN_TRAIN,
};
pub use windows::{WalkForwardWindow, WalkForwardWindows};
