//! Cost model and threshold optimizer.

pub mod threshold;

pub use threshold::{
    best_of, expected_cost, select_threshold, sweep, ConfusionCounts, CostError, CostModel,
    ThresholdCost, ThresholdDecision,
};
