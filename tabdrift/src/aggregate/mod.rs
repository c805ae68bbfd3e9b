//! Aggregation of repeated stochastic runs.

pub mod seeds;

pub use seeds::{aggregate, AggregateError, MetricRecord, SeedAggregate, SeedRun};
