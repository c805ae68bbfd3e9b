//! Reporting: persisted artifacts and optional run tracking.

pub mod artifacts;
pub mod observer;

pub use artifacts::{ablation_table, rolling_table, ArtifactError, ArtifactStore, RunManifest, UNDEFINED};
pub use observer::{JsonlObserver, NoopObserver, RunObserver};
