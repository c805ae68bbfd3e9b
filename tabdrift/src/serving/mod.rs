//! Single-row scoring against saved models.

pub mod cache;

pub use cache::{ModelCache, Prediction};
