//! Configuration files.

pub mod settings;

pub use settings::{
    AblationConfig, CalibrationConfig, ConfigError, DataConfig, EvalConfig, OutputConfig,
    RollingConfig,
};
