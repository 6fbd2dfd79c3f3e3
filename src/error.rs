use std::path::PathBuf;

use crate::detection::{Category, ModelId, UnknownCategory};

/// Errors raised while building or validating an [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{var} has invalid value '{value}'")]
    InvalidEnv { var: &'static str, value: String },
    #[error("weight for model '{model}' must be a finite value >= 0, got {weight}")]
    InvalidWeight { model: ModelId, weight: f32 },
    #[error("weight configured for unknown model '{0}'")]
    UnknownModel(ModelId),
    #[error("primary model '{0}' is not registered")]
    UnknownPrimary(ModelId),
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("warning threshold {warning} exceeds compliant threshold {compliant}")]
    InvertedThresholds { compliant: f64, warning: f64 },
    #[error("'{0}' cannot be required equipment")]
    NotEquipment(Category),
    #[error(transparent)]
    UnknownCategory(#[from] UnknownCategory),
    #[error("at least one equipment category must carry a positive requirement weight")]
    NoRequiredEquipment,
}

/// Fatal engine failures. Everything else is recovered inside the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("no detection model is loaded")]
    ModelUnavailable,
}
