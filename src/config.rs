//! Engine configuration: built-in defaults, an optional TOML file, then
//! environment overrides, then validation.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::compliance::{
    ComplianceClassifier, ComplianceThresholds, DEFAULT_COMPLIANT_THRESHOLD,
    DEFAULT_WARNING_THRESHOLD, RequiredEquipment, ScoringMethod,
};
use crate::detection::{Category, ModelId};
use crate::ensemble::{AggregationMethod, RoundingPolicy};
use crate::error::ConfigError;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
pub const DEFAULT_MIN_VOTES: usize = 2;
pub const DEFAULT_LATENCY_LOG_CAPACITY: usize = 256;
pub const DEFAULT_MODEL_WEIGHT: f32 = 1.0;

/// Trust assigned to each model, validated once at startup.
///
/// Models without an explicit entry weigh [`DEFAULT_MODEL_WEIGHT`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelWeights {
    weights: BTreeMap<ModelId, f32>,
}

impl ModelWeights {
    pub fn new<I, K>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, f32)>,
        K: Into<ModelId>,
    {
        let mut weights = BTreeMap::new();
        for (model, weight) in entries {
            let model = model.into();
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::InvalidWeight { model, weight });
            }
            weights.insert(model, weight);
        }
        Ok(Self { weights })
    }

    pub fn weight(&self, model: &ModelId) -> f32 {
        self.weights
            .get(model)
            .copied()
            .unwrap_or(DEFAULT_MODEL_WEIGHT)
    }

    /// Reject entries naming models that are not loaded.
    pub fn validate_against<'a, I>(&self, known: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = &'a ModelId>,
    {
        let known: Vec<&ModelId> = known.into_iter().collect();
        match self.weights.keys().find(|id| !known.contains(id)) {
            Some(unknown) => Err(ConfigError::UnknownModel(unknown.clone())),
            None => Ok(()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ModelId, f32)> {
        self.weights.iter().map(|(id, w)| (id, *w))
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EngineConfigFile {
    primary_model: Option<String>,
    model_weights: Option<BTreeMap<String, f32>>,
    ensemble: Option<EnsembleConfigFile>,
    detection: Option<DetectionConfigFile>,
    compliance: Option<ComplianceConfigFile>,
    diagnostics: Option<DiagnosticsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EnsembleConfigFile {
    enabled: Option<bool>,
    camera: Option<bool>,
    aggregation_method: Option<AggregationMethod>,
    min_votes: Option<usize>,
    rounding_policy: Option<RoundingPolicy>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectionConfigFile {
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ComplianceConfigFile {
    compliant_threshold: Option<f64>,
    warning_threshold: Option<f64>,
    scoring: Option<ScoringMethod>,
    required: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DiagnosticsConfigFile {
    latency_log_capacity: Option<usize>,
}

/// Validated configuration consumed by [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub model_weights: ModelWeights,
    /// Model used in single-model mode; the first registered one when unset.
    pub primary_model: Option<ModelId>,
    /// Master switch; ensemble mode never runs when false.
    pub ensemble_enabled: bool,
    /// Default mode for camera frames, which favor latency.
    pub camera_ensemble: bool,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub aggregation_method: AggregationMethod,
    pub min_votes: usize,
    pub rounding_policy: RoundingPolicy,
    pub compliance: ComplianceSettings,
    pub latency_log_capacity: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ComplianceSettings {
    pub thresholds: ComplianceThresholds,
    pub required: RequiredEquipment,
    pub scoring: ScoringMethod,
}

impl ComplianceSettings {
    pub fn classifier(&self) -> ComplianceClassifier {
        ComplianceClassifier::new(self.thresholds, self.required.clone(), self.scoring)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_weights: ModelWeights::default(),
            primary_model: None,
            ensemble_enabled: true,
            camera_ensemble: false,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            aggregation_method: AggregationMethod::default(),
            min_votes: DEFAULT_MIN_VOTES,
            rounding_policy: RoundingPolicy::default(),
            compliance: ComplianceSettings::default(),
            latency_log_capacity: DEFAULT_LATENCY_LOG_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Load from `PPE_CONFIG` (when set), then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("PPE_CONFIG").ok();
        Self::load_from(path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (or defaults when `None`), then apply
    /// environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => EngineConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env_with(|var| std::env::var(var).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document without touching the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let file_cfg: EngineConfigFile =
            toml::from_str(raw).map_err(|source| ConfigError::Parse {
                path: "<inline>".into(),
                source,
            })?;
        let cfg = Self::from_file(file_cfg)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EngineConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let ensemble = file.ensemble.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let compliance = file.compliance.unwrap_or_default();

        let model_weights = match file.model_weights {
            Some(weights) => ModelWeights::new(weights)?,
            None => defaults.model_weights,
        };
        let thresholds = ComplianceThresholds::new(
            compliance
                .compliant_threshold
                .unwrap_or(DEFAULT_COMPLIANT_THRESHOLD),
            compliance
                .warning_threshold
                .unwrap_or(DEFAULT_WARNING_THRESHOLD),
        )?;
        let required = match compliance.required {
            Some(required) => {
                let entries = required
                    .into_iter()
                    .map(|(name, weight)| Ok((name.parse::<Category>()?, weight)))
                    .collect::<Result<Vec<_>, ConfigError>>()?;
                RequiredEquipment::new(entries)?
            }
            None => RequiredEquipment::default(),
        };

        Ok(Self {
            model_weights,
            primary_model: file.primary_model.map(ModelId::from),
            ensemble_enabled: ensemble.enabled.unwrap_or(defaults.ensemble_enabled),
            camera_ensemble: ensemble.camera.unwrap_or(defaults.camera_ensemble),
            confidence_threshold: detection
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            iou_threshold: detection.iou_threshold.unwrap_or(defaults.iou_threshold),
            aggregation_method: ensemble
                .aggregation_method
                .unwrap_or(defaults.aggregation_method),
            min_votes: ensemble.min_votes.unwrap_or(defaults.min_votes),
            rounding_policy: ensemble.rounding_policy.unwrap_or(defaults.rounding_policy),
            compliance: ComplianceSettings {
                thresholds,
                required,
                scoring: compliance.scoring.unwrap_or_default(),
            },
            latency_log_capacity: file
                .diagnostics
                .and_then(|d| d.latency_log_capacity)
                .unwrap_or(defaults.latency_log_capacity),
        })
    }

    /// Apply `PPE_*` overrides using `lookup` to read variables.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(value) = get("PPE_ENSEMBLE_ENABLED") {
            self.ensemble_enabled = parse_env("PPE_ENSEMBLE_ENABLED", &value, parse_bool)?;
        }
        if let Some(value) = get("PPE_CAMERA_ENSEMBLE") {
            self.camera_ensemble = parse_env("PPE_CAMERA_ENSEMBLE", &value, parse_bool)?;
        }
        if let Some(value) = get("PPE_CONFIDENCE_THRESHOLD") {
            self.confidence_threshold =
                parse_env("PPE_CONFIDENCE_THRESHOLD", &value, |v| v.trim().parse().ok())?;
        }
        if let Some(value) = get("PPE_IOU_THRESHOLD") {
            self.iou_threshold =
                parse_env("PPE_IOU_THRESHOLD", &value, |v| v.trim().parse().ok())?;
        }
        if let Some(value) = get("PPE_PRIMARY_MODEL") {
            self.primary_model = Some(ModelId::new(value.trim()));
        }
        if let Some(value) = get("PPE_AGGREGATION_METHOD") {
            self.aggregation_method =
                parse_env("PPE_AGGREGATION_METHOD", &value, |v| v.parse().ok())?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::OutOfRange {
                field: "confidence_threshold",
                value: f64::from(self.confidence_threshold),
            });
        }
        if !(self.iou_threshold > 0.0 && self.iou_threshold <= 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "iou_threshold",
                value: f64::from(self.iou_threshold),
            });
        }
        if self.min_votes == 0 {
            return Err(ConfigError::OutOfRange {
                field: "min_votes",
                value: 0.0,
            });
        }
        if self.latency_log_capacity == 0 {
            return Err(ConfigError::OutOfRange {
                field: "latency_log_capacity",
                value: 0.0,
            });
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<EngineConfigFile, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_env<T>(
    var: &'static str,
    value: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, ConfigError> {
    parse(value).ok_or_else(|| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
    })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
