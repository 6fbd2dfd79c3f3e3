//! Engine combining model invocation, aggregation, voting and classification.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard};
use std::time::Instant;

use crate::compliance::{ComplianceClassifier, FrameStatistics};
use crate::config::{EngineConfig, ModelWeights};
use crate::detection::{Category, CategoryCounts, ModelId};
use crate::ensemble::{
    AggregationMethod, BoxAggregator, CoordinatorRun, DetectorRegistry, EnsembleCoordinator,
    Frame, MergedDetection, PresenceReport, PresenceVoter, passthrough, report_from_counts,
};
use crate::error::{ConfigError, EngineError};

use super::assembler::{FinalPayload, ResultAssembler};

/// Where a frame came from. Camera frames default to single-model mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSource {
    Upload,
    Camera,
}

/// Everything the engine derived from one frame.
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    /// Merged detections, highest confidence first.
    pub merged: Vec<MergedDetection>,
    pub statistics: FrameStatistics,
    pub run: CoordinatorRun,
    /// Per-model category counts that went into the presence vote.
    pub model_votes: BTreeMap<ModelId, CategoryCounts>,
    /// `None` when a single model answered and nothing was aggregated.
    pub aggregation_method: Option<AggregationMethod>,
}

/// A configured detection engine.
///
/// The registry and configuration are fixed at construction. Model weights
/// may be swapped between requests with [`Engine::reload_weights`].
pub struct Engine {
    registry: DetectorRegistry,
    config: EngineConfig,
    weights: RwLock<ModelWeights>,
    coordinator: EnsembleCoordinator,
    aggregator: BoxAggregator,
    voter: PresenceVoter,
    classifier: ComplianceClassifier,
}

impl Engine {
    /// Create an engine over `registry`.
    ///
    /// Fails when the configuration names a primary model or weights a model
    /// that is not registered.
    pub fn new(mut registry: DetectorRegistry, config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        config.model_weights.validate_against(registry.ids())?;
        if let Some(primary) = &config.primary_model {
            registry.set_primary(primary)?;
        }

        log::info!(
            "engine ready: {} model(s), ensemble {}, aggregation {}",
            registry.len(),
            if config.ensemble_enabled { "enabled" } else { "disabled" },
            config.aggregation_method.as_str()
        );

        Ok(Self {
            coordinator: EnsembleCoordinator::new(
                config.confidence_threshold,
                config.latency_log_capacity,
            ),
            aggregator: BoxAggregator::new(
                config.aggregation_method,
                config.iou_threshold,
                config.min_votes,
            ),
            voter: PresenceVoter::new(config.rounding_policy),
            classifier: config.compliance.classifier(),
            weights: RwLock::new(config.model_weights.clone()),
            registry,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    pub fn coordinator(&self) -> &EnsembleCoordinator {
        &self.coordinator
    }

    /// Snapshot of the weights currently in effect.
    pub fn weights(&self) -> ModelWeights {
        self.read_weights().clone()
    }

    /// Replace the model weights. Requests already running keep the old set.
    pub fn reload_weights(&self, weights: ModelWeights) -> Result<(), ConfigError> {
        weights.validate_against(self.registry.ids())?;
        let mut guard = self.weights.write().unwrap_or_else(|p| p.into_inner());
        *guard = weights;
        log::info!("model weights reloaded");
        Ok(())
    }

    /// Decide the mode for a frame. `requested` overrides the per-source
    /// default but never enables ensemble mode when it is switched off.
    pub fn ensemble_mode_for(&self, source: FrameSource, requested: Option<bool>) -> bool {
        if !self.config.ensemble_enabled {
            return false;
        }
        requested.unwrap_or(match source {
            FrameSource::Upload => true,
            FrameSource::Camera => self.config.camera_ensemble,
        })
    }

    /// Process a frame and return the payload for the API layer. Never fails;
    /// fatal errors become `success = false`.
    pub fn process(&self, frame: &Frame<'_>, ensemble_mode: bool) -> FinalPayload {
        match self.analyze(frame, ensemble_mode) {
            Ok(outcome) => ResultAssembler::assemble(&outcome),
            Err(e) => ResultAssembler::failure(&e, ensemble_mode),
        }
    }

    /// Run every stage on one frame.
    pub fn analyze(&self, frame: &Frame<'_>, ensemble_mode: bool) -> Result<FrameOutcome, EngineError> {
        let start = Instant::now();
        let run = self.coordinator.run(&self.registry, frame, ensemble_mode)?;
        let weights = self.read_weights();

        let raw = run.all_detections();
        let merged = if run.ensemble_mode {
            self.aggregator.aggregate(&raw, &weights)
        } else {
            passthrough(&raw)
        };

        let model_votes = run.per_model_counts();
        let counts = if run.ensemble_mode {
            let reports: BTreeMap<ModelId, PresenceReport> = model_votes
                .iter()
                .map(|(id, counts)| (id.clone(), report_from_counts(counts)))
                .collect();
            let voted = self.voter.vote(&reports, &weights);
            cap_to_merged(voted, &merged)
        } else {
            CategoryCounts::tally(merged.iter().map(|m| m.category))
        };
        drop(weights);

        let classification = self.classifier.classify(&counts);
        let statistics = FrameStatistics {
            total_persons: classification.persons,
            with_helmet: counts[Category::Helmet],
            with_vest: counts[Category::Vest],
            with_glasses: counts[Category::Glasses],
            with_boots: counts[Category::Boots],
            compliance_rate: classification.compliance_rate,
            compliance_level: classification.compliance_level,
            alert_type: classification.alert_type,
            model_used: self.model_used(&run),
            ensemble_mode: run.ensemble_mode,
            inference_ms: run.inference_ms(),
            total_ms: start.elapsed().as_secs_f64() * 1000.0,
        };

        log::info!(
            "frame: {} detections, {} persons, compliance {:.1}% ({}), model {}",
            merged.len(),
            statistics.total_persons,
            statistics.compliance_rate,
            statistics.alert_type.as_str(),
            statistics.model_used
        );

        let aggregation_method = run.ensemble_mode.then(|| self.aggregator.method());
        Ok(FrameOutcome {
            merged,
            statistics,
            run,
            model_votes,
            aggregation_method,
        })
    }

    fn model_used(&self, run: &CoordinatorRun) -> String {
        if run.ensemble_mode {
            let ids: Vec<&str> = run.models_used().map(ModelId::as_str).collect();
            format!("ensemble:{}", ids.join(","))
        } else {
            self.registry
                .primary()
                .map(|(id, _)| id.to_string())
                .unwrap_or_default()
        }
    }

    fn read_weights(&self) -> RwLockReadGuard<'_, ModelWeights> {
        self.weights.read().unwrap_or_else(|p| p.into_inner())
    }
}

// A vote never claims more objects than the fused view holds.
fn cap_to_merged(mut voted: CategoryCounts, merged: &[MergedDetection]) -> CategoryCounts {
    let fused = CategoryCounts::tally(merged.iter().map(|m| m.category));
    for category in Category::ALL {
        voted[category] = voted[category].min(fused[category]);
    }
    voted
}
