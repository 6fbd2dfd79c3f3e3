//! Payload and storage record produced for each processed frame.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::compliance::{AlertType, FrameStatistics};
use crate::detection::{BBox, Category};
use crate::ensemble::MergedDetection;
use crate::error::EngineError;

use super::engine::FrameOutcome;

/// Aggregation label stored for frames a single model answered.
pub const SINGLE_MODEL_METHOD: &str = "single";

/// One detection as the API layer reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionPayload {
    pub class_name: Category,
    pub confidence: f32,
    pub bbox: BBox,
    pub contributing_models: Vec<String>,
    pub num_votes: usize,
}

impl From<&MergedDetection> for DetectionPayload {
    fn from(m: &MergedDetection) -> Self {
        Self {
            class_name: m.category,
            confidence: m.confidence,
            bbox: m.bbox,
            contributing_models: m.contributing_models.iter().map(|id| id.to_string()).collect(),
            num_votes: m.num_votes,
        }
    }
}

/// Provenance of a payload, for auditing degraded results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub model_used: String,
    pub ensemble_mode: bool,
    /// Models that raised during inference and were left out.
    pub failed_models: Vec<String>,
    pub per_model_latency_ms: BTreeMap<String, f64>,
    /// Per-model category counts fed to the presence vote.
    pub model_votes: BTreeMap<String, BTreeMap<Category, u32>>,
    pub aggregation_method: String,
    pub invalid_detections: usize,
    pub below_threshold: usize,
}

/// Response for one frame. Errors are data at this boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalPayload {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub model_used: String,
    pub ensemble_mode: bool,
    pub detections: Vec<DetectionPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<FrameStatistics>,
    pub diagnostics: Diagnostics,
}

impl FinalPayload {
    /// True when at least one invoked model failed.
    pub fn is_degraded(&self) -> bool {
        !self.diagnostics.failed_models.is_empty()
    }
}

pub struct ResultAssembler;

impl ResultAssembler {
    pub fn assemble(outcome: &FrameOutcome) -> FinalPayload {
        let stats = &outcome.statistics;
        let run = &outcome.run;
        let diagnostics = Diagnostics {
            model_used: stats.model_used.clone(),
            ensemble_mode: stats.ensemble_mode,
            failed_models: run.failed_models.iter().map(|id| id.to_string()).collect(),
            per_model_latency_ms: run
                .per_model_latency_ms
                .iter()
                .map(|(id, ms)| (id.to_string(), *ms))
                .collect(),
            model_votes: outcome
                .model_votes
                .iter()
                .map(|(id, counts)| (id.to_string(), counts.iter().collect()))
                .collect(),
            aggregation_method: outcome
                .aggregation_method
                .map_or(SINGLE_MODEL_METHOD, |m| m.as_str())
                .to_string(),
            invalid_detections: run.invalid_detections,
            below_threshold: run.below_threshold,
        };

        FinalPayload {
            success: true,
            reason: None,
            model_used: stats.model_used.clone(),
            ensemble_mode: stats.ensemble_mode,
            detections: outcome.merged.iter().map(DetectionPayload::from).collect(),
            statistics: Some(stats.clone()),
            diagnostics,
        }
    }

    pub fn failure(error: &EngineError, ensemble_mode: bool) -> FinalPayload {
        FinalPayload {
            success: false,
            reason: Some(error.to_string()),
            model_used: String::new(),
            ensemble_mode,
            detections: Vec::new(),
            statistics: None,
            diagnostics: Diagnostics {
                ensemble_mode,
                ..Diagnostics::default()
            },
        }
    }
}

/// Row handed to the storage collaborator, one per successful frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub total_persons: u32,
    pub with_helmet: u32,
    pub with_vest: u32,
    pub with_glasses: u32,
    pub with_boots: u32,
    pub compliance_rate: f64,
    pub alert_type: AlertType,
    pub model_used: String,
    pub ensemble_mode: bool,
    /// JSON object of per-model category counts.
    pub model_votes: String,
    pub aggregation_method: String,
}

impl FrameRecord {
    /// `None` for failed payloads, which carry no statistics to store.
    pub fn from_payload(payload: &FinalPayload) -> Result<Option<Self>, serde_json::Error> {
        let Some(stats) = payload.statistics.as_ref().filter(|_| payload.success) else {
            return Ok(None);
        };
        Ok(Some(Self {
            total_persons: stats.total_persons,
            with_helmet: stats.with_helmet,
            with_vest: stats.with_vest,
            with_glasses: stats.with_glasses,
            with_boots: stats.with_boots,
            compliance_rate: stats.compliance_rate,
            alert_type: stats.alert_type,
            model_used: stats.model_used.clone(),
            ensemble_mode: stats.ensemble_mode,
            model_votes: serde_json::to_string(&payload.diagnostics.model_votes)?,
            aggregation_method: payload.diagnostics.aggregation_method.clone(),
        }))
    }
}
