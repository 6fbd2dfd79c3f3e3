//! Ensemble aggregation of PPE detections and per-frame safety compliance.
//!
//! Several detectors look at the same image. Their boxes are fused per
//! category, presence of each piece of equipment is voted across models, and
//! the frame is classified into a compliance level and alert.
//!
//! ```ignore
//! use ppe_ensemble::{DetectorRegistry, Engine, EngineConfig, Frame};
//!
//! let mut registry = DetectorRegistry::new();
//! registry.register("best.pt", my_detector);
//! let engine = Engine::new(registry, EngineConfig::load()?)?;
//! let payload = engine.process(&Frame::new(&pixels, 640, 640), true);
//! ```

pub mod compliance;
pub mod config;
pub mod detection;
pub mod ensemble;
pub mod error;
pub mod pipeline;

pub use compliance::{AlertType, ComplianceClassifier, ComplianceLevel, FrameStatistics};
pub use config::{EngineConfig, ModelWeights};
pub use detection::{BBox, Category, CategoryCounts, ModelId, RawBox, RawDetection};
pub use ensemble::{
    AggregationMethod, BoxAggregator, Detector, DetectorError, DetectorRegistry,
    EnsembleCoordinator, Frame, MergedDetection, PresenceVoter, RoundingPolicy,
};
pub use error::{ConfigError, EngineError};
pub use pipeline::{Engine, FinalPayload, FrameRecord, FrameSource, ResultAssembler};
