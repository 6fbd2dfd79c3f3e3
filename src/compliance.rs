mod classifier;
mod statistics;

pub use classifier::{
    Classification, ComplianceClassifier, ComplianceThresholds, DEFAULT_COMPLIANT_THRESHOLD,
    DEFAULT_WARNING_THRESHOLD, RequiredEquipment, ScoringMethod, effective_persons,
};
pub use statistics::{AlertType, ComplianceLevel, FrameStatistics};
