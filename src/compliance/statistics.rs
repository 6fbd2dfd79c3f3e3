use serde::{Deserialize, Serialize};

/// Compliance band of a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceLevel {
    Compliant,
    Warning,
    Critical,
}

/// Alert raised for a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    None,
    Info,
    Warning,
    Critical,
}

impl AlertType {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertType::None => "none",
            AlertType::Info => "info",
            AlertType::Warning => "warning",
            AlertType::Critical => "critical",
        }
    }
}

/// Per-frame statistics handed to the API and storage collaborators.
///
/// A record is built once per processed frame and never mutated; the next
/// frame produces a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameStatistics {
    pub total_persons: u32,
    pub with_helmet: u32,
    pub with_vest: u32,
    pub with_glasses: u32,
    pub with_boots: u32,
    /// Score in `[0, 100]`.
    pub compliance_rate: f64,
    pub compliance_level: ComplianceLevel,
    pub alert_type: AlertType,
    pub model_used: String,
    pub ensemble_mode: bool,
    pub inference_ms: f64,
    pub total_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_field_names() {
        let stats = FrameStatistics {
            total_persons: 1,
            with_helmet: 1,
            with_vest: 0,
            with_glasses: 0,
            with_boots: 0,
            compliance_rate: 100.0,
            compliance_level: ComplianceLevel::Compliant,
            alert_type: AlertType::None,
            model_used: "best.pt".into(),
            ensemble_mode: false,
            inference_ms: 12.5,
            total_ms: 13.0,
        };
        let value = serde_json::to_value(&stats).unwrap();
        for key in [
            "total_persons",
            "with_helmet",
            "with_vest",
            "with_glasses",
            "with_boots",
            "compliance_rate",
            "compliance_level",
            "alert_type",
            "model_used",
            "ensemble_mode",
            "inference_ms",
            "total_ms",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["compliance_level"], "compliant");
        assert_eq!(value["alert_type"], "none");
    }
}
