use std::io::Write;

use ppe_ensemble::compliance::{AlertType, ComplianceLevel};
use ppe_ensemble::{
    AggregationMethod, Category, Detector, DetectorError, DetectorRegistry, Engine, EngineConfig,
    Frame, FrameRecord, ModelWeights, RawBox,
};

struct MockDetector {
    boxes: Vec<RawBox>,
}

impl Detector for MockDetector {
    fn infer(&mut self, _frame: &Frame<'_>) -> Result<Vec<RawBox>, DetectorError> {
        Ok(self.boxes.clone())
    }
}

struct BrokenDetector;

impl Detector for BrokenDetector {
    fn infer(&mut self, _frame: &Frame<'_>) -> Result<Vec<RawBox>, DetectorError> {
        Err(DetectorError::Inference("weights file corrupted".into()))
    }
}

fn mock(boxes: &[(usize, f32, f32, f32, f32, f32)]) -> MockDetector {
    MockDetector {
        boxes: boxes.iter().copied().map(RawBox::from).collect(),
    }
}

const FRAME: Frame<'static> = Frame {
    pixels: &[],
    width: 640,
    height: 640,
};

#[test]
fn test_two_model_end_to_end() {
    let mut registry = DetectorRegistry::new();
    // class indices: 0 helmet, 2 person
    registry.register(
        "a.pt",
        mock(&[(2, 0.9, 0.0, 0.0, 10.0, 10.0), (0, 0.8, 1.0, 1.0, 5.0, 5.0)]),
    );
    registry.register("b.pt", mock(&[(2, 0.85, 1.0, 1.0, 11.0, 11.0)]));
    let config = EngineConfig {
        model_weights: ModelWeights::new([("a.pt", 0.6), ("b.pt", 0.4)]).unwrap(),
        iou_threshold: 0.45,
        ..EngineConfig::default()
    };
    let engine = Engine::new(registry, config).unwrap();

    let payload = engine.process(&FRAME, true);
    assert!(payload.success);
    assert!(payload.ensemble_mode);
    assert!(!payload.is_degraded());
    assert_eq!(payload.detections.len(), 2);

    let person = payload
        .detections
        .iter()
        .find(|d| d.class_name == Category::Person)
        .unwrap();
    assert!(person.confidence >= 0.85 && person.confidence <= 0.9);
    assert_eq!(person.contributing_models, ["a.pt", "b.pt"]);

    let helmet = payload
        .detections
        .iter()
        .find(|d| d.class_name == Category::Helmet)
        .unwrap();
    assert_eq!(helmet.contributing_models, ["a.pt"]);
    assert_eq!(helmet.confidence, 0.8);
    assert_eq!(helmet.bbox.to_tlbr(), [1.0, 1.0, 5.0, 5.0]);

    let stats = payload.statistics.as_ref().unwrap();
    assert_eq!(stats.total_persons, 1);
    assert_eq!(stats.with_helmet, 1);
    assert_eq!(stats.compliance_rate, 100.0);
    assert_eq!(stats.compliance_level, ComplianceLevel::Compliant);
    assert_eq!(stats.alert_type, AlertType::None);
    assert_eq!(stats.model_used, "ensemble:a.pt,b.pt");
    assert!(stats.total_ms >= stats.inference_ms);

    let record = FrameRecord::from_payload(&payload).unwrap().unwrap();
    assert!(record.ensemble_mode);
    assert_eq!(record.aggregation_method, "weighted_fusion");
}

#[test]
fn test_single_adapter_ensemble_reproduces_raw_output() {
    let boxes = [
        (2, 0.9, 0.0, 0.0, 10.0, 10.0),
        (2, 0.7, 0.5, 0.5, 10.5, 10.5),
        (3, 0.6, 2.0, 2.0, 8.0, 9.0),
    ];
    let mut registry = DetectorRegistry::new();
    registry.register("best.pt", mock(&boxes));
    let engine = Engine::new(registry, EngineConfig::default()).unwrap();

    let payload = engine.process(&FRAME, true);
    assert!(payload.success);
    assert!(!payload.ensemble_mode);
    assert_eq!(payload.model_used, "best.pt");
    assert_eq!(payload.diagnostics.aggregation_method, "single");

    let mut got: Vec<(Category, f32, [f32; 4])> = payload
        .detections
        .iter()
        .map(|d| (d.class_name, d.confidence, d.bbox.to_tlbr()))
        .collect();
    got.sort_by(|a, b| b.1.total_cmp(&a.1));
    let expected: Vec<(Category, f32, [f32; 4])> = boxes
        .iter()
        .map(|&(c, conf, x1, y1, x2, y2)| {
            (Category::from_index(c).unwrap(), conf, [x1, y1, x2, y2])
        })
        .collect();
    assert_eq!(got, expected);
    assert!(payload.detections.iter().all(|d| d.num_votes == 1));
}

#[test]
fn test_no_models_yields_failed_payload() {
    let engine = Engine::new(DetectorRegistry::new(), EngineConfig::default()).unwrap();
    let payload = engine.process(&FRAME, true);
    assert!(!payload.success);
    assert!(payload.reason.is_some());
    assert!(payload.statistics.is_none());
    assert!(payload.ensemble_mode);

    let value = serde_json::to_value(&payload).unwrap();
    assert_eq!(value["success"], false);
    assert!(value.get("statistics").is_none());
}

#[test]
fn test_failed_model_is_excluded_and_reported() {
    let mut registry = DetectorRegistry::new();
    registry.register("a.pt", mock(&[(2, 0.9, 0.0, 0.0, 10.0, 10.0)]));
    registry.register("b.pt", BrokenDetector);
    registry.register("c.pt", mock(&[(2, 0.8, 0.0, 0.0, 10.0, 10.0)]));
    let engine = Engine::new(registry, EngineConfig::default()).unwrap();

    let payload = engine.process(&FRAME, true);
    assert!(payload.success);
    assert!(payload.is_degraded());
    assert_eq!(payload.diagnostics.failed_models, ["b.pt"]);
    assert_eq!(payload.model_used, "ensemble:a.pt,c.pt");
    assert_eq!(payload.detections.len(), 1);
    assert_eq!(payload.diagnostics.per_model_latency_ms.len(), 3);
    // no helmet on the only person
    let stats = payload.statistics.unwrap();
    assert_eq!(stats.compliance_level, ComplianceLevel::Critical);
    assert_eq!(stats.alert_type, AlertType::Critical);
}

#[test]
fn test_invalid_boxes_are_dropped_not_fatal() {
    let mut registry = DetectorRegistry::new();
    registry.register(
        "best.pt",
        mock(&[
            (2, 0.9, 0.0, 0.0, 10.0, 10.0),
            (0, 1.5, 1.0, 1.0, 5.0, 5.0),
            (0, 0.9, 5.0, 5.0, 1.0, 1.0),
            (11, 0.9, 1.0, 1.0, 5.0, 5.0),
        ]),
    );
    let engine = Engine::new(registry, EngineConfig::default()).unwrap();
    let payload = engine.process(&FRAME, false);
    assert!(payload.success);
    assert_eq!(payload.detections.len(), 1);
    assert_eq!(payload.diagnostics.invalid_detections, 3);
}

#[test]
fn test_weighted_voting_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
primary_model = "a.pt"

[model_weights]
"a.pt" = 0.6
"b.pt" = 0.4

[ensemble]
aggregation_method = "weighted_voting"
min_votes = 2

[compliance]
required = {{ helmet = 1.0, vest = 1.0 }}
"#
    )
    .unwrap();
    let config = EngineConfig::load_from(Some(file.path())).unwrap();
    assert_eq!(config.aggregation_method, AggregationMethod::WeightedVoting);

    let mut registry = DetectorRegistry::new();
    registry.register(
        "a.pt",
        mock(&[(2, 0.9, 0.0, 0.0, 10.0, 10.0), (3, 0.7, 1.0, 3.0, 9.0, 8.0)]),
    );
    registry.register(
        "b.pt",
        mock(&[(2, 0.8, 0.5, 0.0, 10.5, 10.0), (0, 0.6, 2.0, 0.0, 6.0, 2.0)]),
    );
    let engine = Engine::new(registry, config).unwrap();

    let payload = engine.process(&FRAME, true);
    // vest and helmet were each seen by one model only
    assert_eq!(payload.detections.len(), 1);
    let stats = payload.statistics.unwrap();
    assert_eq!(stats.total_persons, 1);
    assert_eq!(stats.with_vest, 0);
    assert_eq!(stats.with_helmet, 0);
    assert_eq!(stats.compliance_level, ComplianceLevel::Critical);
    assert_eq!(payload.diagnostics.aggregation_method, "weighted_voting");
}

#[test]
fn test_unknown_weight_in_config_is_rejected() {
    let config = EngineConfig::from_toml_str(
        r#"
[model_weights]
"ghost.pt" = 1.0
"#,
    )
    .unwrap();
    let mut registry = DetectorRegistry::new();
    registry.register("best.pt", mock(&[]));
    assert!(Engine::new(registry, config).is_err());
}
