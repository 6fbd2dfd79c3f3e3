//! Builder for creating RawDetection objects from various box formats.

use crate::detection::bbox::BBox;
use crate::detection::category::Category;
use crate::detection::raw::{InvalidDetection, ModelId, RawDetection};

/// Builder for creating `RawDetection` objects.
///
/// `build` runs the same validation adapters' output goes through, so a
/// builder can never produce a detection the aggregator would reject.
#[derive(Debug, Clone)]
pub struct DetectionBuilder {
    category: Category,
    bbox: BBox,
    confidence: f32,
    model: ModelId,
}

impl DetectionBuilder {
    /// Create a new detection builder for the given category and source model.
    pub fn new(category: Category, model: impl Into<ModelId>) -> Self {
        Self {
            category,
            bbox: BBox::default(),
            confidence: 0.0,
            model: model.into(),
        }
    }

    /// Set bounding box in TLBR format (x1, y1, x2, y2).
    pub fn tlbr(mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        self.bbox = BBox::new(x1, y1, x2, y2);
        self
    }

    /// Set bounding box in XYWH format (center_x, center_y, width, height).
    pub fn xywh(mut self, cx: f32, cy: f32, w: f32, h: f32) -> Self {
        self.bbox = BBox::from_xywh(cx, cy, w, h);
        self
    }

    /// Set bounding box in TLWH format (left, top, width, height).
    pub fn tlwh(mut self, l: f32, t: f32, w: f32, h: f32) -> Self {
        self.bbox = BBox::from_tlwh(l, t, w, h);
        self
    }

    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Build the final `RawDetection`.
    pub fn build(self) -> Result<RawDetection, InvalidDetection> {
        let detection = RawDetection {
            category: self.category,
            confidence: self.confidence,
            bbox: self.bbox,
            source_model_id: self.model,
        };
        detection.validate()?;
        Ok(detection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_builder() {
        let det = DetectionBuilder::new(Category::Helmet, "best.pt")
            .tlbr(10.0, 20.0, 50.0, 80.0)
            .confidence(0.95)
            .build()
            .unwrap();

        assert_eq!(det.confidence, 0.95);
        assert_eq!(det.bbox.to_tlbr(), [10.0, 20.0, 50.0, 80.0]);
        assert_eq!(det.source_model_id.as_str(), "best.pt");
    }

    #[test]
    fn test_builder_box_formats_agree() {
        let a = DetectionBuilder::new(Category::Vest, "m")
            .xywh(30.0, 50.0, 40.0, 60.0)
            .confidence(0.5)
            .build()
            .unwrap();
        let b = DetectionBuilder::new(Category::Vest, "m")
            .tlwh(10.0, 20.0, 40.0, 60.0)
            .confidence(0.5)
            .build()
            .unwrap();
        assert_eq!(a.bbox, b.bbox);
    }

    #[test]
    fn test_builder_rejects_empty_box() {
        let err = DetectionBuilder::new(Category::Boots, "m").confidence(0.5).build();
        assert!(matches!(err, Err(InvalidDetection::DegenerateBox(_))));
    }
}
