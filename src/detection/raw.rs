//! Raw detector output and its validated form.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::detection::bbox::BBox;
use crate::detection::category::Category;

/// Identifier of a loaded detection model, e.g. `best.pt`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ModelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for ModelId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Detection exactly as an adapter reports it:
/// `(category_index, confidence, x1, y1, x2, y2)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawBox {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: [f32; 4],
}

impl RawBox {
    pub fn new(class_id: usize, confidence: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            class_id,
            confidence,
            bbox: [x1, y1, x2, y2],
        }
    }
}

impl From<(usize, f32, f32, f32, f32, f32)> for RawBox {
    fn from((class_id, confidence, x1, y1, x2, y2): (usize, f32, f32, f32, f32, f32)) -> Self {
        Self::new(class_id, confidence, x1, y1, x2, y2)
    }
}

/// Reasons a raw adapter box is rejected before aggregation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidDetection {
    #[error("unknown class index {0}")]
    UnknownClass(usize),
    #[error("confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f32),
    #[error("degenerate bounding box {0:?}")]
    DegenerateBox([f32; 4]),
}

/// A validated detection attributed to the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub category: Category,
    pub confidence: f32,
    pub bbox: BBox,
    pub source_model_id: ModelId,
}

impl RawDetection {
    /// Validate an adapter box and attribute it to `model`.
    pub fn from_raw(model: &ModelId, raw: RawBox) -> Result<Self, InvalidDetection> {
        let category =
            Category::from_index(raw.class_id).ok_or(InvalidDetection::UnknownClass(raw.class_id))?;
        let detection = Self {
            category,
            confidence: raw.confidence,
            bbox: BBox::from(raw.bbox),
            source_model_id: model.clone(),
        };
        detection.validate()?;
        Ok(detection)
    }

    /// Check confidence range and box shape.
    pub fn validate(&self) -> Result<(), InvalidDetection> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(InvalidDetection::ConfidenceOutOfRange(self.confidence));
        }
        if !self.bbox.is_valid() {
            return Err(InvalidDetection::DegenerateBox(self.bbox.to_tlbr()));
        }
        Ok(())
    }
}
