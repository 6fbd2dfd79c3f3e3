//! Burn inference backend for PPE detection models.
//!
//! `BurnDetector` wraps any model implementing [`BurnModel`] and exposes it
//! to the ensemble as a [`Detector`].
//!
//! # Example
//!
//! ```ignore
//! use ppe_ensemble::ensemble::{BurnDetector, BurnModel, ModelOutput};
//! use burn::backend::NdArray;
//!
//! struct MyYoloModel { /* ... */ }
//!
//! impl BurnModel<NdArray> for MyYoloModel {
//!     fn forward(&self, input: burn::tensor::Tensor<NdArray, 4>) -> Vec<ModelOutput> {
//!         // Run inference
//!     }
//! }
//!
//! let detector = BurnDetector::new(MyYoloModel::load("best.bin"), Default::default());
//! registry.register("best.bin", detector);
//! ```

use burn::prelude::*;
use burn::tensor::Tensor;

use crate::detection::{BBox, RawBox};

use super::detector::{Detector, DetectorError, Frame};

/// One box as the network emits it, before thresholding.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// `[x1, y1, x2, y2]` or `[cx, cy, w, h]` depending on the model
    pub bbox: [f32; 4],
    pub score: f32,
    /// Index in the PPE class order
    pub class_id: usize,
}

/// Trait for Burn-based detection models.
pub trait BurnModel<B: Backend>: Send + Sync {
    /// Run a forward pass on a `[batch, channels, height, width]` tensor.
    fn forward(&self, input: Tensor<B, 4>) -> Vec<ModelOutput>;

    /// Expected input size (channels, height, width).
    fn input_size(&self) -> (u32, u32, u32) {
        (3, 640, 640)
    }

    /// Whether bbox output is in XYWH format (vs TLBR).
    fn bbox_is_xywh(&self) -> bool {
        true
    }
}

pub struct BurnDetector<B: Backend, M: BurnModel<B>> {
    model: M,
    device: B::Device,
    conf_threshold: f32,
}

impl<B: Backend, M: BurnModel<B>> BurnDetector<B, M> {
    pub fn new(model: M, device: B::Device) -> Self {
        Self {
            model,
            device,
            conf_threshold: 0.0,
        }
    }

    /// Drop boxes below `threshold` before they reach the coordinator.
    pub fn with_conf_threshold(mut self, threshold: f32) -> Self {
        self.conf_threshold = threshold;
        self
    }

    /// Convert interleaved RGB bytes to a normalized `[1, C, H, W]` tensor.
    pub fn preprocess(&self, frame: &Frame<'_>) -> Result<Tensor<B, 4>, DetectorError> {
        let (channels, target_h, target_w) = self.model.input_size();
        let expected_len = input_len(channels, frame.height, frame.width);

        if expected_len != Some(frame.pixels.len()) {
            let row_len = (frame.height as usize).saturating_mul(channels as usize).max(1);
            let got_width = u32::try_from(frame.pixels.len() / row_len).unwrap_or(u32::MAX);
            return Err(DetectorError::InvalidInputDimensions {
                expected: (channels, frame.height, frame.width),
                got: (channels, frame.height, got_width),
            });
        }
        // TODO: letterbox-resize instead of requiring the model's input size.
        if frame.height != target_h || frame.width != target_w {
            return Err(DetectorError::Preprocessing(format!(
                "input size {}x{} doesn't match model size {}x{}",
                frame.width, frame.height, target_w, target_h
            )));
        }

        let data: Vec<f32> = frame.pixels.iter().map(|&x| x as f32 / 255.0).collect();
        Ok(Tensor::<B, 1>::from_floats(data.as_slice(), &self.device).reshape([
            1,
            channels as usize,
            frame.height as usize,
            frame.width as usize,
        ]))
    }

    fn postprocess(&self, outputs: Vec<ModelOutput>) -> Vec<RawBox> {
        outputs
            .into_iter()
            .filter(|o| o.score >= self.conf_threshold)
            .map(|o| {
                let [a, b, c, d] = o.bbox;
                let bbox = if self.model.bbox_is_xywh() {
                    BBox::from_xywh(a, b, c, d)
                } else {
                    BBox::new(a, b, c, d)
                };
                RawBox {
                    class_id: o.class_id,
                    confidence: o.score,
                    bbox: bbox.to_tlbr(),
                }
            })
            .collect()
    }
}

/// Byte length of a `channels × height × width` image, `None` on overflow.
fn input_len(channels: u32, height: u32, width: u32) -> Option<usize> {
    (channels as usize)
        .checked_mul(height as usize)?
        .checked_mul(width as usize)
}

impl<B: Backend, M: BurnModel<B>> Detector for BurnDetector<B, M> {
    fn infer(&mut self, frame: &Frame<'_>) -> Result<Vec<RawBox>, DetectorError> {
        let tensor = self.preprocess(frame)?;
        let outputs = self.model.forward(tensor);
        Ok(self.postprocess(outputs))
    }
}
