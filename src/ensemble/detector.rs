//! Trait for object detection inference backends.

use crate::detection::RawBox;

/// A borrowed image handed to every adapter of one request.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    /// Raw image bytes (format depends on the adapter)
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
}

impl<'a> Frame<'a> {
    pub fn new(pixels: &'a [u8], width: u32, height: u32) -> Self {
        Self {
            pixels,
            width,
            height,
        }
    }
}

/// Error type for adapter inference failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DetectorError {
    #[error("invalid input dimensions: expected {expected:?}, got {got:?}")]
    InvalidInputDimensions {
        expected: (u32, u32, u32),
        got: (u32, u32, u32),
    },
    #[error("preprocessing error: {0}")]
    Preprocessing(String),
    #[error("inference error: {0}")]
    Inference(String),
    #[error("postprocessing error: {0}")]
    Postprocessing(String),
    #[error("detector panicked: {0}")]
    Panicked(String),
    #[error("detector lock poisoned")]
    Poisoned,
}

/// Capability every loaded model exposes to the engine.
///
/// Implement this trait to plug any model family into the ensemble.
///
/// # Example
///
/// ```ignore
/// use ppe_ensemble::{Detector, DetectorError, Frame, RawBox};
///
/// struct MyDetector {
///     // Your model here
/// }
///
/// impl Detector for MyDetector {
///     fn infer(&mut self, frame: &Frame<'_>) -> Result<Vec<RawBox>, DetectorError> {
///         // Run inference and return (class, confidence, x1, y1, x2, y2) boxes
///         Ok(vec![])
///     }
/// }
/// ```
pub trait Detector: Send {
    /// Run inference on one image.
    ///
    /// Boxes are returned as the model produced them; validation happens in
    /// the coordinator.
    fn infer(&mut self, frame: &Frame<'_>) -> Result<Vec<RawBox>, DetectorError>;
}

impl<F> Detector for F
where
    F: FnMut(&Frame<'_>) -> Result<Vec<RawBox>, DetectorError> + Send,
{
    fn infer(&mut self, frame: &Frame<'_>) -> Result<Vec<RawBox>, DetectorError> {
        self(frame)
    }
}
