//! End-to-end processing of one frame, from adapters to the final payload.

mod assembler;
mod engine;

pub use assembler::{DetectionPayload, Diagnostics, FinalPayload, FrameRecord, ResultAssembler};
pub use engine::{Engine, FrameOutcome, FrameSource};
