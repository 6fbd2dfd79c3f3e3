//! Detection primitives shared by every stage of the engine.

mod bbox;
mod builder;
mod category;
mod raw;

pub use bbox::{BBox, iou_batch};
pub use builder::DetectionBuilder;
pub use category::{Category, CategoryCounts, UnknownCategory};
pub use raw::{InvalidDetection, ModelId, RawBox, RawDetection};
