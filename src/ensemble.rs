//! Model invocation and reconciliation of their outputs.
//!
//! The coordinator runs the selected detectors, the aggregator fuses their
//! boxes, and the voter decides per-category presence.

mod aggregator;
mod coordinator;
mod detector;
mod registry;
mod voter;

pub use aggregator::{
    AggregationMethod, BoxAggregator, MergedDetection, merge, passthrough, union_nms,
};
pub use coordinator::{CoordinatorRun, EnsembleCoordinator, LatencyLog, LatencySample};
pub use detector::{Detector, DetectorError, Frame};
pub use registry::{DetectorRegistry, SharedDetector};
pub use voter::{PresenceReport, PresenceVoter, RoundingPolicy, report_from_counts, weighted_means};

#[cfg(feature = "burn-backend")]
mod burn_backend;

#[cfg(feature = "burn-backend")]
pub use burn_backend::{BurnDetector, BurnModel, ModelOutput};
