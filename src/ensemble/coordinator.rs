//! Model selection and isolated invocation of detection adapters.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::time::Instant;

use crate::detection::{CategoryCounts, ModelId, RawBox, RawDetection};
use crate::error::EngineError;

use super::detector::{DetectorError, Frame};
use super::registry::{DetectorRegistry, SharedDetector};

/// Latency of one adapter invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySample {
    pub model: ModelId,
    pub latency_ms: f64,
    pub succeeded: bool,
}

/// Append-only log of adapter latencies, bounded to the most recent samples.
#[derive(Debug)]
pub struct LatencyLog {
    capacity: usize,
    samples: Mutex<VecDeque<LatencySample>>,
}

impl LatencyLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    pub fn record(&self, sample: LatencySample) {
        // A panic while holding the lock cannot leave the queue inconsistent.
        let mut samples = self.samples.lock().unwrap_or_else(|p| p.into_inner());
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    /// Samples oldest first.
    pub fn snapshot(&self) -> Vec<LatencySample> {
        let samples = self.samples.lock().unwrap_or_else(|p| p.into_inner());
        samples.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything the coordinator collected for one frame.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorRun {
    /// True when more than one adapter was consulted.
    pub ensemble_mode: bool,
    /// Validated detections of every model that answered.
    pub per_model_raw: BTreeMap<ModelId, Vec<RawDetection>>,
    pub per_model_latency_ms: BTreeMap<ModelId, f64>,
    pub failed_models: BTreeSet<ModelId>,
    /// Boxes dropped for an unknown class, bad confidence or degenerate shape.
    pub invalid_detections: usize,
    /// Valid boxes dropped under the confidence threshold.
    pub below_threshold: usize,
}

impl CoordinatorRun {
    /// Models that answered, in id order.
    pub fn models_used(&self) -> impl Iterator<Item = &ModelId> {
        self.per_model_raw.keys()
    }

    pub fn all_detections(&self) -> Vec<RawDetection> {
        self.per_model_raw.values().flatten().cloned().collect()
    }

    pub fn per_model_counts(&self) -> BTreeMap<ModelId, CategoryCounts> {
        self.per_model_raw
            .iter()
            .map(|(id, dets)| (id.clone(), CategoryCounts::tally(dets.iter().map(|d| d.category))))
            .collect()
    }

    /// Mean latency of the models that answered.
    pub fn inference_ms(&self) -> f64 {
        let latencies: Vec<f64> = self
            .models_used()
            .filter_map(|id| self.per_model_latency_ms.get(id).copied())
            .collect();
        if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        }
    }
}

/// Invokes the adapters selected for a frame, one at a time.
#[derive(Debug)]
pub struct EnsembleCoordinator {
    confidence_threshold: f32,
    latency_log: LatencyLog,
}

impl EnsembleCoordinator {
    pub fn new(confidence_threshold: f32, latency_log_capacity: usize) -> Self {
        Self {
            confidence_threshold,
            latency_log: LatencyLog::new(latency_log_capacity),
        }
    }

    pub fn latency_log(&self) -> &LatencyLog {
        &self.latency_log
    }

    /// Run the primary model, or every model when `ensemble_mode` is set and
    /// more than one is loaded.
    ///
    /// Adapter failures are recorded in the run; only an empty registry is an
    /// error.
    pub fn run(
        &self,
        registry: &DetectorRegistry,
        frame: &Frame<'_>,
        ensemble_mode: bool,
    ) -> Result<CoordinatorRun, EngineError> {
        if registry.is_empty() {
            log::error!("no detection model loaded");
            return Err(EngineError::ModelUnavailable);
        }

        let mut run = CoordinatorRun::default();
        if ensemble_mode && registry.len() > 1 {
            run.ensemble_mode = true;
            for (id, detector) in registry.iter() {
                self.invoke(id, detector, frame, &mut run);
            }
        } else {
            let (id, detector) = registry.primary().ok_or(EngineError::ModelUnavailable)?;
            self.invoke(id, detector, frame, &mut run);
        }

        if !run.failed_models.is_empty() {
            log::warn!(
                "{} of {} invoked models failed: {:?}",
                run.failed_models.len(),
                run.per_model_latency_ms.len(),
                run.failed_models
            );
        }
        Ok(run)
    }

    fn invoke(
        &self,
        id: &ModelId,
        detector: &SharedDetector,
        frame: &Frame<'_>,
        run: &mut CoordinatorRun,
    ) {
        let start = Instant::now();
        let result = match detector.lock() {
            // Caught while the guard is held, so a panicking adapter does not
            // poison its lock and can answer the next frame.
            Ok(mut guard) => panic::catch_unwind(AssertUnwindSafe(|| guard.infer(frame)))
                .unwrap_or_else(|payload| Err(DetectorError::Panicked(panic_message(&*payload)))),
            Err(_) => Err(DetectorError::Poisoned),
        };
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        self.latency_log.record(LatencySample {
            model: id.clone(),
            latency_ms,
            succeeded: result.is_ok(),
        });
        run.per_model_latency_ms.insert(id.clone(), latency_ms);

        match result {
            Ok(boxes) => {
                let detections = self.normalize(id, boxes, run);
                log::debug!(
                    "{}: {} detections in {:.1}ms",
                    id,
                    detections.len(),
                    latency_ms
                );
                run.per_model_raw.insert(id.clone(), detections);
            }
            Err(e) => {
                log::warn!("model '{}' failed: {}", id, e);
                run.failed_models.insert(id.clone());
            }
        }
    }

    fn normalize(
        &self,
        id: &ModelId,
        boxes: Vec<RawBox>,
        run: &mut CoordinatorRun,
    ) -> Vec<RawDetection> {
        let mut detections = Vec::with_capacity(boxes.len());
        for raw in boxes {
            match RawDetection::from_raw(id, raw) {
                Ok(det) if det.confidence < self.confidence_threshold => run.below_threshold += 1,
                Ok(det) => detections.push(det),
                Err(e) => {
                    log::warn!("dropping detection from '{}': {}", id, e);
                    run.invalid_detections += 1;
                }
            }
        }
        detections
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
