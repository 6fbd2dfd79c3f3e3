use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::detection::ModelId;
use crate::error::ConfigError;

use super::detector::Detector;

pub type SharedDetector = Arc<Mutex<dyn Detector>>;

/// Registry of loaded detection models, built once at startup and passed by
/// reference to the coordinator.
///
/// Detectors are wrapped in `Mutex` because `Detector::infer` takes `&mut self`.
/// Iteration is ordered by model id.
#[derive(Default)]
pub struct DetectorRegistry {
    detectors: BTreeMap<ModelId, SharedDetector>,
    primary: Option<ModelId>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a detector under `id`. The first registered detector becomes
    /// the primary model.
    pub fn register<D: Detector + 'static>(&mut self, id: impl Into<ModelId>, detector: D) {
        let id = id.into();
        if self.primary.is_none() {
            self.primary = Some(id.clone());
        }
        log::debug!("registered detector '{}'", id);
        self.detectors.insert(id, Arc::new(Mutex::new(detector)));
    }

    /// Set the primary model by id.
    pub fn set_primary(&mut self, id: &ModelId) -> Result<(), ConfigError> {
        if !self.detectors.contains_key(id) {
            return Err(ConfigError::UnknownPrimary(id.clone()));
        }
        self.primary = Some(id.clone());
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<SharedDetector> {
        self.detectors.get(id).cloned()
    }

    /// The model invoked in single-model mode.
    pub fn primary(&self) -> Option<(&ModelId, &SharedDetector)> {
        self.primary
            .as_ref()
            .and_then(|id| self.detectors.get_key_value(id))
    }

    pub fn ids(&self) -> impl Iterator<Item = &ModelId> {
        self.detectors.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ModelId, &SharedDetector)> {
        self.detectors.iter()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::RawBox;
    use crate::ensemble::detector::{DetectorError, Frame};

    fn empty(_: &Frame<'_>) -> Result<Vec<RawBox>, DetectorError> {
        Ok(vec![])
    }

    #[test]
    fn test_first_registered_is_primary() {
        let mut registry = DetectorRegistry::new();
        registry.register("session_004.pt", empty);
        registry.register("best.pt", empty);

        let (id, _) = registry.primary().unwrap();
        assert_eq!(id.as_str(), "session_004.pt");
        let ids: Vec<&str> = registry.ids().map(|id| id.as_str()).collect();
        assert_eq!(ids, ["best.pt", "session_004.pt"]);
    }

    #[test]
    fn test_set_primary() {
        let mut registry = DetectorRegistry::new();
        registry.register("a", empty);
        registry.register("b", empty);
        registry.set_primary(&ModelId::new("b")).unwrap();
        assert_eq!(registry.primary().unwrap().0.as_str(), "b");

        let err = registry.set_primary(&ModelId::new("missing"));
        assert!(matches!(err, Err(ConfigError::UnknownPrimary(_))));
        assert_eq!(registry.primary().unwrap().0.as_str(), "b");
    }

    #[test]
    fn test_empty_registry() {
        let registry = DetectorRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.primary().is_none());
        assert!(registry.get("best.pt").is_none());
    }
}
