//! Per-frame compliance scoring and alert classification.

use serde::{Deserialize, Serialize};

use crate::compliance::statistics::{AlertType, ComplianceLevel};
use crate::detection::{Category, CategoryCounts};
use crate::error::ConfigError;

pub const DEFAULT_COMPLIANT_THRESHOLD: f64 = 80.0;
pub const DEFAULT_WARNING_THRESHOLD: f64 = 50.0;

/// Rate boundaries between compliance bands. Both are inclusive on the
/// compliant side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComplianceThresholds {
    compliant: f64,
    warning: f64,
}

impl ComplianceThresholds {
    pub fn new(compliant: f64, warning: f64) -> Result<Self, ConfigError> {
        for (field, value) in [("compliant_threshold", compliant), ("warning_threshold", warning)] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::OutOfRange { field, value });
            }
        }
        if warning > compliant {
            return Err(ConfigError::InvertedThresholds { compliant, warning });
        }
        Ok(Self { compliant, warning })
    }

    pub fn compliant(&self) -> f64 {
        self.compliant
    }

    pub fn warning(&self) -> f64 {
        self.warning
    }

    pub fn level(&self, rate: f64) -> ComplianceLevel {
        if rate >= self.compliant {
            ComplianceLevel::Compliant
        } else if rate >= self.warning {
            ComplianceLevel::Warning
        } else {
            ComplianceLevel::Critical
        }
    }
}

impl Default for ComplianceThresholds {
    fn default() -> Self {
        Self {
            compliant: DEFAULT_COMPLIANT_THRESHOLD,
            warning: DEFAULT_WARNING_THRESHOLD,
        }
    }
}

/// Requirement weight of each equipment category. Zero means not required.
#[derive(Debug, Clone, PartialEq)]
pub struct RequiredEquipment {
    weights: [f64; Category::COUNT],
}

impl RequiredEquipment {
    pub fn new<I>(entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (Category, f64)>,
    {
        let mut weights = [0.0; Category::COUNT];
        for (category, weight) in entries {
            if !category.is_equipment() {
                return Err(ConfigError::NotEquipment(category));
            }
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::OutOfRange {
                    field: "required_equipment",
                    value: weight,
                });
            }
            weights[category.index()] = weight;
        }
        if weights.iter().all(|&w| w == 0.0) {
            return Err(ConfigError::NoRequiredEquipment);
        }
        Ok(Self { weights })
    }

    pub fn weight(&self, category: Category) -> f64 {
        self.weights[category.index()]
    }

    /// Required categories with their weights, in class-index order.
    pub fn required(&self) -> impl Iterator<Item = (Category, f64)> + '_ {
        Category::ALL
            .iter()
            .map(|&c| (c, self.weight(c)))
            .filter(|&(_, w)| w > 0.0)
    }
}

impl Default for RequiredEquipment {
    /// Helmet only, the rule deployed sites score against.
    fn default() -> Self {
        let mut weights = [0.0; Category::COUNT];
        weights[Category::Helmet.index()] = 1.0;
        Self { weights }
    }
}

/// How a frame's counts turn into a compliance rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMethod {
    /// Weighted share of persons covered by each required category.
    #[default]
    WeightedCoverage,
    /// Fixed tiers by number of required categories missing from the frame.
    MissingClassTiers,
}

impl std::str::FromStr for ScoringMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weighted_coverage" => Ok(Self::WeightedCoverage),
            "missing_class_tiers" => Ok(Self::MissingClassTiers),
            other => Err(format!("unknown scoring method '{other}'")),
        }
    }
}

/// Outcome of classifying one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    /// Persons the rate was computed against, possibly inferred from equipment.
    pub persons: u32,
    pub compliance_rate: f64,
    pub compliance_level: ComplianceLevel,
    pub alert_type: AlertType,
}

/// Stateless per-frame classifier. Cross-frame debouncing belongs to the
/// consumer of the alert stream.
#[derive(Debug, Clone, Default)]
pub struct ComplianceClassifier {
    thresholds: ComplianceThresholds,
    required: RequiredEquipment,
    scoring: ScoringMethod,
}

impl ComplianceClassifier {
    pub fn new(
        thresholds: ComplianceThresholds,
        required: RequiredEquipment,
        scoring: ScoringMethod,
    ) -> Self {
        Self {
            thresholds,
            required,
            scoring,
        }
    }

    pub fn thresholds(&self) -> &ComplianceThresholds {
        &self.thresholds
    }

    pub fn classify(&self, counts: &CategoryCounts) -> Classification {
        let persons = effective_persons(counts);
        let compliance_rate = match self.scoring {
            ScoringMethod::WeightedCoverage => self.coverage_rate(counts, persons),
            ScoringMethod::MissingClassTiers => self.tier_rate(counts),
        }
        .clamp(0.0, 100.0);

        let compliance_level = self.thresholds.level(compliance_rate);
        Classification {
            persons,
            compliance_rate,
            compliance_level,
            alert_type: alert_for(compliance_level, compliance_rate),
        }
    }

    fn coverage_rate(&self, counts: &CategoryCounts, persons: u32) -> f64 {
        if persons == 0 {
            return 0.0;
        }
        let mut covered = 0.0;
        let mut total = 0.0;
        for (category, weight) in self.required.required() {
            let worn = counts.get(category).min(persons);
            covered += weight * f64::from(worn) / f64::from(persons);
            total += weight;
        }
        if total > 0.0 {
            100.0 * covered / total
        } else {
            0.0
        }
    }

    // Equipment seen without a person does not count as a person here.
    fn tier_rate(&self, counts: &CategoryCounts) -> f64 {
        if counts.persons() == 0 {
            return 0.0;
        }
        let required: Vec<Category> = self.required.required().map(|(c, _)| c).collect();
        let missing = required.iter().filter(|&&c| counts.get(c) == 0).count();
        match missing {
            0 => 100.0,
            m if m == required.len() => 10.0,
            m if m * 2 <= required.len() => 90.0,
            _ => 60.0,
        }
    }
}

/// Person count, inferred from the most frequent equipment when the
/// detectors found equipment but no person.
pub fn effective_persons(counts: &CategoryCounts) -> u32 {
    match counts.persons() {
        0 => counts.max_equipment(),
        n => n,
    }
}

fn alert_for(level: ComplianceLevel, rate: f64) -> AlertType {
    match level {
        ComplianceLevel::Compliant if rate >= 100.0 => AlertType::None,
        ComplianceLevel::Compliant => AlertType::Info,
        ComplianceLevel::Warning => AlertType::Warning,
        ComplianceLevel::Critical => AlertType::Critical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(persons: u32, helmet: u32, vest: u32, glasses: u32, boots: u32) -> CategoryCounts {
        let mut c = CategoryCounts::new();
        c[Category::Person] = persons;
        c[Category::Helmet] = helmet;
        c[Category::Vest] = vest;
        c[Category::Glasses] = glasses;
        c[Category::Boots] = boots;
        c
    }

    #[test]
    fn test_threshold_boundaries() {
        let t = ComplianceThresholds::default();
        assert_eq!(t.level(80.0), ComplianceLevel::Compliant);
        assert_eq!(t.level(79.999), ComplianceLevel::Warning);
        assert_eq!(t.level(50.0), ComplianceLevel::Warning);
        assert_eq!(t.level(49.999), ComplianceLevel::Critical);
        assert_eq!(t.level(0.0), ComplianceLevel::Critical);
    }

    #[test]
    fn test_thresholds_validation() {
        assert!(ComplianceThresholds::new(90.0, 60.0).is_ok());
        assert!(matches!(
            ComplianceThresholds::new(50.0, 80.0),
            Err(ConfigError::InvertedThresholds { .. })
        ));
        assert!(matches!(
            ComplianceThresholds::new(120.0, 50.0),
            Err(ConfigError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_default_scores_helmet_coverage() {
        let classifier = ComplianceClassifier::default();

        let all = classifier.classify(&counts(2, 2, 0, 0, 0));
        assert_eq!(all.compliance_rate, 100.0);
        assert_eq!(all.compliance_level, ComplianceLevel::Compliant);
        assert_eq!(all.alert_type, AlertType::None);

        let half = classifier.classify(&counts(2, 1, 2, 2, 2));
        assert_eq!(half.compliance_rate, 50.0);
        assert_eq!(half.compliance_level, ComplianceLevel::Warning);
        assert_eq!(half.alert_type, AlertType::Warning);
    }

    #[test]
    fn test_extra_equipment_does_not_exceed_full_coverage() {
        let classifier = ComplianceClassifier::default();
        let c = classifier.classify(&counts(1, 3, 0, 0, 0));
        assert_eq!(c.compliance_rate, 100.0);
    }

    #[test]
    fn test_weighted_requirements() {
        let required =
            RequiredEquipment::new([(Category::Helmet, 3.0), (Category::Vest, 1.0)]).unwrap();
        let classifier = ComplianceClassifier::new(
            ComplianceThresholds::default(),
            required,
            ScoringMethod::WeightedCoverage,
        );
        // helmet on 4/4 persons, vest on 0/4: 3 / 4 of the weight covered
        let c = classifier.classify(&counts(4, 4, 0, 0, 0));
        assert!((c.compliance_rate - 75.0).abs() < 1e-9);
        assert_eq!(c.compliance_level, ComplianceLevel::Warning);
    }

    #[test]
    fn test_compliant_below_full_is_info() {
        let required =
            RequiredEquipment::new([(Category::Helmet, 1.0), (Category::Vest, 1.0)]).unwrap();
        let classifier = ComplianceClassifier::new(
            ComplianceThresholds::default(),
            required,
            ScoringMethod::WeightedCoverage,
        );
        let c = classifier.classify(&counts(5, 5, 4, 0, 0));
        assert!((c.compliance_rate - 90.0).abs() < 1e-9);
        assert_eq!(c.compliance_level, ComplianceLevel::Compliant);
        assert_eq!(c.alert_type, AlertType::Info);
    }

    #[test]
    fn test_persons_inferred_from_equipment() {
        let classifier = ComplianceClassifier::default();
        let c = classifier.classify(&counts(0, 2, 3, 0, 0));
        assert_eq!(c.persons, 3);
        assert!((c.compliance_rate - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_frame_is_critical() {
        let c = ComplianceClassifier::default().classify(&CategoryCounts::new());
        assert_eq!(c.persons, 0);
        assert_eq!(c.compliance_rate, 0.0);
        assert_eq!(c.compliance_level, ComplianceLevel::Critical);
        assert_eq!(c.alert_type, AlertType::Critical);
    }

    #[test]
    fn test_missing_class_tiers() {
        let required = RequiredEquipment::new(Category::EQUIPMENT.map(|c| (c, 1.0))).unwrap();
        let classifier = ComplianceClassifier::new(
            ComplianceThresholds::default(),
            required,
            ScoringMethod::MissingClassTiers,
        );
        assert_eq!(classifier.classify(&counts(1, 1, 1, 1, 1)).compliance_rate, 100.0);
        assert_eq!(classifier.classify(&counts(1, 1, 1, 0, 1)).compliance_rate, 90.0);
        assert_eq!(classifier.classify(&counts(1, 1, 1, 0, 0)).compliance_rate, 90.0);
        assert_eq!(classifier.classify(&counts(1, 1, 0, 0, 0)).compliance_rate, 60.0);
        assert_eq!(classifier.classify(&counts(1, 0, 0, 0, 0)).compliance_rate, 10.0);
        // equipment alone is not a person for tier scoring
        assert_eq!(classifier.classify(&counts(0, 1, 1, 1, 1)).compliance_rate, 0.0);
    }

    #[test]
    fn test_required_equipment_validation() {
        assert!(matches!(
            RequiredEquipment::new([(Category::Person, 1.0)]),
            Err(ConfigError::NotEquipment(Category::Person))
        ));
        assert!(matches!(
            RequiredEquipment::new([(Category::Helmet, 0.0)]),
            Err(ConfigError::NoRequiredEquipment)
        ));
        assert!(RequiredEquipment::new([(Category::Vest, -1.0)]).is_err());
    }
}
