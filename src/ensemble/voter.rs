//! Weighted per-category presence voting across models.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::config::ModelWeights;
use crate::detection::{Category, CategoryCounts, ModelId};

/// Per-category values one model reported. Missing categories did not vote.
pub type PresenceReport = BTreeMap<Category, u32>;

// Absorbs float noise in weighted means, e.g. 0.5 + 0.3 + 0.2 summing past 1.0.
const ROUNDING_EPSILON: f64 = 1e-9;

/// Turns a weighted mean into an integer decision.
///
/// `Ceiling` counts an item as present whenever any trusted model saw it, so a
/// 50% split between two equally weighted models resolves to present. This
/// lowers false alarms at the cost of possibly missing absent equipment; swap
/// the policy here if site safety rules require the opposite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingPolicy {
    #[default]
    Ceiling,
    /// Round half away from zero.
    Nearest,
    Floor,
}

impl RoundingPolicy {
    pub fn apply(self, mean: f64) -> u32 {
        if !mean.is_finite() || mean <= 0.0 {
            return 0;
        }
        let rounded = match self {
            RoundingPolicy::Ceiling => (mean - ROUNDING_EPSILON).ceil().max(1.0),
            RoundingPolicy::Nearest => (mean + ROUNDING_EPSILON).round(),
            RoundingPolicy::Floor => (mean + ROUNDING_EPSILON).floor(),
        };
        rounded.max(0.0) as u32
    }
}

impl std::str::FromStr for RoundingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ceiling" => Ok(Self::Ceiling),
            "nearest" => Ok(Self::Nearest),
            "floor" => Ok(Self::Floor),
            other => Err(format!("unknown rounding policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PresenceVoter {
    policy: RoundingPolicy,
}

impl PresenceVoter {
    pub fn new(policy: RoundingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RoundingPolicy {
        self.policy
    }

    /// Weighted vote of every category over the models that reported it.
    pub fn vote(
        &self,
        per_model: &BTreeMap<ModelId, PresenceReport>,
        weights: &ModelWeights,
    ) -> CategoryCounts {
        let means = weighted_means(per_model, weights);
        let mut counts = CategoryCounts::new();
        for category in Category::ALL {
            counts[category] = self.policy.apply(means[category.index()]);
        }
        counts
    }
}

/// Build a full report from per-model counts.
pub fn report_from_counts(counts: &CategoryCounts) -> PresenceReport {
    counts.iter().collect()
}

/// `Σ w·p / Σ w` per category, over models that reported the category.
///
/// Categories whose reporters all weigh zero use the unweighted mean;
/// categories nobody reported are zero.
pub fn weighted_means(
    per_model: &BTreeMap<ModelId, PresenceReport>,
    weights: &ModelWeights,
) -> Array1<f64> {
    let models = per_model.len();
    if models == 0 {
        return Array1::zeros(Category::COUNT);
    }
    let mut values = Array2::<f64>::zeros((models, Category::COUNT));
    let mut reported = Array2::<f64>::zeros((models, Category::COUNT));
    let mut w = Array1::<f64>::zeros(models);

    for (row, (model, report)) in per_model.iter().enumerate() {
        w[row] = f64::from(weights.weight(model));
        for (&category, &value) in report {
            values[[row, category.index()]] = f64::from(value);
            reported[[row, category.index()]] = 1.0;
        }
    }

    let numer = w.dot(&values);
    let denom = w.dot(&reported);
    let plain_sum = values.sum_axis(Axis(0));
    let reporters = reported.sum_axis(Axis(0));

    Array1::from_shape_fn(Category::COUNT, |c| {
        if denom[c] > 0.0 {
            numer[c] / denom[c]
        } else if reporters[c] > 0.0 {
            plain_sum[c] / reporters[c]
        } else {
            0.0
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reports(values: &[(&str, &[(Category, u32)])]) -> BTreeMap<ModelId, PresenceReport> {
        values
            .iter()
            .map(|(model, entries)| (ModelId::new(*model), entries.iter().copied().collect()))
            .collect()
    }

    #[test]
    fn test_half_split_resolves_present() {
        let weights = ModelWeights::new([("a", 1.0), ("b", 1.0)]).unwrap();
        let per_model = reports(&[
            ("a", &[(Category::Helmet, 1)]),
            ("b", &[(Category::Helmet, 0)]),
        ]);
        let means = weighted_means(&per_model, &weights);
        assert!((means[Category::Helmet.index()] - 0.5).abs() < 1e-12);
        let counts = PresenceVoter::default().vote(&per_model, &weights);
        assert_eq!(counts[Category::Helmet], 1);
    }

    #[test]
    fn test_weighted_vote_three_models() {
        let weights = ModelWeights::new([("a", 0.5), ("b", 0.3), ("c", 0.2)]).unwrap();
        let per_model = reports(&[
            ("a", &[(Category::Vest, 1)]),
            ("b", &[(Category::Vest, 1)]),
            ("c", &[(Category::Vest, 0)]),
        ]);
        let means = weighted_means(&per_model, &weights);
        assert!((means[Category::Vest.index()] - 0.8).abs() < 1e-6);
        for policy in [RoundingPolicy::Ceiling, RoundingPolicy::Nearest] {
            let counts = PresenceVoter::new(policy).vote(&per_model, &weights);
            assert_eq!(counts[Category::Vest], 1);
        }
    }

    #[test]
    fn test_unanimous_vote_is_not_inflated() {
        let weights = ModelWeights::new([("a", 0.5), ("b", 0.3), ("c", 0.2)]).unwrap();
        let per_model = reports(&[
            ("a", &[(Category::Boots, 1)]),
            ("b", &[(Category::Boots, 1)]),
            ("c", &[(Category::Boots, 1)]),
        ]);
        let counts = PresenceVoter::default().vote(&per_model, &weights);
        assert_eq!(counts[Category::Boots], 1);
    }

    #[test]
    fn test_only_reporting_models_count() {
        let weights = ModelWeights::default();
        let per_model = reports(&[
            ("a", &[(Category::Glasses, 1), (Category::Person, 2)]),
            ("b", &[(Category::Person, 2)]),
        ]);
        let means = weighted_means(&per_model, &weights);
        assert_eq!(means[Category::Glasses.index()], 1.0);
        assert_eq!(means[Category::Person.index()], 2.0);
        assert_eq!(means[Category::Vest.index()], 0.0);
    }

    #[test]
    fn test_counts_are_averaged() {
        let weights = ModelWeights::default();
        let per_model = reports(&[
            ("a", &[(Category::Person, 3)]),
            ("b", &[(Category::Person, 2)]),
        ]);
        assert_eq!(PresenceVoter::default().vote(&per_model, &weights)[Category::Person], 3);
        assert_eq!(
            PresenceVoter::new(RoundingPolicy::Floor).vote(&per_model, &weights)[Category::Person],
            2
        );
    }

    #[test]
    fn test_zero_weight_reporters_use_plain_mean() {
        let weights = ModelWeights::new([("a", 0.0), ("b", 0.0)]).unwrap();
        let per_model = reports(&[
            ("a", &[(Category::Helmet, 1)]),
            ("b", &[(Category::Helmet, 0)]),
        ]);
        let means = weighted_means(&per_model, &weights);
        assert_eq!(means[Category::Helmet.index()], 0.5);
    }

    #[test]
    fn test_tiny_positive_mean_is_present() {
        let weights = ModelWeights::new([("a", 1e-10), ("b", 1.0)]).unwrap();
        let per_model = reports(&[
            ("a", &[(Category::Helmet, 1)]),
            ("b", &[(Category::Helmet, 0)]),
        ]);
        let means = weighted_means(&per_model, &weights);
        assert!(means[Category::Helmet.index()] > 0.0);
        let counts = PresenceVoter::default().vote(&per_model, &weights);
        assert_eq!(counts[Category::Helmet], 1);
        assert_eq!(RoundingPolicy::Ceiling.apply(1e-12), 1);
    }

    #[test]
    fn test_policies() {
        assert_eq!(RoundingPolicy::Ceiling.apply(0.0), 0);
        assert_eq!(RoundingPolicy::Ceiling.apply(0.2), 1);
        assert_eq!(RoundingPolicy::Ceiling.apply(1.0 + 1e-12), 1);
        assert_eq!(RoundingPolicy::Nearest.apply(0.5), 1);
        assert_eq!(RoundingPolicy::Nearest.apply(0.49), 0);
        assert_eq!(RoundingPolicy::Floor.apply(0.5), 0);
        assert_eq!(RoundingPolicy::Floor.apply(0.9999999999), 1);
        assert_eq!("floor".parse::<RoundingPolicy>(), Ok(RoundingPolicy::Floor));
    }

    #[test]
    fn test_no_models() {
        let counts = PresenceVoter::default().vote(&BTreeMap::new(), &ModelWeights::default());
        assert!(counts.is_empty());
    }
}
