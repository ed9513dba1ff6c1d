//! Biomatch Core - Fusion Engine
//!
//! Weighted mean over algorithms with a non-null score. Null scores are
//! excluded (not counted as zero); an all-null map fails closed to 0.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::algorithm::Algorithm;

/// Per-algorithm scores; `None` marks an algorithm that produced nothing
pub type ScoreMap = BTreeMap<Algorithm, Option<f32>>;

/// Fusion weight per algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightTable(BTreeMap<Algorithm, f32>);

impl Default for WeightTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl WeightTable {
    /// Built-in weights for all eight algorithms
    pub fn standard() -> Self {
        Self(Algorithm::all().map(|a| (a, a.default_weight())).collect())
    }

    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, algorithm: Algorithm, weight: f32) -> Self {
        self.0.insert(algorithm, weight);
        self
    }

    /// Weight for an algorithm (0 when absent)
    pub fn weight(&self, algorithm: Algorithm) -> f32 {
        self.0.get(&algorithm).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Algorithm, f32)> + '_ {
        self.0.iter().map(|(a, w)| (*a, *w))
    }

    /// First algorithm whose weight is not a positive finite number
    pub fn first_invalid<'a>(
        &self,
        algorithms: impl IntoIterator<Item = &'a Algorithm>,
    ) -> Option<Algorithm> {
        algorithms.into_iter().copied().find(|a| {
            let w = self.weight(*a);
            !(w.is_finite() && w > 0.0)
        })
    }
}

/// Fused confidence plus the algorithms that contributed to it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fusion {
    pub confidence: f32,
    pub contributing: Vec<Algorithm>,
}

impl Fusion {
    /// True when no algorithm produced a score
    pub fn is_empty(&self) -> bool {
        self.contributing.is_empty()
    }
}

/// Fuse a score map into one confidence in [0, 1]
pub fn fuse(scores: &ScoreMap, weights: &WeightTable) -> f32 {
    fuse_detailed(scores, weights).confidence
}

pub fn fuse_detailed(scores: &ScoreMap, weights: &WeightTable) -> Fusion {
    let mut weighted = 0.0f64;
    let mut total = 0.0f64;
    let mut contributing = Vec::new();

    for (algorithm, score) in scores {
        let Some(score) = score else { continue };
        if !score.is_finite() {
            continue;
        }
        let w = weights.weight(*algorithm) as f64;
        if w <= 0.0 {
            continue;
        }
        weighted += w * score.clamp(0.0, 1.0) as f64;
        total += w;
        contributing.push(*algorithm);
    }

    let confidence = if total > 0.0 {
        (weighted / total).clamp(0.0, 1.0) as f32
    } else {
        0.0
    };

    Fusion {
        confidence,
        contributing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_mean_skips_nulls() {
        let weights = WeightTable::empty()
            .with(Algorithm::ResNet, 0.5)
            .with(Algorithm::Vgg16, 0.3)
            .with(Algorithm::Inception, 0.2);
        let scores: ScoreMap = [
            (Algorithm::ResNet, Some(0.9)),
            (Algorithm::Vgg16, Some(0.82)),
            (Algorithm::Inception, None),
        ]
        .into_iter()
        .collect();

        // (0.5 * 0.9 + 0.3 * 0.82) / 0.8
        let fusion = fuse_detailed(&scores, &weights);
        assert!((fusion.confidence - 0.87).abs() < 1e-6);
        assert!(fusion.confidence >= 0.85);
        assert_eq!(fusion.contributing, vec![Algorithm::ResNet, Algorithm::Vgg16]);
    }

    #[test]
    fn test_all_null_fails_closed() {
        let scores: ScoreMap = [(Algorithm::Hog, None), (Algorithm::Lbp, None)]
            .into_iter()
            .collect();
        let fusion = fuse_detailed(&scores, &WeightTable::standard());
        assert_eq!(fusion.confidence, 0.0);
        assert!(fusion.is_empty());
        assert_eq!(fuse(&ScoreMap::new(), &WeightTable::standard()), 0.0);
    }

    #[test]
    fn test_zero_weight_algorithms_are_ignored() {
        let weights = WeightTable::empty().with(Algorithm::Hog, 1.0);
        let scores: ScoreMap = [(Algorithm::Hog, Some(0.4)), (Algorithm::Lbp, Some(1.0))]
            .into_iter()
            .collect();
        assert!((fuse(&scores, &weights) - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_standard_weights_are_valid() {
        let weights = WeightTable::standard();
        assert_eq!(weights.first_invalid(Algorithm::all().collect::<Vec<_>>().iter()), None);
        assert_eq!(weights.weight(Algorithm::DeepFace), 0.30);
        let broken = weights.with(Algorithm::Gabor, 0.0);
        assert_eq!(
            broken.first_invalid([Algorithm::Hog, Algorithm::Gabor].iter()),
            Some(Algorithm::Gabor)
        );
    }
}
