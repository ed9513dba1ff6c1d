//! Biomatch Core - Feature Extractors
//!
//! Every algorithm is a pure function `image -> embedding`. A uniform or
//! otherwise unusable image yields `None`, never a zero vector, so the
//! algorithm drops out of fusion instead of voting against the probe.
//!
//! The pairwise face verifier cannot emit a standalone embedding. It
//! prepares a fixed-size reference payload instead and scores two
//! payloads directly.

pub mod face;
pub mod fingerprint;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::algorithm::Algorithm;
use crate::error::{CoreError, CoreResult};
use crate::preprocess::NormalizedImage;
use crate::scorer;
use crate::template::Embedding;

pub use face::{CorrelationVerifier, ProjectionEmbedder};
pub use fingerprint::{GaborExtractor, HogExtractor, LbpExtractor, MinutiaeExtractor};

/// Embedding-producing algorithm
pub trait FeatureExtractor: Send + Sync {
    fn algorithm(&self) -> Algorithm;
    fn extract(&self, image: &NormalizedImage) -> Option<Embedding>;
}

/// Distance-only algorithm that compares two prepared images
pub trait PairwiseVerifier: Send + Sync {
    fn algorithm(&self) -> Algorithm;

    /// Fixed-size payload stored in templates and built for probes
    fn prepare(&self, image: &NormalizedImage) -> Option<Embedding>;

    /// Score in [0, 1], `None` when either side is unusable
    fn compare(&self, probe: &Embedding, reference: &Embedding) -> Option<f32>;
}

/// Extractor backed by a closure
///
/// Lets callers plug an external model (or a test double) in without
/// writing a new type.
type ExtractFn = Box<dyn Fn(&NormalizedImage) -> Option<Embedding> + Send + Sync>;

pub struct FnExtractor {
    algorithm: Algorithm,
    extract_fn: ExtractFn,
}

impl FnExtractor {
    pub fn new(
        algorithm: Algorithm,
        extract_fn: impl Fn(&NormalizedImage) -> Option<Embedding> + Send + Sync + 'static,
    ) -> Self {
        Self {
            algorithm,
            extract_fn: Box::new(extract_fn),
        }
    }
}

impl FeatureExtractor for FnExtractor {
    fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn extract(&self, image: &NormalizedImage) -> Option<Embedding> {
        (self.extract_fn)(image)
    }
}

/// One registered algorithm, either kind
#[derive(Clone)]
pub enum Extractor {
    Embedding(Arc<dyn FeatureExtractor>),
    Pairwise(Arc<dyn PairwiseVerifier>),
}

impl Extractor {
    pub fn embedding(extractor: impl FeatureExtractor + 'static) -> Self {
        Self::Embedding(Arc::new(extractor))
    }

    pub fn pairwise(verifier: impl PairwiseVerifier + 'static) -> Self {
        Self::Pairwise(Arc::new(verifier))
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            Self::Embedding(e) => e.algorithm(),
            Self::Pairwise(v) => v.algorithm(),
        }
    }

    /// Template payload or probe feature for this algorithm
    ///
    /// Output with the wrong dimension is discarded.
    pub fn extract(&self, image: &NormalizedImage) -> Option<Embedding> {
        let algorithm = self.algorithm();
        if image.modality() != algorithm.modality() {
            log::warn!("{} cannot process a {} image", algorithm, image.modality());
            return None;
        }

        let out = match self {
            Self::Embedding(e) => e.extract(image),
            Self::Pairwise(v) => v.prepare(image),
        }?;

        if out.dimension() != algorithm.dimension() || out.is_degenerate() {
            log::warn!(
                "{} produced an unusable feature (dimension {}, expected {})",
                algorithm,
                out.dimension(),
                algorithm.dimension()
            );
            return None;
        }
        Some(out)
    }

    /// Similarity of a probe feature against one stored payload
    pub fn score(&self, probe: &Embedding, reference: &Embedding) -> CoreResult<Option<f32>> {
        match self {
            Self::Embedding(_) => scorer::similarity(probe, reference).map(Some),
            Self::Pairwise(v) => Ok(v.compare(probe, reference).map(|s| s.clamp(0.0, 1.0))),
        }
    }
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Embedding(e) => write!(f, "Extractor::Embedding({})", e.algorithm()),
            Self::Pairwise(v) => write!(f, "Extractor::Pairwise({})", v.algorithm()),
        }
    }
}

/// Immutable set of extractors, built once and shared by reference
#[derive(Clone, Debug, Default)]
pub struct ExtractorRegistry {
    extractors: BTreeMap<Algorithm, Extractor>,
}

impl ExtractorRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// All eight built-in algorithms
    pub fn standard() -> Self {
        Self::empty()
            .with(Extractor::pairwise(CorrelationVerifier::default()))
            .with(Extractor::embedding(ProjectionEmbedder::resnet()))
            .with(Extractor::embedding(ProjectionEmbedder::vgg16()))
            .with(Extractor::embedding(ProjectionEmbedder::inception()))
            .with(Extractor::embedding(HogExtractor::default()))
            .with(Extractor::embedding(LbpExtractor))
            .with(Extractor::embedding(GaborExtractor::default()))
            .with(Extractor::embedding(MinutiaeExtractor::default()))
    }

    /// Register (or replace) an extractor under its own algorithm tag
    pub fn with(mut self, extractor: Extractor) -> Self {
        self.extractors.insert(extractor.algorithm(), extractor);
        self
    }

    pub fn get(&self, algorithm: Algorithm) -> CoreResult<&Extractor> {
        self.extractors
            .get(&algorithm)
            .ok_or(CoreError::UnknownAlgorithm(algorithm))
    }

    pub fn contains(&self, algorithm: Algorithm) -> bool {
        self.extractors.contains_key(&algorithm)
    }

    pub fn algorithms(&self) -> impl Iterator<Item = Algorithm> + '_ {
        self.extractors.keys().copied()
    }
}

/// Mean of each cell of a `grid` x `grid` partition of a row-major plane
pub(crate) fn pool_grid(values: &[f32], width: usize, height: usize, grid: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(grid * grid);
    for gy in 0..grid {
        let (y0, y1) = (gy * height / grid, ((gy + 1) * height / grid).max(gy * height / grid + 1));
        for gx in 0..grid {
            let (x0, x1) = (gx * width / grid, ((gx + 1) * width / grid).max(gx * width / grid + 1));
            let mut sum = 0.0f32;
            let mut n = 0usize;
            for y in y0..y1.min(height) {
                for x in x0..x1.min(width) {
                    sum += values[y * width + x];
                    n += 1;
                }
            }
            out.push(if n > 0 { sum / n as f32 } else { 0.0 });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::Modality;
    use image::{GrayImage, Luma};

    fn image(modality: Modality) -> NormalizedImage {
        NormalizedImage::from_gray(
            modality,
            GrayImage::from_fn(16, 16, |x, y| Luma([(x * 13 + y * 7) as u8])),
        )
    }

    #[test]
    fn test_standard_registry_covers_every_algorithm() {
        let registry = ExtractorRegistry::standard();
        for alg in Algorithm::all() {
            assert_eq!(registry.get(alg).unwrap().algorithm(), alg);
        }
        assert!(matches!(
            ExtractorRegistry::empty().get(Algorithm::Hog),
            Err(CoreError::UnknownAlgorithm(Algorithm::Hog))
        ));
    }

    #[test]
    fn test_wrong_dimension_is_discarded() {
        let stub = Extractor::embedding(FnExtractor::new(Algorithm::Lbp, |_| {
            Some(Embedding::new(vec![1.0; 3]))
        }));
        assert!(stub.extract(&image(Modality::Fingerprint)).is_none());
    }

    #[test]
    fn test_wrong_modality_is_discarded() {
        let stub = Extractor::embedding(FnExtractor::new(Algorithm::Lbp, |_| {
            Some(Embedding::new(vec![1.0; 10]))
        }));
        assert!(stub.extract(&image(Modality::Face)).is_none());
        assert!(stub.extract(&image(Modality::Fingerprint)).is_some());
    }

    #[test]
    fn test_pool_grid_means() {
        let plane: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let pooled = pool_grid(&plane, 4, 4, 2);
        assert_eq!(pooled, vec![2.5, 4.5, 10.5, 12.5]);
    }
}
