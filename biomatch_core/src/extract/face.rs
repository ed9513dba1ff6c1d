//! Biomatch Core - Face Algorithms
//!
//! `resnet`, `vgg16` and `inception` are pooled-intensity backbones
//! followed by a fixed seeded random projection. They keep the shape
//! of a learned embedder (fixed input size, fixed output dimension,
//! unit-length output) so a real network can replace them behind
//! `FeatureExtractor` without touching anything downstream.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{pool_grid, FeatureExtractor, PairwiseVerifier};
use crate::algorithm::Algorithm;
use crate::preprocess::NormalizedImage;
use crate::template::Embedding;

/// Pool-then-project face embedder
pub struct ProjectionEmbedder {
    algorithm: Algorithm,
    input_side: u32,
    grid: usize,
    /// dimension x grid² projection, entries ±1/√dimension
    projection: Array2<f32>,
}

impl ProjectionEmbedder {
    pub fn new(algorithm: Algorithm, input_side: u32, grid: usize, seed: u64) -> Self {
        let dim = algorithm.dimension();
        let scale = 1.0 / (dim as f32).sqrt();
        let mut rng = StdRng::seed_from_u64(seed);
        let projection = Array2::from_shape_simple_fn((dim, grid * grid), || {
            if rng.gen::<bool>() {
                scale
            } else {
                -scale
            }
        });

        Self {
            algorithm,
            input_side,
            grid,
            projection,
        }
    }

    pub fn resnet() -> Self {
        Self::new(Algorithm::ResNet, 224, 32, 0x5245_534e)
    }

    pub fn vgg16() -> Self {
        Self::new(Algorithm::Vgg16, 224, 28, 0x5647_4731)
    }

    pub fn inception() -> Self {
        Self::new(Algorithm::Inception, 299, 36, 0x494e_4350)
    }

    pub fn input_side(&self) -> u32 {
        self.input_side
    }
}

impl FeatureExtractor for ProjectionEmbedder {
    fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn extract(&self, image: &NormalizedImage) -> Option<Embedding> {
        if image.is_uniform() {
            return None;
        }
        let side = self.input_side as usize;
        let resized = image.resized(self.input_side);
        let values: Vec<f32> = resized.pixels().map(|p| p[0] as f32 / 255.0).collect();
        let pooled = pool_grid(&values, side, side, self.grid);

        // z-normalize so brightness and contrast shifts cancel
        let n = pooled.len() as f32;
        let mean = pooled.iter().sum::<f32>() / n;
        let var = pooled.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        if var <= f32::EPSILON {
            return None;
        }
        let std = var.sqrt();
        let features = Array1::from_iter(pooled.iter().map(|v| (v - mean) / std));

        let projected = self.projection.dot(&features);
        let embedding = Embedding::new(projected.to_vec()).normalized();
        (!embedding.is_degenerate()).then_some(embedding)
    }
}

/// Side of the reference payload compared by the pairwise verifier
pub const VERIFIER_SIDE: u32 = 96;

/// Distance-only face verifier based on normalized cross-correlation
#[derive(Debug, Clone, Copy)]
pub struct CorrelationVerifier {
    /// Largest distance still reported as verified
    pub max_distance: f32,
}

impl Default for CorrelationVerifier {
    fn default() -> Self {
        Self { max_distance: 0.40 }
    }
}

impl CorrelationVerifier {
    /// 1 - zero-mean normalized cross-correlation, in [0, 2]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> Option<f32> {
        if a.len() != b.len() || a.is_empty() {
            return None;
        }
        let n = a.len() as f64;
        let mean_a = a.iter().map(|v| *v as f64).sum::<f64>() / n;
        let mean_b = b.iter().map(|v| *v as f64).sum::<f64>() / n;

        let mut cov = 0.0f64;
        let mut var_a = 0.0f64;
        let mut var_b = 0.0f64;
        for (x, y) in a.iter().zip(b) {
            let dx = *x as f64 - mean_a;
            let dy = *y as f64 - mean_b;
            cov += dx * dy;
            var_a += dx * dx;
            var_b += dy * dy;
        }
        if var_a <= 0.0 || var_b <= 0.0 {
            return None;
        }
        let ncc = cov / (var_a.sqrt() * var_b.sqrt());
        Some((1.0 - ncc).clamp(0.0, 2.0) as f32)
    }
}

impl PairwiseVerifier for CorrelationVerifier {
    fn algorithm(&self) -> Algorithm {
        Algorithm::DeepFace
    }

    fn prepare(&self, image: &NormalizedImage) -> Option<Embedding> {
        if image.is_uniform() {
            return None;
        }
        let resized = image.resized(VERIFIER_SIDE);
        let payload: Vec<f32> = resized.pixels().map(|p| p[0] as f32 / 255.0).collect();
        Some(Embedding::new(payload))
    }

    fn compare(&self, probe: &Embedding, reference: &Embedding) -> Option<f32> {
        let distance = self.distance(probe.as_slice(), reference.as_slice())?;
        if distance <= self.max_distance {
            Some(1.0 - distance)
        } else {
            Some(0.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::Modality;
    use crate::scorer::cosine_similarity;
    use image::{GrayImage, Luma};

    fn rings() -> NormalizedImage {
        let img = GrayImage::from_fn(224, 224, |x, y| {
            let dx = x as f32 - 112.0;
            let dy = y as f32 - 100.0;
            Luma([(127.0 + 120.0 * ((dx * dx + dy * dy).sqrt() / 9.0).sin()) as u8])
        });
        NormalizedImage::from_gray(Modality::Face, img)
    }

    fn stripes() -> NormalizedImage {
        let img = GrayImage::from_fn(224, 224, |x, _| Luma([if (x / 20) % 2 == 0 { 30 } else { 220 }]));
        NormalizedImage::from_gray(Modality::Face, img)
    }

    #[test]
    fn test_projection_dimensions() {
        let img = rings();
        for embedder in [
            ProjectionEmbedder::resnet(),
            ProjectionEmbedder::vgg16(),
            ProjectionEmbedder::inception(),
        ] {
            let emb = embedder.extract(&img).unwrap();
            assert_eq!(emb.dimension(), embedder.algorithm().dimension());
            assert!((emb.norm() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_projection_is_deterministic_across_instances() {
        let a = ProjectionEmbedder::resnet().extract(&rings()).unwrap();
        let b = ProjectionEmbedder::resnet().extract(&rings()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_projection_separates_different_faces() {
        let embedder = ProjectionEmbedder::resnet();
        let same = cosine_similarity(
            embedder.extract(&rings()).unwrap().as_slice(),
            embedder.extract(&rings()).unwrap().as_slice(),
        );
        let other = cosine_similarity(
            embedder.extract(&rings()).unwrap().as_slice(),
            embedder.extract(&stripes()).unwrap().as_slice(),
        );
        assert!((same - 1.0).abs() < 1e-5);
        assert!(other < 0.9);
    }

    #[test]
    fn test_uniform_face_yields_none() {
        let flat = NormalizedImage::from_gray(Modality::Face, GrayImage::from_pixel(224, 224, Luma([80])));
        assert!(ProjectionEmbedder::vgg16().extract(&flat).is_none());
        assert!(CorrelationVerifier::default().prepare(&flat).is_none());
    }

    #[test]
    fn test_verifier_identical_and_unrelated() {
        let verifier = CorrelationVerifier::default();
        let a = verifier.prepare(&rings()).unwrap();
        assert_eq!(a.dimension(), Algorithm::DeepFace.dimension());
        assert!((verifier.compare(&a, &a).unwrap() - 1.0).abs() < 1e-5);

        let b = verifier.prepare(&stripes()).unwrap();
        assert_eq!(verifier.compare(&a, &b), Some(0.0));
    }

    #[test]
    fn test_verifier_distance_of_inverted_image() {
        let verifier = CorrelationVerifier::default();
        let a = [0.1, 0.9, 0.1, 0.9];
        let b = [0.9, 0.1, 0.9, 0.1];
        assert!((verifier.distance(&a, &b).unwrap() - 2.0).abs() < 1e-6);
        assert!(verifier.distance(&a, &[0.5; 4]).is_none());
    }
}
