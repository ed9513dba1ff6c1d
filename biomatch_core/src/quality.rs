//! Biomatch Core - Sample Quality
//!
//! Quality is an opaque score in [0, 1] consumed only against a policy
//! minimum. The heuristic below is the default implementation; callers
//! may plug in any `QualityAssessor`.

use serde::{Deserialize, Serialize};

use crate::algorithm::Modality;
use crate::preprocess::NormalizedImage;

/// Scores a normalized sample in [0, 1]
pub trait QualityAssessor: Send + Sync {
    fn assess(&self, image: &NormalizedImage) -> f32;
}

/// Calibration for the heuristic assessor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub face_base: f32,
    pub face_sharpness_weight: f32,
    pub face_cap: f32,
    pub fingerprint_base: f32,
    pub fingerprint_contrast_weight: f32,
    pub fingerprint_sharpness_weight: f32,
    pub fingerprint_cap: f32,
    /// Laplacian variance that counts as fully sharp
    pub sharpness_scale: f32,
    /// Standard deviation that counts as full contrast
    pub contrast_scale: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            face_base: 0.6,
            face_sharpness_weight: 0.3,
            face_cap: 0.95,
            fingerprint_base: 0.7,
            fingerprint_contrast_weight: 0.2,
            fingerprint_sharpness_weight: 0.1,
            fingerprint_cap: 0.98,
            sharpness_scale: 1000.0,
            contrast_scale: 100.0,
        }
    }
}

/// Sharpness/contrast heuristic
#[derive(Debug, Clone, Default)]
pub struct HeuristicQualityAssessor {
    config: QualityConfig,
}

impl HeuristicQualityAssessor {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }
}

impl QualityAssessor for HeuristicQualityAssessor {
    fn assess(&self, image: &NormalizedImage) -> f32 {
        if image.is_uniform() {
            return 0.0;
        }
        let c = &self.config;
        let sharpness = (laplacian_variance(image) / c.sharpness_scale).min(1.0);

        let score = match image.modality() {
            Modality::Face => (c.face_base + sharpness * c.face_sharpness_weight).min(c.face_cap),
            Modality::Fingerprint => {
                let contrast = (std_dev(image) / c.contrast_scale).min(1.0);
                (c.fingerprint_base
                    + contrast * c.fingerprint_contrast_weight
                    + sharpness * c.fingerprint_sharpness_weight)
                    .min(c.fingerprint_cap)
            }
        };
        score.clamp(0.0, 1.0)
    }
}

/// Fixed score regardless of content
#[derive(Debug, Clone, Copy)]
pub struct FixedQuality(pub f32);

impl QualityAssessor for FixedQuality {
    fn assess(&self, _image: &NormalizedImage) -> f32 {
        self.0.clamp(0.0, 1.0)
    }
}

/// Variance of the 4-neighbour Laplacian over interior pixels
fn laplacian_variance(image: &NormalizedImage) -> f32 {
    let gray = image.gray();
    let (w, h) = gray.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }
    let px = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f64;

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut n = 0.0f64;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let lap = px(x - 1, y) + px(x + 1, y) + px(x, y - 1) + px(x, y + 1) - 4.0 * px(x, y);
            sum += lap;
            sum_sq += lap * lap;
            n += 1.0;
        }
    }
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0) as f32
}

fn std_dev(image: &NormalizedImage) -> f32 {
    let gray = image.gray();
    let n = (gray.width() * gray.height()) as f64;
    if n == 0.0 {
        return 0.0;
    }
    let (sum, sum_sq) = gray.pixels().fold((0.0f64, 0.0f64), |(s, sq), p| {
        let v = p[0] as f64;
        (s + v, sq + v * v)
    });
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0).sqrt() as f32
}
