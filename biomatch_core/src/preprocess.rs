//! Biomatch Core - Image Preprocessor
//!
//! Turns raw image bytes into a fixed-size grayscale array per modality.
//! Pure and deterministic: the same bytes always yield the same pixels.

use image::{imageops, imageops::FilterType, DynamicImage, GenericImageView, GrayImage};
use serde::{Deserialize, Serialize};

use crate::algorithm::Modality;
use crate::error::{CoreError, CoreResult};

/// Default square side for face input
pub const FACE_SIDE: u32 = 224;
/// Default square side for fingerprint input
pub const FINGERPRINT_SIDE: u32 = 128;

/// Preprocessor settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Preprocessor {
    pub face_side: u32,
    pub fingerprint_side: u32,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self {
            face_side: FACE_SIDE,
            fingerprint_side: FINGERPRINT_SIDE,
        }
    }
}

impl Preprocessor {
    /// Decode and normalize raw bytes for the given modality
    pub fn normalize(&self, raw: &[u8], modality: Modality) -> CoreResult<NormalizedImage> {
        if raw.is_empty() {
            return Err(CoreError::Decode("empty image buffer".into()));
        }
        let img = image::load_from_memory(raw)?;
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(CoreError::Decode("image has no pixels".into()));
        }

        let pixels = match modality {
            Modality::Face => self.normalize_face(&img),
            Modality::Fingerprint => self.normalize_fingerprint(&img),
        };

        Ok(NormalizedImage { modality, pixels })
    }

    fn normalize_face(&self, img: &DynamicImage) -> GrayImage {
        let (width, height) = img.dimensions();
        let side = width.min(height);
        let cropped = img.crop_imm((width - side) / 2, (height - side) / 2, side, side);
        let resized = cropped.resize_exact(self.face_side, self.face_side, FilterType::Lanczos3);
        stretch_contrast(resized.to_luma8())
    }

    fn normalize_fingerprint(&self, img: &DynamicImage) -> GrayImage {
        let gray = img.to_luma8();
        let resized = imageops::resize(
            &gray,
            self.fingerprint_side,
            self.fingerprint_side,
            FilterType::Triangle,
        );
        equalize_histogram(resized)
    }
}

/// Min-max stretch to the full 0..=255 range
fn stretch_contrast(mut img: GrayImage) -> GrayImage {
    let (lo, hi) = img
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    if hi <= lo {
        return img;
    }
    let span = (hi - lo) as f32;
    for p in img.pixels_mut() {
        p[0] = (((p[0] - lo) as f32 / span) * 255.0).round() as u8;
    }
    img
}

/// Global histogram equalization through the cumulative distribution
fn equalize_histogram(mut img: GrayImage) -> GrayImage {
    let mut hist = [0u64; 256];
    for p in img.pixels() {
        hist[p[0] as usize] += 1;
    }
    let total: u64 = hist.iter().sum();
    let mut cdf = [0u64; 256];
    let mut running = 0u64;
    for (i, count) in hist.iter().enumerate() {
        running += count;
        cdf[i] = running;
    }
    let cdf_min = cdf.iter().copied().find(|c| *c > 0).unwrap_or(0);
    if total <= cdf_min {
        return img;
    }

    let denom = (total - cdf_min) as f64;
    let mut lut = [0u8; 256];
    for (i, entry) in lut.iter_mut().enumerate() {
        let scaled = cdf[i].saturating_sub(cdf_min) as f64 * 255.0 / denom;
        *entry = scaled.round().clamp(0.0, 255.0) as u8;
    }
    for p in img.pixels_mut() {
        p[0] = lut[p[0] as usize];
    }
    img
}

/// Preprocessed grayscale image for one modality
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    modality: Modality,
    pixels: GrayImage,
}

impl NormalizedImage {
    /// Wrap an already-normalized grayscale buffer
    pub fn from_gray(modality: Modality, pixels: GrayImage) -> Self {
        Self { modality, pixels }
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn gray(&self) -> &GrayImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// True when every pixel has the same value
    pub fn is_uniform(&self) -> bool {
        let mut iter = self.pixels.pixels();
        match iter.next() {
            Some(first) => iter.all(|p| p[0] == first[0]),
            None => true,
        }
    }

    /// Square resample used by extractors with their own input size
    pub fn resized(&self, side: u32) -> GrayImage {
        if self.pixels.width() == side && self.pixels.height() == side {
            return self.pixels.clone();
        }
        imageops::resize(&self.pixels, side, side, FilterType::Triangle)
    }
}
