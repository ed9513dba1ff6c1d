//! Biomatch Core - Fingerprint Descriptors
//!
//! Four classical descriptors over the 128x128 equalized image:
//! gradient histograms (`hog`), uniform local binary patterns (`lbp`),
//! an oriented Gabor bank (`gabor`) and corner density (`minutiae`).

use std::f32::consts::PI;

use super::{pool_grid, FeatureExtractor};
use crate::algorithm::Algorithm;
use crate::preprocess::{NormalizedImage, FINGERPRINT_SIDE};
use crate::template::Embedding;

// ═══════════════════════════════════════════════════════════════════
// PLANE HELPERS
// ═══════════════════════════════════════════════════════════════════

/// Row-major f32 image plane
#[derive(Debug, Clone)]
struct Plane {
    w: usize,
    h: usize,
    data: Vec<f32>,
}

impl Plane {
    fn from_image(image: &NormalizedImage, side: u32, scale: f32) -> Self {
        let resized = image.resized(side);
        Self {
            w: side as usize,
            h: side as usize,
            data: resized.pixels().map(|p| p[0] as f32 * scale).collect(),
        }
    }

    fn zeros(w: usize, h: usize) -> Self {
        Self {
            w,
            h,
            data: vec![0.0; w * h],
        }
    }

    fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.w + x]
    }

    /// Sample with half-sample symmetric borders (d c b a | a b c d)
    fn reflect(&self, x: isize, y: isize) -> f32 {
        self.at(reflect_index(x, self.w), reflect_index(y, self.h))
    }

    /// Bilinear sample, zero outside the plane
    fn bilinear(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let get = |xi: f32, yi: f32| -> f32 {
            if xi < 0.0 || yi < 0.0 || xi >= self.w as f32 || yi >= self.h as f32 {
                0.0
            } else {
                self.at(xi as usize, yi as usize)
            }
        };
        get(x0, y0) * (1.0 - fx) * (1.0 - fy)
            + get(x0 + 1.0, y0) * fx * (1.0 - fy)
            + get(x0, y0 + 1.0) * (1.0 - fx) * fy
            + get(x0 + 1.0, y0 + 1.0) * fx * fy
    }

    /// Correlate with a centred odd-sized kernel
    fn filter(&self, kernel: &[f32], kw: usize, kh: usize) -> Plane {
        let (rx, ry) = ((kw / 2) as isize, (kh / 2) as isize);
        let mut out = Plane::zeros(self.w, self.h);
        for y in 0..self.h {
            for x in 0..self.w {
                let mut acc = 0.0f32;
                for ky in 0..kh {
                    for kx in 0..kw {
                        let k = kernel[ky * kw + kx];
                        if k != 0.0 {
                            let sx = x as isize + kx as isize - rx;
                            let sy = y as isize + ky as isize - ry;
                            acc += k * self.reflect(sx, sy);
                        }
                    }
                }
                out.data[y * self.w + x] = acc;
            }
        }
        out
    }
}

fn reflect_index(mut i: isize, n: usize) -> usize {
    let n = n as isize;
    loop {
        if i < 0 {
            i = -i - 1;
        } else if i >= n {
            i = 2 * n - i - 1;
        } else {
            return i as usize;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// HOG
// ═══════════════════════════════════════════════════════════════════

/// Histogram of oriented gradients with L2-Hys block normalization
#[derive(Debug, Clone, Copy)]
pub struct HogExtractor {
    pub orientations: usize,
    pub cell: usize,
    pub block: usize,
}

impl Default for HogExtractor {
    fn default() -> Self {
        Self {
            orientations: 9,
            cell: 8,
            block: 2,
        }
    }
}

impl FeatureExtractor for HogExtractor {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Hog
    }

    fn extract(&self, image: &NormalizedImage) -> Option<Embedding> {
        if image.is_uniform() {
            return None;
        }
        let plane = Plane::from_image(image, FINGERPRINT_SIDE, 1.0 / 255.0);
        let (w, h) = (plane.w, plane.h);
        let cells_x = w / self.cell;
        let cells_y = h / self.cell;
        let bins = self.orientations;
        let bin_width = 180.0 / bins as f32;

        let mut hist = vec![0.0f32; cells_x * cells_y * bins];
        for y in 0..cells_y * self.cell {
            for x in 0..cells_x * self.cell {
                let gx = if x > 0 && x + 1 < w {
                    plane.at(x + 1, y) - plane.at(x - 1, y)
                } else {
                    0.0
                };
                let gy = if y > 0 && y + 1 < h {
                    plane.at(x, y + 1) - plane.at(x, y - 1)
                } else {
                    0.0
                };
                let magnitude = gx.hypot(gy);
                if magnitude == 0.0 {
                    continue;
                }
                let angle = gy.atan2(gx).to_degrees().rem_euclid(180.0);
                let bin = ((angle / bin_width) as usize).min(bins - 1);
                let cell = (y / self.cell) * cells_x + x / self.cell;
                hist[cell * bins + bin] += magnitude;
            }
        }
        let area = (self.cell * self.cell) as f32;
        hist.iter_mut().for_each(|v| *v /= area);

        let blocks_x = cells_x + 1 - self.block;
        let blocks_y = cells_y + 1 - self.block;
        let mut features = Vec::with_capacity(blocks_x * blocks_y * self.block * self.block * bins);
        let mut block = Vec::with_capacity(self.block * self.block * bins);
        for by in 0..blocks_y {
            for bx in 0..blocks_x {
                block.clear();
                for cy in by..by + self.block {
                    for cx in bx..bx + self.block {
                        let start = (cy * cells_x + cx) * bins;
                        block.extend_from_slice(&hist[start..start + bins]);
                    }
                }
                l2_hys(&mut block);
                features.extend_from_slice(&block);
            }
        }

        Some(Embedding::new(features))
    }
}

fn l2_hys(block: &mut [f32]) {
    const EPS: f32 = 1e-5;
    const CLIP: f32 = 0.2;
    let norm = (block.iter().map(|v| v * v).sum::<f32>() + EPS * EPS).sqrt();
    block.iter_mut().for_each(|v| *v = (*v / norm).min(CLIP));
    let norm = (block.iter().map(|v| v * v).sum::<f32>() + EPS * EPS).sqrt();
    block.iter_mut().for_each(|v| *v /= norm);
}

// ═══════════════════════════════════════════════════════════════════
// LBP
// ═══════════════════════════════════════════════════════════════════

/// Rotation-invariant uniform LBP, 8 neighbours at radius 1
#[derive(Debug, Clone, Copy, Default)]
pub struct LbpExtractor;

const LBP_POINTS: usize = 8;

impl FeatureExtractor for LbpExtractor {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Lbp
    }

    fn extract(&self, image: &NormalizedImage) -> Option<Embedding> {
        if image.is_uniform() {
            return None;
        }
        let plane = Plane::from_image(image, FINGERPRINT_SIDE, 1.0);
        let offsets: Vec<(f32, f32)> = (0..LBP_POINTS)
            .map(|p| {
                let angle = 2.0 * PI * p as f32 / LBP_POINTS as f32;
                let round5 = |v: f32| (v * 1e5).round() / 1e5;
                (round5(angle.cos()), round5(-angle.sin()))
            })
            .collect();

        let mut hist = [0.0f32; LBP_POINTS + 2];
        let mut bits = [false; LBP_POINTS];
        for y in 0..plane.h {
            for x in 0..plane.w {
                let center = plane.at(x, y);
                for (bit, (dx, dy)) in bits.iter_mut().zip(&offsets) {
                    *bit = plane.bilinear(x as f32 + dx, y as f32 + dy) >= center;
                }
                let transitions = (0..LBP_POINTS)
                    .filter(|i| bits[*i] != bits[(i + LBP_POINTS - 1) % LBP_POINTS])
                    .count();
                let code = if transitions <= 2 {
                    bits.iter().filter(|b| **b).count()
                } else {
                    LBP_POINTS + 1
                };
                hist[code] += 1.0;
            }
        }

        let total: f32 = hist.iter().sum();
        Some(Embedding::new(hist.iter().map(|v| v / (total + 1e-6)).collect()))
    }
}

// ═══════════════════════════════════════════════════════════════════
// GABOR
// ═══════════════════════════════════════════════════════════════════

/// Real Gabor responses at four orientations, mean-abs pooled
#[derive(Debug, Clone)]
pub struct GaborExtractor {
    pub frequency: f32,
    pub bandwidth: f32,
    pub angles: Vec<f32>,
    pub grid: usize,
}

impl Default for GaborExtractor {
    fn default() -> Self {
        Self {
            frequency: 0.6,
            bandwidth: 1.0,
            angles: vec![0.0, PI / 4.0, PI / 2.0, 3.0 * PI / 4.0],
            grid: 8,
        }
    }
}

impl GaborExtractor {
    /// Gaussian envelope width for the configured frequency and bandwidth
    pub fn sigma(&self) -> f32 {
        let b = 2f32.powf(self.bandwidth);
        (1.0 / PI) * (2f32.ln() / 2.0).sqrt() * (b + 1.0) / (b - 1.0) / self.frequency
    }

    /// Real part of the kernel at `theta`, with its width and height
    fn kernel(&self, theta: f32) -> (Vec<f32>, usize, usize) {
        const N_STDS: f32 = 3.0;
        let sigma = self.sigma();
        let (st, ct) = theta.sin_cos();
        let x0 = (N_STDS * sigma * ct).abs().max((N_STDS * sigma * st).abs()).max(1.0).ceil() as isize;
        let y0 = (N_STDS * sigma * st).abs().max((N_STDS * sigma * ct).abs()).max(1.0).ceil() as isize;

        let (kw, kh) = ((2 * x0 + 1) as usize, (2 * y0 + 1) as usize);
        let norm = 1.0 / (2.0 * PI * sigma * sigma);
        let mut kernel = Vec::with_capacity(kw * kh);
        for y in -y0..=y0 {
            for x in -x0..=x0 {
                let (x, y) = (x as f32, y as f32);
                let rotx = x * ct + y * st;
                let roty = -x * st + y * ct;
                let envelope = (-0.5 * (rotx * rotx + roty * roty) / (sigma * sigma)).exp();
                kernel.push(norm * envelope * (2.0 * PI * self.frequency * rotx).cos());
            }
        }
        (kernel, kw, kh)
    }
}

impl FeatureExtractor for GaborExtractor {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Gabor
    }

    fn extract(&self, image: &NormalizedImage) -> Option<Embedding> {
        if image.is_uniform() {
            return None;
        }
        let plane = Plane::from_image(image, FINGERPRINT_SIDE, 1.0 / 255.0);
        let mut features = Vec::with_capacity(self.angles.len() * self.grid * self.grid);
        for theta in &self.angles {
            let (kernel, kw, kh) = self.kernel(*theta);
            let response = plane.filter(&kernel, kw, kh);
            let magnitude: Vec<f32> = response.data.iter().map(|v| v.abs()).collect();
            features.extend(pool_grid(&magnitude, plane.w, plane.h, self.grid));
        }
        Some(Embedding::new(features))
    }
}

// ═══════════════════════════════════════════════════════════════════
// MINUTIAE
// ═══════════════════════════════════════════════════════════════════

/// Shi-Tomasi corner density on an 8x8 grid
#[derive(Debug, Clone, Copy)]
pub struct MinutiaeExtractor {
    pub max_corners: usize,
    pub quality_level: f32,
    pub min_distance: f32,
    pub blur_sigma: f32,
    pub grid: usize,
}

impl Default for MinutiaeExtractor {
    fn default() -> Self {
        Self {
            max_corners: 100,
            quality_level: 0.01,
            min_distance: 5.0,
            blur_sigma: 1.0,
            grid: 8,
        }
    }
}

impl MinutiaeExtractor {
    /// Corner positions, strongest first
    pub fn corners(&self, image: &NormalizedImage) -> Vec<(usize, usize)> {
        let plane = Plane::from_image(image, FINGERPRINT_SIDE, 1.0);
        let blurred = gaussian_blur(&plane, self.blur_sigma);

        let sobel_x = [-1.0, 0.0, 1.0, -2.0, 0.0, 2.0, -1.0, 0.0, 1.0];
        let sobel_y = [-1.0, -2.0, -1.0, 0.0, 0.0, 0.0, 1.0, 2.0, 1.0];
        let gx = blurred.filter(&sobel_x, 3, 3);
        let gy = blurred.filter(&sobel_y, 3, 3);

        let (w, h) = (plane.w, plane.h);
        let mut xx = Plane::zeros(w, h);
        let mut xy = Plane::zeros(w, h);
        let mut yy = Plane::zeros(w, h);
        for i in 0..w * h {
            xx.data[i] = gx.data[i] * gx.data[i];
            xy.data[i] = gx.data[i] * gy.data[i];
            yy.data[i] = gy.data[i] * gy.data[i];
        }
        let window = [1.0f32; 9];
        let (a, b, c) = (xx.filter(&window, 3, 3), xy.filter(&window, 3, 3), yy.filter(&window, 3, 3));

        let response: Vec<f32> = (0..w * h)
            .map(|i| {
                let (a, b, c) = (a.data[i], b.data[i], c.data[i]);
                ((a + c) - ((a - c) * (a - c) + 4.0 * b * b).sqrt()) / 2.0
            })
            .collect();

        let max = response.iter().copied().fold(0.0f32, f32::max);
        if max <= 0.0 {
            return Vec::new();
        }
        let threshold = self.quality_level * max;

        let mut candidates = Vec::new();
        for y in 0..h {
            for x in 0..w {
                let v = response[y * w + x];
                if v <= threshold {
                    continue;
                }
                let is_peak = (y.saturating_sub(1)..(y + 2).min(h)).all(|ny| {
                    (x.saturating_sub(1)..(x + 2).min(w)).all(|nx| response[ny * w + nx] <= v)
                });
                if is_peak {
                    candidates.push((v, x, y));
                }
            }
        }
        candidates.sort_by(|l, r| r.0.total_cmp(&l.0));

        let min_sq = self.min_distance * self.min_distance;
        let mut accepted: Vec<(usize, usize)> = Vec::new();
        for (_, x, y) in candidates {
            if accepted.len() >= self.max_corners {
                break;
            }
            let far_enough = accepted.iter().all(|(ax, ay)| {
                let dx = *ax as f32 - x as f32;
                let dy = *ay as f32 - y as f32;
                dx * dx + dy * dy >= min_sq
            });
            if far_enough {
                accepted.push((x, y));
            }
        }
        accepted
    }
}

impl FeatureExtractor for MinutiaeExtractor {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Minutiae
    }

    fn extract(&self, image: &NormalizedImage) -> Option<Embedding> {
        if image.is_uniform() {
            return None;
        }
        let corners = self.corners(image);
        if corners.is_empty() {
            return None;
        }

        let side = FINGERPRINT_SIDE as usize;
        let cell = side.div_ceil(self.grid);
        let mut density = vec![0.0f32; self.grid * self.grid];
        for (x, y) in &corners {
            let gx = (x / cell).min(self.grid - 1);
            let gy = (y / cell).min(self.grid - 1);
            density[gy * self.grid + gx] += 1.0;
        }
        let total = corners.len() as f32;
        density.iter_mut().for_each(|v| *v /= total);
        Some(Embedding::new(density))
    }
}

/// Separable Gaussian blur, kernel truncated at four sigma
fn gaussian_blur(plane: &Plane, sigma: f32) -> Plane {
    let radius = (4.0 * sigma).round().max(1.0) as isize;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-0.5 * (i * i) as f32 / (sigma * sigma)).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    let size = kernel.len();

    plane.filter(&kernel, size, 1).filter(&kernel, 1, size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::Modality;
    use crate::fixtures;
    use crate::scorer::cosine_similarity;
    use image::{GrayImage, Luma};

    fn ridges(twist: f32) -> NormalizedImage {
        NormalizedImage::from_gray(Modality::Fingerprint, fixtures::ridge_pattern(128, twist))
    }

    fn extractors() -> Vec<Box<dyn FeatureExtractor>> {
        vec![
            Box::new(HogExtractor::default()),
            Box::new(LbpExtractor),
            Box::new(GaborExtractor::default()),
            Box::new(MinutiaeExtractor::default()),
        ]
    }

    #[test]
    fn test_descriptor_dimensions() {
        let img = ridges(1.0);
        for extractor in extractors() {
            let emb = extractor.extract(&img).unwrap();
            assert_eq!(
                emb.dimension(),
                extractor.algorithm().dimension(),
                "{}",
                extractor.algorithm()
            );
            assert!(!emb.is_degenerate());
        }
    }

    #[test]
    fn test_uniform_print_yields_none() {
        let flat = NormalizedImage::from_gray(Modality::Fingerprint, fixtures::flat(128, 200));
        for extractor in extractors() {
            assert!(extractor.extract(&flat).is_none());
        }
    }

    #[test]
    fn test_same_print_scores_one() {
        let img = ridges(2.0);
        for extractor in extractors() {
            let a = extractor.extract(&img).unwrap();
            let b = extractor.extract(&img).unwrap();
            assert!((cosine_similarity(a.as_slice(), b.as_slice()) - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_lbp_histogram_is_normalized() {
        let emb = LbpExtractor.extract(&ridges(1.0)).unwrap();
        let sum: f32 = emb.as_slice().iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_hog_blocks_are_unit_length() {
        let emb = HogExtractor::default().extract(&ridges(1.0)).unwrap();
        for block in emb.as_slice().chunks(36) {
            let norm: f32 = block.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!(norm <= 1.0 + 1e-4);
        }
    }

    #[test]
    fn test_gabor_sigma() {
        let sigma = GaborExtractor::default().sigma();
        assert!((sigma - 0.937).abs() < 1e-3, "sigma {sigma}");
        let (kernel, kw, kh) = GaborExtractor::default().kernel(0.0);
        assert_eq!((kw, kh), (7, 7));
        assert_eq!(kernel.len(), 49);
    }

    #[test]
    fn test_minutiae_finds_square_corners() {
        let img = GrayImage::from_fn(128, 128, |x, y| {
            Luma([if (40..88).contains(&x) && (40..88).contains(&y) { 230 } else { 20 }])
        });
        let image = NormalizedImage::from_gray(Modality::Fingerprint, img);
        let corners = MinutiaeExtractor::default().corners(&image);
        assert!(!corners.is_empty());
        for (x, y) in &corners[..4.min(corners.len())] {
            let near_x = (*x as i32 - 40).abs() <= 3 || (*x as i32 - 87).abs() <= 3;
            let near_y = (*y as i32 - 40).abs() <= 3 || (*y as i32 - 87).abs() <= 3;
            assert!(near_x && near_y, "corner at ({x}, {y})");
        }

        let density = MinutiaeExtractor::default().extract(&image).unwrap();
        let sum: f32 = density.as_slice().iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_reflect_index() {
        assert_eq!(reflect_index(-1, 4), 0);
        assert_eq!(reflect_index(-2, 4), 1);
        assert_eq!(reflect_index(4, 4), 3);
        assert_eq!(reflect_index(5, 4), 2);
    }
}
