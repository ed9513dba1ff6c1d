//! Biomatch Core - Synthetic Test Images
//!
//! Deterministic images for tests in this crate and its dependents
//! (enable the `fixtures` feature from a dev-dependency).

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Whorl-like ridge pattern; `twist` changes the pattern family
pub fn ridge_pattern(side: u32, twist: f32) -> GrayImage {
    let c = side as f32 / 2.0;
    GrayImage::from_fn(side, side, |x, y| {
        let dx = x as f32 - c;
        let dy = y as f32 - c * 0.9;
        let r = (dx * dx + dy * dy).sqrt();
        let theta = dy.atan2(dx);
        let v = (r / 3.5 + theta * twist).sin();
        Luma([(127.0 + 110.0 * v) as u8])
    })
}

/// Uniform random noise
pub fn noise(side: u32, seed: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    GrayImage::from_fn(side, side, |_, _| Luma([rng.gen::<u8>()]))
}

/// Single-valued image
pub fn flat(side: u32, value: u8) -> GrayImage {
    GrayImage::from_pixel(side, side, Luma([value]))
}

/// PNG-encode a grayscale image
pub fn encode_png(img: &GrayImage) -> Vec<u8> {
    let mut buffer = Vec::new();
    // Writing PNG into memory only fails on allocation failure
    let _ = DynamicImage::ImageLuma8(img.clone())
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png);
    buffer
}
