//! Biomatch Core - Similarity Scorer
//!
//! Cosine similarity floored at zero. A negative cosine means "no
//! evidence", not "evidence against".

use crate::error::{CoreError, CoreResult};
use crate::template::Embedding;

/// Raw cosine in [-1, 1]; zero when either vector has no length
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

/// Similarity score in [0, 1] between two embeddings of one algorithm
pub fn similarity(a: &Embedding, b: &Embedding) -> CoreResult<f32> {
    if a.dimension() != b.dimension() {
        return Err(CoreError::DimensionMismatch {
            expected: a.dimension(),
            actual: b.dimension(),
        });
    }
    Ok(cosine_similarity(a.as_slice(), b.as_slice()).max(0.0))
}

/// Best of several per-template scores ("any of enrolled"); `None` when
/// nothing could be scored
pub fn best_of(scores: impl IntoIterator<Item = f32>) -> Option<f32> {
    scores
        .into_iter()
        .fold(None, |best, score| Some(best.map_or(score, |b: f32| b.max(score))))
}
