//! Biomatch Core - Embeddings, Templates and Probes
//!
//! Templates are immutable once built. Re-enrollment appends new
//! templates; nothing here offers a way to mutate an existing one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::algorithm::{Algorithm, Modality};
use crate::error::{CoreError, CoreResult};

/// Fixed-dimension feature vector produced by one algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn norm(&self) -> f32 {
        self.0.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Zero, empty or non-finite vectors carry no evidence
    pub fn is_degenerate(&self) -> bool {
        self.0.is_empty()
            || self.0.iter().any(|v| !v.is_finite())
            || self.0.iter().all(|v| *v == 0.0)
    }

    /// Scale to unit length (no-op for zero vectors)
    pub fn normalized(mut self) -> Self {
        let norm = self.norm();
        if norm > 0.0 {
            self.0.iter_mut().for_each(|v| *v /= norm);
        }
        self
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Stored biometric reference: one enrollment image, one algorithm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    id: Uuid,
    modality: Modality,
    algorithm: Algorithm,
    embedding: Embedding,
    quality: f32,
    created_at: DateTime<Utc>,
}

impl Template {
    /// Build a template, enforcing the algorithm's fixed dimension
    pub fn new(algorithm: Algorithm, embedding: Embedding, quality: f32) -> CoreResult<Self> {
        if embedding.dimension() != algorithm.dimension() {
            return Err(CoreError::DimensionMismatch {
                expected: algorithm.dimension(),
                actual: embedding.dimension(),
            });
        }
        if embedding.is_degenerate() {
            return Err(CoreError::InvalidTemplate(format!(
                "degenerate {algorithm} embedding"
            )));
        }
        if !(0.0..=1.0).contains(&quality) {
            return Err(CoreError::InvalidTemplate(format!(
                "quality {quality} outside [0, 1]"
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            modality: algorithm.modality(),
            algorithm,
            embedding,
            quality,
            created_at: Utc::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn embedding(&self) -> &Embedding {
        &self.embedding
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Sample submitted for one authentication attempt
///
/// The raw bytes are wiped when the probe is dropped; a probe never
/// outlives the request that carried it.
pub struct Probe {
    modality: Modality,
    raw: Zeroizing<Vec<u8>>,
}

impl Probe {
    pub fn new(modality: Modality, raw: Vec<u8>) -> Self {
        Self {
            modality,
            raw: Zeroizing::new(raw),
        }
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

impl std::fmt::Debug for Probe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Probe")
            .field("modality", &self.modality)
            .field("bytes", &self.raw.len())
            .finish()
    }
}
