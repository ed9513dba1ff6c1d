//! Biomatch Core - Error Types

use thiserror::Error;

use crate::algorithm::{Algorithm, Modality};

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error types
#[derive(Error, Debug)]
pub enum CoreError {
    // ═══════════════════════════════════════════════════════════════
    // INPUT ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Algorithm {algorithm} does not belong to modality {modality}")]
    ModalityMismatch {
        algorithm: Algorithm,
        modality: Modality,
    },

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    // ═══════════════════════════════════════════════════════════════
    // EXTRACTION ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("No extractor registered for algorithm {0}")]
    UnknownAlgorithm(Algorithm),

    #[error("Probe yielded no features for algorithm {0}")]
    NoProbeFeatures(Algorithm),

    #[error("Extraction timed out for algorithm {0}")]
    ExtractionTimeout(Algorithm),

    #[error("Extraction failed for algorithm {algorithm}: {reason}")]
    ExtractionFailed { algorithm: Algorithm, reason: String },

    // ═══════════════════════════════════════════════════════════════
    // EXECUTION ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Request cancelled")]
    Cancelled,
}

impl CoreError {
    /// Caller supplied unusable input (never evidence about the identity)
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            CoreError::Decode(_)
                | CoreError::DimensionMismatch { .. }
                | CoreError::ModalityMismatch { .. }
                | CoreError::InvalidTemplate(_)
        )
    }
}

impl From<image::ImageError> for CoreError {
    fn from(e: image::ImageError) -> Self {
        CoreError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(CoreError::Decode("bad header".into()).is_input_error());
        assert!(CoreError::DimensionMismatch { expected: 10, actual: 3 }.is_input_error());
        assert!(!CoreError::ExtractionTimeout(Algorithm::Hog).is_input_error());
        assert!(!CoreError::Cancelled.is_input_error());
    }
}
