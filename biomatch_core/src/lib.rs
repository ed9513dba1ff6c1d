//! # Biomatch Core
//!
//! Image-side half of the biometric matching engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      BIOMATCH CORE                        │
//! │  ┌─────────────┐  ┌──────────────────┐  ┌─────────────┐  │
//! │  │ PREPROCESS  │→ │ FEATURE EXTRACT  │→ │   SCORER    │  │
//! │  │ face / fp   │  │ 4 face + 4 fp    │  │ cosine ≥ 0  │  │
//! │  └─────────────┘  └──────────────────┘  └──────┬──────┘  │
//! │                                                │         │
//! │  ┌─────────────┐  ┌──────────────────┐  ┌──────┴──────┐  │
//! │  │  QUALITY    │  │ BOUNDED EXECUTOR │  │   FUSION    │  │
//! │  │  heuristic  │  │ permits+timeouts │  │ weighted μ  │  │
//! │  └─────────────┘  └──────────────────┘  └─────────────┘  │
//! │                                                          │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │   IDENTIFICATION SCANNER (1:N, versioned corpus)   │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - Uniform or undecodable input yields no feature, never a zero vector
//! - Scores are floored at zero; fused confidence stays in [0, 1]
//! - Probe bytes are zeroized on drop
//! - A failing extractor only nulls its own score

pub mod algorithm;
pub mod error;
pub mod executor;
pub mod extract;
pub mod fusion;
pub mod preprocess;
pub mod quality;
pub mod scanner;
pub mod scorer;
pub mod template;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use algorithm::{Algorithm, Modality};
pub use error::{CoreError, CoreResult};
pub use executor::{BoundedExecutor, CancelToken, ExecutorConfig, TaskOutcome};
pub use extract::{Extractor, ExtractorRegistry, FeatureExtractor, FnExtractor, PairwiseVerifier};
pub use fusion::{fuse, fuse_detailed, Fusion, ScoreMap, WeightTable};
pub use preprocess::{NormalizedImage, Preprocessor};
pub use quality::{FixedQuality, HeuristicQualityAssessor, QualityAssessor, QualityConfig};
pub use scanner::{
    CorpusEntry, CorpusSource, IdentificationReport, IdentificationScanner, RankedMatch,
    ReferenceCorpus, SkipReason, SkippedEntry,
};
pub use scorer::{best_of, cosine_similarity, similarity};
pub use template::{Embedding, Probe, Template};

/// Biomatch Core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
