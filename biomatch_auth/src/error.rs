//! Typy błędów dla Biomatch Auth

use thiserror::Error;

use biomatch_core::{Algorithm, CoreError, Modality};

use crate::policy::SecurityLevel;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),

    #[error("Identity already registered: {0}")]
    IdentityExists(String),

    #[error("Identity {identity} has no {modality} templates")]
    NotEnrolled { identity: String, modality: Modality },

    #[error("Image {index} quality {quality:.3} below required {required:.3}")]
    Quality {
        index: usize,
        quality: f32,
        required: f32,
    },

    #[error("No usable templates could be computed")]
    NoUsableTemplates,

    #[error("Matching unavailable - every algorithm failed")]
    MatchingUnavailable,

    #[error("Request cancelled")]
    Cancelled,

    #[error("Session error: {0}")]
    Session(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),
}

pub type AuthResult<T> = std::result::Result<T, AuthError>;

impl AuthError {
    pub fn is_security_critical(&self) -> bool {
        matches!(self, Self::MatchingUnavailable | Self::Policy(_))
    }

    /// Caller-side input problem (bad image, wrong identity, low quality)
    pub fn is_input_error(&self) -> bool {
        match self {
            Self::Core(e) => e.is_input_error(),
            Self::UnknownIdentity(_)
            | Self::NotEnrolled { .. }
            | Self::Quality { .. }
            | Self::NoUsableTemplates => true,
            _ => false,
        }
    }
}

/// Security policy load/validation failure (fatal at start-up)
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Invalid policy JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Cannot read policy file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Security level {0} is missing from the policy")]
    MissingLevel(SecurityLevel),

    #[error("Unknown security level '{0}'")]
    UnknownLevel(String),

    #[error("Level {level} has no {modality} algorithms")]
    EmptyAlgorithmSet {
        level: SecurityLevel,
        modality: Modality,
    },

    #[error("Level {level} lists {algorithm} under {modality}")]
    AlgorithmModality {
        level: SecurityLevel,
        algorithm: Algorithm,
        modality: Modality,
    },

    #[error("Level {level}: {field} = {value} is outside [0, 1]")]
    ThresholdOutOfRange {
        level: SecurityLevel,
        field: &'static str,
        value: f32,
    },

    #[error("Level {level}: {field} must be positive")]
    InvalidLimit {
        level: SecurityLevel,
        field: &'static str,
    },

    #[error("Level {level}: lockout_seconds = {seconds} exceeds the {max}s maximum")]
    LockoutTooLong {
        level: SecurityLevel,
        seconds: u64,
        max: u64,
    },

    #[error("{field} is not monotonic between {lower} and {higher}")]
    NotMonotonic {
        field: &'static str,
        lower: SecurityLevel,
        higher: SecurityLevel,
    },

    #[error("Algorithm {0} has no positive fusion weight")]
    ZeroWeight(Algorithm),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(AuthError::Core(CoreError::Decode("x".into())).is_input_error());
        assert!(!AuthError::MatchingUnavailable.is_input_error());
        assert!(AuthError::MatchingUnavailable.is_security_critical());
        assert!(AuthError::Policy(PolicyError::ZeroWeight(Algorithm::Hog)).is_security_critical());
    }
}
