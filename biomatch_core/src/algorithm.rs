//! Biomatch Core - Modalities and Algorithm Tags

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Biometric modality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Face,
    Fingerprint,
}

impl Modality {
    pub const ALL: [Modality; 2] = [Modality::Face, Modality::Fingerprint];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Face => "face",
            Self::Fingerprint => "fingerprint",
        }
    }

    /// Every algorithm defined for this modality
    pub fn algorithms(&self) -> &'static [Algorithm] {
        match self {
            Self::Face => &FACE_ALGORITHMS,
            Self::Fingerprint => &FINGERPRINT_ALGORITHMS,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "face" => Ok(Self::Face),
            "fingerprint" | "fp" => Ok(Self::Fingerprint),
            other => Err(format!("unknown modality '{other}'")),
        }
    }
}

/// Feature extraction algorithm tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Algorithm {
    /// Pairwise face verifier (distance only, no standalone embedding)
    #[serde(rename = "deepface")]
    DeepFace,
    #[serde(rename = "resnet")]
    ResNet,
    #[serde(rename = "vgg16")]
    Vgg16,
    #[serde(rename = "inception")]
    Inception,
    /// Histogram of oriented gradients
    #[serde(rename = "hog")]
    Hog,
    /// Uniform local binary patterns
    #[serde(rename = "lbp")]
    Lbp,
    /// Oriented Gabor filter bank
    #[serde(rename = "gabor")]
    Gabor,
    /// Corner/keypoint density
    #[serde(rename = "minutiae")]
    Minutiae,
}

pub const FACE_ALGORITHMS: [Algorithm; 4] = [
    Algorithm::DeepFace,
    Algorithm::ResNet,
    Algorithm::Vgg16,
    Algorithm::Inception,
];

pub const FINGERPRINT_ALGORITHMS: [Algorithm; 4] = [
    Algorithm::Hog,
    Algorithm::Lbp,
    Algorithm::Gabor,
    Algorithm::Minutiae,
];

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeepFace => "deepface",
            Self::ResNet => "resnet",
            Self::Vgg16 => "vgg16",
            Self::Inception => "inception",
            Self::Hog => "hog",
            Self::Lbp => "lbp",
            Self::Gabor => "gabor",
            Self::Minutiae => "minutiae",
        }
    }

    pub fn modality(&self) -> Modality {
        match self {
            Self::DeepFace | Self::ResNet | Self::Vgg16 | Self::Inception => Modality::Face,
            Self::Hog | Self::Lbp | Self::Gabor | Self::Minutiae => Modality::Fingerprint,
        }
    }

    /// Fixed length of the stored template payload
    ///
    /// For the pairwise verifier this is the reference image
    /// (96x96 grayscale), not an embedding.
    pub fn dimension(&self) -> usize {
        match self {
            Self::DeepFace => 96 * 96,
            Self::ResNet => 512,
            Self::Vgg16 => 512,
            Self::Inception => 768,
            Self::Hog => 8100,
            Self::Lbp => 10,
            Self::Gabor => 256,
            Self::Minutiae => 64,
        }
    }

    pub fn is_pairwise(&self) -> bool {
        matches!(self, Self::DeepFace)
    }

    /// Fusion weight used when no policy overrides it
    pub fn default_weight(&self) -> f32 {
        match self {
            Self::DeepFace | Self::Hog => 0.30,
            Self::ResNet | Self::Lbp => 0.25,
            Self::Vgg16 | Self::Gabor => 0.20,
            Self::Inception | Self::Minutiae => 0.15,
        }
    }

    pub fn all() -> impl Iterator<Item = Algorithm> {
        FACE_ALGORITHMS.into_iter().chain(FINGERPRINT_ALGORITHMS)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.to_ascii_lowercase();
        Algorithm::all()
            .find(|alg| alg.as_str() == needle)
            .ok_or_else(|| format!("unknown algorithm '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_modality_split() {
        for alg in Modality::Face.algorithms() {
            assert_eq!(alg.modality(), Modality::Face);
        }
        for alg in Modality::Fingerprint.algorithms() {
            assert_eq!(alg.modality(), Modality::Fingerprint);
        }
        assert_eq!(Algorithm::all().count(), 8);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("VGG16".parse::<Algorithm>().unwrap(), Algorithm::Vgg16);
        assert_eq!("fp".parse::<Modality>().unwrap(), Modality::Fingerprint);
        assert!("ensemble".parse::<Algorithm>().is_err());
    }

    #[test]
    fn test_serde_names_match_display() {
        let json = serde_json::to_string(&Algorithm::Minutiae).unwrap();
        assert_eq!(json, "\"minutiae\"");
        let back: Algorithm = serde_json::from_str("\"deepface\"").unwrap();
        assert_eq!(back, Algorithm::DeepFace);
    }
}
