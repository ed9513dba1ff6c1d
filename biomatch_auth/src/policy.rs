//! Tabela polityki bezpieczeństwa - algorytmy, progi i limity per poziom
//!
//! Tabela jest ładowana i walidowana raz. Każdy błąd konfiguracji to
//! `PolicyError` przy ładowaniu; zwalidowana `SecurityPolicy` odpowiada
//! na każde zapytanie o poziom bez błędu.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use biomatch_core::{Algorithm, Modality, WeightTable};

use crate::error::PolicyError;

/// Najdłuższa dopuszczalna blokada (30 dni)
pub const MAX_LOCKOUT_SECONDS: u64 = 30 * 24 * 60 * 60;

/// Poziom bezpieczeństwa, LOW < MEDIUM < HIGH < MAXIMUM
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum SecurityLevel {
    Low,
    #[default]
    Medium,
    High,
    Maximum,
}

impl SecurityLevel {
    pub const ALL: [SecurityLevel; 4] = [Self::Low, Self::Medium, Self::High, Self::Maximum];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Maximum => "MAXIMUM",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityLevel {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| PolicyError::UnknownLevel(s.to_string()))
    }
}

/// Ustawienia jednego poziomu
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LevelPolicy {
    pub face_algorithms: Vec<Algorithm>,
    pub fingerprint_algorithms: Vec<Algorithm>,
    /// Próg per algorytm, tylko diagnostyczny
    pub algorithm_threshold: f32,
    /// Właściwa bramka akceptacji
    pub fusion_threshold: f32,
    pub min_quality: f32,
    pub max_attempts: u32,
    pub lockout_seconds: u64,
}

impl LevelPolicy {
    pub fn algorithms(&self, modality: Modality) -> &[Algorithm] {
        match modality {
            Modality::Face => &self.face_algorithms,
            Modality::Fingerprint => &self.fingerprint_algorithms,
        }
    }

    /// Przycięte do `MAX_LOCKOUT_SECONDS`; zwalidowana polityka go nie przekracza
    pub fn lockout_duration(&self) -> Duration {
        Duration::seconds(self.lockout_seconds.min(MAX_LOCKOUT_SECONDS) as i64)
    }
}

/// Serialized form of the policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyTable {
    pub levels: BTreeMap<SecurityLevel, LevelPolicy>,
    #[serde(default)]
    pub weights: WeightTable,
}

/// Zwalidowana polityka, tylko do odczytu
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityPolicy {
    levels: [LevelPolicy; 4],
    weights: WeightTable,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl SecurityPolicy {
    /// Wbudowana tabela poziomów
    pub fn standard() -> Self {
        let all_face = biomatch_core::algorithm::FACE_ALGORITHMS.to_vec();
        let all_fp = biomatch_core::algorithm::FINGERPRINT_ALGORITHMS.to_vec();

        Self {
            levels: [
                LevelPolicy {
                    face_algorithms: vec![Algorithm::DeepFace, Algorithm::ResNet],
                    fingerprint_algorithms: vec![Algorithm::Hog, Algorithm::Lbp],
                    algorithm_threshold: 0.70,
                    fusion_threshold: 0.75,
                    min_quality: 0.60,
                    max_attempts: 10,
                    lockout_seconds: 300,
                },
                LevelPolicy {
                    face_algorithms: vec![Algorithm::DeepFace, Algorithm::ResNet, Algorithm::Vgg16],
                    fingerprint_algorithms: vec![Algorithm::Hog, Algorithm::Lbp, Algorithm::Gabor],
                    algorithm_threshold: 0.80,
                    fusion_threshold: 0.85,
                    min_quality: 0.75,
                    max_attempts: 5,
                    lockout_seconds: 600,
                },
                LevelPolicy {
                    face_algorithms: all_face.clone(),
                    fingerprint_algorithms: all_fp.clone(),
                    algorithm_threshold: 0.90,
                    fusion_threshold: 0.95,
                    min_quality: 0.85,
                    max_attempts: 3,
                    lockout_seconds: 1800,
                },
                LevelPolicy {
                    face_algorithms: all_face,
                    fingerprint_algorithms: all_fp,
                    algorithm_threshold: 0.95,
                    fusion_threshold: 0.98,
                    min_quality: 0.95,
                    max_attempts: 2,
                    lockout_seconds: 3600,
                },
            ],
            weights: WeightTable::standard(),
        }
    }

    /// Waliduje sparsowaną tabelę
    pub fn from_table(table: PolicyTable) -> Result<Self, PolicyError> {
        let PolicyTable { mut levels, weights } = table;

        let mut ordered = Vec::with_capacity(SecurityLevel::ALL.len());
        for level in SecurityLevel::ALL {
            let mut policy = levels.remove(&level).ok_or(PolicyError::MissingLevel(level))?;
            validate_level(level, &mut policy)?;
            ordered.push(policy);
        }

        for pair in SecurityLevel::ALL.windows(2) {
            let (lower, higher) = (pair[0], pair[1]);
            let (lo, hi) = (&ordered[lower.index()], &ordered[higher.index()]);
            let checks = [
                ("algorithm_threshold", lo.algorithm_threshold <= hi.algorithm_threshold),
                ("fusion_threshold", lo.fusion_threshold <= hi.fusion_threshold),
                ("min_quality", lo.min_quality <= hi.min_quality),
                ("max_attempts", lo.max_attempts >= hi.max_attempts),
            ];
            if let Some((field, _)) = checks.iter().find(|(_, ok)| !*ok) {
                return Err(PolicyError::NotMonotonic {
                    field: *field,
                    lower,
                    higher,
                });
            }
        }

        let used: Vec<Algorithm> = ordered
            .iter()
            .flat_map(|p| p.face_algorithms.iter().chain(&p.fingerprint_algorithms))
            .copied()
            .collect();
        if let Some(algorithm) = weights.first_invalid(used.iter()) {
            return Err(PolicyError::ZeroWeight(algorithm));
        }

        let levels: [LevelPolicy; 4] = ordered
            .try_into()
            .map_err(|_| PolicyError::MissingLevel(SecurityLevel::Low))?;
        Ok(Self { levels, weights })
    }

    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let table: PolicyTable = serde_json::from_str(json)?;
        Self::from_table(table)
    }

    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let json = std::fs::read_to_string(path)?;
        let policy = Self::from_json(&json)?;
        tracing::info!(path = %path.display(), "security policy loaded");
        Ok(policy)
    }

    pub fn level(&self, level: SecurityLevel) -> &LevelPolicy {
        &self.levels[level.index()]
    }

    pub fn weights(&self) -> &WeightTable {
        &self.weights
    }

    pub fn to_table(&self) -> PolicyTable {
        PolicyTable {
            levels: SecurityLevel::ALL
                .into_iter()
                .map(|level| (level, self.level(level).clone()))
                .collect(),
            weights: self.weights.clone(),
        }
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.to_table()).unwrap_or_default()
    }
}

fn validate_level(level: SecurityLevel, policy: &mut LevelPolicy) -> Result<(), PolicyError> {
    for modality in Modality::ALL {
        let algorithms = match modality {
            Modality::Face => &mut policy.face_algorithms,
            Modality::Fingerprint => &mut policy.fingerprint_algorithms,
        };
        if algorithms.is_empty() {
            return Err(PolicyError::EmptyAlgorithmSet { level, modality });
        }
        if let Some(algorithm) = algorithms.iter().find(|a| a.modality() != modality) {
            return Err(PolicyError::AlgorithmModality {
                level,
                algorithm: *algorithm,
                modality,
            });
        }
        algorithms.sort();
        algorithms.dedup();
    }

    for (field, value) in [
        ("algorithm_threshold", policy.algorithm_threshold),
        ("fusion_threshold", policy.fusion_threshold),
        ("min_quality", policy.min_quality),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(PolicyError::ThresholdOutOfRange { level, field, value });
        }
    }

    if policy.max_attempts == 0 {
        return Err(PolicyError::InvalidLimit {
            level,
            field: "max_attempts",
        });
    }
    if policy.lockout_seconds == 0 {
        return Err(PolicyError::InvalidLimit {
            level,
            field: "lockout_seconds",
        });
    }
    if policy.lockout_seconds > MAX_LOCKOUT_SECONDS {
        return Err(PolicyError::LockoutTooLong {
            level,
            seconds: policy.lockout_seconds,
            max: MAX_LOCKOUT_SECONDS,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_standard_policy_validates() {
        let standard = SecurityPolicy::standard();
        let reparsed = SecurityPolicy::from_table(standard.to_table()).unwrap();
        assert_eq!(reparsed, standard);
        assert_eq!(standard.level(SecurityLevel::Medium).max_attempts, 5);
        assert_eq!(standard.level(SecurityLevel::Maximum).fusion_threshold, 0.98);
    }

    #[test]
    fn test_levels_are_monotonic() {
        let policy = SecurityPolicy::standard();
        for (i, lower) in SecurityLevel::ALL.iter().enumerate() {
            for higher in &SecurityLevel::ALL[i + 1..] {
                let (lo, hi) = (policy.level(*lower), policy.level(*higher));
                assert!(lo.fusion_threshold <= hi.fusion_threshold);
                assert!(lo.max_attempts >= hi.max_attempts);
            }
        }
    }

    #[test]
    fn test_level_ordering_and_parsing() {
        assert!(SecurityLevel::Low < SecurityLevel::Medium);
        assert!(SecurityLevel::High < SecurityLevel::Maximum);
        assert_eq!("maximum".parse::<SecurityLevel>().unwrap(), SecurityLevel::Maximum);
        assert!(matches!(
            "ULTRA".parse::<SecurityLevel>(),
            Err(PolicyError::UnknownLevel(_))
        ));
        assert_eq!(SecurityLevel::default(), SecurityLevel::Medium);
    }

    #[test]
    fn test_empty_algorithm_set_is_fatal() {
        let mut table = SecurityPolicy::standard().to_table();
        table
            .levels
            .get_mut(&SecurityLevel::High)
            .unwrap()
            .fingerprint_algorithms
            .clear();
        assert!(matches!(
            SecurityPolicy::from_table(table),
            Err(PolicyError::EmptyAlgorithmSet {
                level: SecurityLevel::High,
                modality: Modality::Fingerprint
            })
        ));
    }

    #[test]
    fn test_missing_level_is_fatal() {
        let mut table = SecurityPolicy::standard().to_table();
        table.levels.remove(&SecurityLevel::Low);
        assert!(matches!(
            SecurityPolicy::from_table(table),
            Err(PolicyError::MissingLevel(SecurityLevel::Low))
        ));
    }

    #[test]
    fn test_non_monotonic_thresholds_are_fatal() {
        let mut table = SecurityPolicy::standard().to_table();
        table.levels.get_mut(&SecurityLevel::Low).unwrap().fusion_threshold = 0.99;
        assert!(matches!(
            SecurityPolicy::from_table(table),
            Err(PolicyError::NotMonotonic {
                field: "fusion_threshold",
                ..
            })
        ));

        let mut table = SecurityPolicy::standard().to_table();
        table.levels.get_mut(&SecurityLevel::Maximum).unwrap().max_attempts = 20;
        assert!(matches!(
            SecurityPolicy::from_table(table),
            Err(PolicyError::NotMonotonic {
                field: "max_attempts",
                ..
            })
        ));
    }

    #[test]
    fn test_wrong_modality_algorithm_is_fatal() {
        let mut table = SecurityPolicy::standard().to_table();
        table
            .levels
            .get_mut(&SecurityLevel::Low)
            .unwrap()
            .face_algorithms
            .push(Algorithm::Hog);
        assert!(matches!(
            SecurityPolicy::from_table(table),
            Err(PolicyError::AlgorithmModality { .. })
        ));
    }

    #[test]
    fn test_zero_weight_is_fatal() {
        let mut table = SecurityPolicy::standard().to_table();
        table.weights = table.weights.with(Algorithm::Lbp, 0.0);
        assert!(matches!(
            SecurityPolicy::from_table(table),
            Err(PolicyError::ZeroWeight(Algorithm::Lbp))
        ));
    }

    #[test]
    fn test_oversized_lockout_is_fatal() {
        for seconds in [u64::MAX, 100_000_000_000_000_000, MAX_LOCKOUT_SECONDS + 1] {
            let mut table = SecurityPolicy::standard().to_table();
            table.levels.get_mut(&SecurityLevel::Maximum).unwrap().lockout_seconds = seconds;
            assert!(matches!(
                SecurityPolicy::from_table(table),
                Err(PolicyError::LockoutTooLong {
                    level: SecurityLevel::Maximum,
                    ..
                })
            ));
        }

        let mut table = SecurityPolicy::standard().to_table();
        table.levels.get_mut(&SecurityLevel::Maximum).unwrap().lockout_seconds =
            MAX_LOCKOUT_SECONDS;
        assert!(SecurityPolicy::from_table(table).is_ok());
    }

    #[test]
    fn test_lockout_duration_never_goes_negative() {
        let mut level = SecurityPolicy::standard().level(SecurityLevel::Low).clone();
        level.lockout_seconds = u64::MAX;
        assert_eq!(
            level.lockout_duration(),
            Duration::seconds(MAX_LOCKOUT_SECONDS as i64)
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SecurityPolicy::standard().to_json_pretty().as_bytes())
            .unwrap();
        let loaded = SecurityPolicy::load(file.path()).unwrap();
        assert_eq!(loaded, SecurityPolicy::standard());
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let json = SecurityPolicy::standard()
            .to_json_pretty()
            .replacen("\"levels\"", "\"bypass\": true, \"levels\"", 1);
        assert!(matches!(
            SecurityPolicy::from_json(&json),
            Err(PolicyError::Parse(_))
        ));
    }
}
