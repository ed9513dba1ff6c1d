//! Konfiguracja silnika
//!
//! Kolejność: jawna ścieżka > `BIOMATCH_CONFIG` >
//! `<config_dir>/biomatch/config.json` > wartości domyślne. Plik jawny
//! lub wskazany zmienną środowiskową musi istnieć; plik użytkownika jest
//! opcjonalny.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use biomatch_core::{ExecutorConfig, Preprocessor, QualityConfig};

use crate::error::{AuthError, AuthResult};
use crate::policy::SecurityPolicy;

pub const CONFIG_ENV: &str = "BIOMATCH_CONFIG";
pub const DEFAULT_TASK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 900;
pub const DEFAULT_AUDIT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Policy table file; the built-in table is used when absent
    pub policy_path: Option<PathBuf>,
    /// Worker bound; auto-tuned from the CPU count when absent
    pub max_workers: Option<usize>,
    pub task_timeout_ms: u64,
    pub session_ttl_seconds: u64,
    pub audit_capacity: usize,
    pub preprocess: Preprocessor,
    pub quality: QualityConfig,
    pub log_format: LogFormat,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy_path: None,
            max_workers: None,
            task_timeout_ms: DEFAULT_TASK_TIMEOUT_MS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECS,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
            preprocess: Preprocessor::default(),
            quality: QualityConfig::default(),
            log_format: LogFormat::Text,
        }
    }
}

/// Config plus the file it came from
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: EngineConfig,
    pub source: Option<PathBuf>,
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> AuthResult<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            AuthError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&json)
            .map_err(|e| AuthError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    /// Resolve against the process environment
    pub fn resolve(explicit: Option<&Path>) -> AuthResult<LoadedConfig> {
        let env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let user = dirs::config_dir().map(|dir| dir.join("biomatch").join("config.json"));
        Self::resolve_from(explicit, env.as_deref(), user.as_deref())
    }

    pub fn resolve_from(
        explicit: Option<&Path>,
        env: Option<&Path>,
        user: Option<&Path>,
    ) -> AuthResult<LoadedConfig> {
        if let Some(path) = explicit.or(env) {
            return Ok(LoadedConfig {
                config: Self::from_file(path)?,
                source: Some(path.to_path_buf()),
            });
        }

        if let Some(path) = user {
            match fs::metadata(path) {
                Ok(_) => {
                    return Ok(LoadedConfig {
                        config: Self::from_file(path)?,
                        source: Some(path.to_path_buf()),
                    })
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(AuthError::Io(e)),
            }
        }

        Ok(LoadedConfig {
            config: Self::default(),
            source: None,
        })
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        let base = match self.max_workers {
            Some(workers) => ExecutorConfig {
                max_workers: workers.max(1),
                ..ExecutorConfig::default()
            },
            None => ExecutorConfig::auto_tuned(),
        };
        ExecutorConfig {
            task_timeout: Duration::from_millis(self.task_timeout_ms.max(1)),
            ..base
        }
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_ttl_seconds.max(1) as i64)
    }

    /// Load and validate the configured policy (fatal on failure)
    pub fn load_policy(&self) -> AuthResult<SecurityPolicy> {
        match &self.policy_path {
            Some(path) => Ok(SecurityPolicy::load(path)?),
            None => Ok(SecurityPolicy::standard()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PolicyError;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_any_file() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("config.json");
        let loaded = EngineConfig::resolve_from(None, None, Some(&missing)).unwrap();
        assert!(loaded.source.is_none());
        assert_eq!(loaded.config.task_timeout_ms, DEFAULT_TASK_TIMEOUT_MS);
        assert_eq!(loaded.config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_explicit_path_wins_over_env_and_user() {
        let dir = tempdir().unwrap();
        let explicit = dir.path().join("explicit.json");
        let env = dir.path().join("env.json");
        let user = dir.path().join("user.json");
        fs::write(&explicit, r#"{"task_timeout_ms": 100}"#).unwrap();
        fs::write(&env, r#"{"task_timeout_ms": 200}"#).unwrap();
        fs::write(&user, r#"{"task_timeout_ms": 300}"#).unwrap();

        let loaded = EngineConfig::resolve_from(Some(&explicit), Some(&env), Some(&user)).unwrap();
        assert_eq!(loaded.config.task_timeout_ms, 100);
        let loaded = EngineConfig::resolve_from(None, Some(&env), Some(&user)).unwrap();
        assert_eq!(loaded.config.task_timeout_ms, 200);
        let loaded = EngineConfig::resolve_from(None, None, Some(&user)).unwrap();
        assert_eq!(loaded.config.task_timeout_ms, 300);
        assert_eq!(loaded.source.as_deref(), Some(user.as_path()));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = EngineConfig::resolve_from(Some(&dir.path().join("nope.json")), None, None)
            .unwrap_err();
        assert!(matches!(err, AuthError::Config(_)));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"skip_lockout": true}"#).unwrap();
        assert!(EngineConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_executor_config_from_settings() {
        let config = EngineConfig {
            max_workers: Some(3),
            task_timeout_ms: 250,
            ..EngineConfig::default()
        };
        let exec = config.executor_config();
        assert_eq!(exec.max_workers, 3);
        assert_eq!(exec.task_timeout, Duration::from_millis(250));

        let auto = EngineConfig::default().executor_config();
        assert!((1..=16).contains(&auto.max_workers));
    }

    #[test]
    fn test_policy_path_is_validated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        fs::write(&path, r#"{"levels": {}}"#).unwrap();
        let config = EngineConfig {
            policy_path: Some(path),
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.load_policy(),
            Err(AuthError::Policy(PolicyError::MissingLevel(_)))
        ));
        assert_eq!(
            EngineConfig::default().load_policy().unwrap(),
            SecurityPolicy::standard()
        );
    }
}
