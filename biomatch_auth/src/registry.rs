//! Tożsamości i ich zarejestrowane szablony
//!
//! `TemplateStore` to warstwa trwałości, przez którą czyta orkiestrator.
//! `IdentityRegistry` to implementacja w pamięci.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use biomatch_core::{Algorithm, CorpusEntry, Modality, Template};

use crate::error::{AuthError, AuthResult};
use crate::policy::SecurityLevel;

/// Enrolled identity; owns its templates exclusively
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    id: String,
    security_level: SecurityLevel,
    #[serde(skip)]
    templates: BTreeMap<Modality, Vec<Template>>,
    created_at: DateTime<Utc>,
    last_success: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn new(id: impl Into<String>, security_level: SecurityLevel) -> Self {
        Self {
            id: id.into(),
            security_level,
            templates: BTreeMap::new(),
            created_at: Utc::now(),
            last_success: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.security_level
    }

    pub fn templates(&self, modality: Modality) -> &[Template] {
        self.templates.get(&modality).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn template_count(&self) -> usize {
        self.templates.values().map(Vec::len).sum()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }
}

/// Read side of template persistence
pub trait TemplateStore: Send + Sync {
    fn load_templates(&self, identity_id: &str, modality: Modality) -> AuthResult<Vec<Template>>;

    /// Minimum level the identity was registered at
    fn security_level(&self, identity_id: &str) -> AuthResult<SecurityLevel>;

    fn record_success(&self, identity_id: &str, at: DateTime<Utc>);
}

/// In-memory identity store
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    identities: RwLock<HashMap<String, Identity>>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: &str, security_level: SecurityLevel) -> AuthResult<()> {
        let mut identities = self.identities.write();
        if identities.contains_key(id) {
            return Err(AuthError::IdentityExists(id.to_string()));
        }
        identities.insert(id.to_string(), Identity::new(id, security_level));
        tracing::info!(identity = id, level = %security_level, "identity registered");
        Ok(())
    }

    /// Append templates; existing ones are never replaced
    pub fn enroll(&self, id: &str, templates: Vec<Template>) -> AuthResult<usize> {
        let mut identities = self.identities.write();
        let identity = identities
            .get_mut(id)
            .ok_or_else(|| AuthError::UnknownIdentity(id.to_string()))?;

        let added = templates.len();
        for template in templates {
            identity
                .templates
                .entry(template.modality())
                .or_default()
                .push(template);
        }
        tracing::debug!(identity = id, added, total = identity.template_count(), "templates enrolled");
        Ok(added)
    }

    pub fn get(&self, id: &str) -> Option<Identity> {
        self.identities.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.identities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored template of one algorithm as 1:N corpus entries
    pub fn corpus(&self, algorithm: Algorithm) -> Vec<CorpusEntry> {
        let identities = self.identities.read();
        let mut ids: Vec<&String> = identities.keys().collect();
        ids.sort();

        let mut entries = Vec::new();
        for id in ids {
            let identity = &identities[id];
            for (n, template) in identity
                .templates(algorithm.modality())
                .iter()
                .filter(|t| t.algorithm() == algorithm)
                .enumerate()
            {
                entries.push(CorpusEntry::template(format!("{id}#{n}"), id.clone(), template.clone()));
            }
        }
        entries
    }
}

impl TemplateStore for IdentityRegistry {
    fn load_templates(&self, identity_id: &str, modality: Modality) -> AuthResult<Vec<Template>> {
        let identities = self.identities.read();
        let identity = identities
            .get(identity_id)
            .ok_or_else(|| AuthError::UnknownIdentity(identity_id.to_string()))?;
        Ok(identity.templates(modality).to_vec())
    }

    fn security_level(&self, identity_id: &str) -> AuthResult<SecurityLevel> {
        self.identities
            .read()
            .get(identity_id)
            .map(Identity::security_level)
            .ok_or_else(|| AuthError::UnknownIdentity(identity_id.to_string()))
    }

    fn record_success(&self, identity_id: &str, at: DateTime<Utc>) {
        if let Some(identity) = self.identities.write().get_mut(identity_id) {
            identity.last_success = Some(at);
        }
    }
}
