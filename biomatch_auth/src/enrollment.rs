//! Rejestracja - obrazy na szablony, z bramką jakości

use std::sync::Arc;

use biomatch_core::{
    ExtractorRegistry, HeuristicQualityAssessor, Modality, Preprocessor, QualityAssessor, Template,
};

use crate::audit::{AuditEvent, AuditEventType, AuditSink};
use crate::error::{AuthError, AuthResult};
use crate::policy::{SecurityLevel, SecurityPolicy};
use crate::registry::{IdentityRegistry, TemplateStore};

/// Computes templates for enrollment
///
/// Every image must decode and pass the level's minimum quality; one bad
/// image fails the whole batch so a gallery is never half-enrolled.
pub struct Enroller {
    extractors: Arc<ExtractorRegistry>,
    preprocessor: Preprocessor,
    quality: Arc<dyn QualityAssessor>,
    policy: Arc<SecurityPolicy>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl Enroller {
    pub fn new(extractors: Arc<ExtractorRegistry>, policy: Arc<SecurityPolicy>) -> Self {
        Self {
            extractors,
            preprocessor: Preprocessor::default(),
            quality: Arc::new(HeuristicQualityAssessor::default()),
            policy,
            audit: None,
        }
    }

    pub fn with_preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_quality(mut self, quality: Arc<dyn QualityAssessor>) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// One template per registered algorithm of `modality` per image
    pub fn compute_templates(
        &self,
        images: &[Vec<u8>],
        modality: Modality,
        level: SecurityLevel,
    ) -> AuthResult<Vec<Template>> {
        let required = self.policy.level(level).min_quality;
        let algorithms: Vec<_> = modality
            .algorithms()
            .iter()
            .copied()
            .filter(|a| self.extractors.contains(*a))
            .collect();

        let mut templates = Vec::with_capacity(images.len() * algorithms.len());
        for (index, raw) in images.iter().enumerate() {
            let normalized = self.preprocessor.normalize(raw, modality)?;
            let quality = self.quality.assess(&normalized).clamp(0.0, 1.0);
            if quality < required {
                tracing::warn!(index, quality, required, "enrollment image below minimum quality");
                return Err(AuthError::Quality {
                    index,
                    quality,
                    required,
                });
            }

            for algorithm in &algorithms {
                let extractor = self.extractors.get(*algorithm)?;
                match extractor.extract(&normalized) {
                    Some(embedding) => templates.push(Template::new(*algorithm, embedding, quality)?),
                    None => tracing::debug!(index, %algorithm, "no feature for enrollment image"),
                }
            }
        }

        if templates.is_empty() {
            return Err(AuthError::NoUsableTemplates);
        }
        Ok(templates)
    }

    /// Compute at the identity's own level and append to the registry
    pub fn enroll(
        &self,
        registry: &IdentityRegistry,
        identity_id: &str,
        images: &[Vec<u8>],
        modality: Modality,
    ) -> AuthResult<usize> {
        let level = registry.security_level(identity_id)?;
        let templates = self.compute_templates(images, modality, level)?;
        let added = registry.enroll(identity_id, templates)?;

        if let Some(audit) = &self.audit {
            audit.log_event(
                AuditEvent::new(AuditEventType::UserEnrolled, identity_id)
                    .with("modality", modality.as_str())
                    .with("images", images.len())
                    .with("templates", added),
            );
        }
        tracing::info!(identity = identity_id, %modality, added, "enrollment complete");
        Ok(added)
    }
}
