//! Orkiestrator uwierzytelniania - jedna decyzja na żądanie
//!
//! ```text
//! RECEIVED → lock check ──locked──────────────→ LOCKED_OUT
//!               │
//!               ▼
//!          QUALITY_CHECK ──below minimum───────→ REJECTED_QUALITY
//!               │
//!               ▼
//!           MATCHING (extract ∥, score ∥) → FUSING → ACCEPT | REJECT
//!                                                        │
//!                                                        ▼
//!                                             attempt recorded
//! ```
//!
//! Każde żądanie jest najpierw oceniane (blokada, jakość, dopasowanie,
//! fuzja) bez zmiany stanu współdzielonego, a dopiero potem zatwierdzane.
//! Do licznika prób trafia wyłącznie ostateczne ACCEPT albo REJECT;
//! błędy, odrzucenia jakości, blokady i anulowane żądania go nie
//! zmieniają. ACCEPT dla tożsamości zablokowanej w trakcie dopasowania
//! kończy się jako LOCKED_OUT.
//!
//! Żądanie podwójne ocenia twarz i odcisk równolegle. Akceptacja wymaga
//! zaliczenia obu modalności i średniej pewności nie niższej niż próg
//! fuzji poziomu.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use secrecy::SecretString;
use serde::Serialize;

use biomatch_core::{
    best_of, fuse_detailed, Algorithm, BoundedExecutor, CancelToken, CoreError, Embedding, Extractor,
    ExtractorRegistry, HeuristicQualityAssessor, IdentificationReport, IdentificationScanner,
    Modality, NormalizedImage, Preprocessor, Probe, QualityAssessor, ReferenceCorpus, ScoreMap,
    TaskOutcome, Template,
};

use crate::attempts::{AttemptTracker, LockStatus};
use crate::audit::{AuditEvent, AuditEventType, AuditSink};
use crate::error::{AuthError, AuthResult};
use crate::policy::{LevelPolicy, SecurityLevel, SecurityPolicy};
use crate::registry::TemplateStore;
use crate::session::SessionIssuer;

// ═══════════════════════════════════════════════════════════════════
// REQUEST / RESPONSE
// ═══════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct AuthRequest {
    pub identity_id: String,
    pub probe: Probe,
    pub level: SecurityLevel,
}

impl AuthRequest {
    pub fn new(identity_id: impl Into<String>, probe: Probe, level: SecurityLevel) -> Self {
        Self {
            identity_id: identity_id.into(),
            probe,
            level,
        }
    }

    pub fn modality(&self) -> Modality {
        self.probe.modality()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Accept,
    Reject,
    RejectedQuality,
    LockedOut,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "ACCEPT",
            Self::Reject => "REJECT",
            Self::RejectedQuality => "REJECTED_QUALITY",
            Self::LockedOut => "LOCKED_OUT",
        }
    }
}

/// Diagnostics for one algorithm; never gates the decision
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlgorithmScore {
    pub score: Option<f32>,
    /// score ≥ the level's per-algorithm threshold
    pub passed: bool,
    pub templates_scored: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl AlgorithmScore {
    fn null(note: impl Into<String>) -> Self {
        Self {
            score: None,
            passed: false,
            templates_scored: 0,
            note: Some(note.into()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub identity_id: String,
    pub modality: Modality,
    pub decision: Decision,
    pub security_level: SecurityLevel,
    pub fused_confidence: f32,
    pub fusion_threshold: f32,
    pub per_algorithm: BTreeMap<Algorithm, AlgorithmScore>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    pub elapsed_ms: u64,
    /// Issued on ACCEPT when a session issuer is configured
    #[serde(skip)]
    pub session: Option<SecretString>,
}

impl AuthResponse {
    pub fn is_accepted(&self) -> bool {
        self.decision == Decision::Accept
    }

    pub fn score_map(&self) -> ScoreMap {
        self.per_algorithm
            .iter()
            .map(|(algorithm, s)| (*algorithm, s.score))
            .collect()
    }
}

/// Face and fingerprint presented together for one identity
#[derive(Debug)]
pub struct DualAuthRequest {
    pub identity_id: String,
    pub face: Probe,
    pub fingerprint: Probe,
    pub level: SecurityLevel,
}

impl DualAuthRequest {
    pub fn new(
        identity_id: impl Into<String>,
        face: Vec<u8>,
        fingerprint: Vec<u8>,
        level: SecurityLevel,
    ) -> Self {
        Self {
            identity_id: identity_id.into(),
            face: Probe::new(Modality::Face, face),
            fingerprint: Probe::new(Modality::Fingerprint, fingerprint),
            level,
        }
    }
}

/// Combined outcome of a dual request. The nested responses carry each
/// modality's own verdict; only `decision` was committed.
#[derive(Debug, Serialize)]
pub struct DualAuthResponse {
    pub identity_id: String,
    pub decision: Decision,
    pub security_level: SecurityLevel,
    /// Mean of the two fused confidences
    pub combined_confidence: f32,
    pub fusion_threshold: f32,
    pub face: AuthResponse,
    pub fingerprint: AuthResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    pub elapsed_ms: u64,
    #[serde(skip)]
    pub session: Option<SecretString>,
}

impl DualAuthResponse {
    fn new(decision: Decision, face: AuthResponse, fingerprint: AuthResponse) -> Self {
        Self {
            identity_id: face.identity_id.clone(),
            decision,
            security_level: face.security_level.max(fingerprint.security_level),
            combined_confidence: (face.fused_confidence + fingerprint.fused_confidence) / 2.0,
            fusion_threshold: face.fusion_threshold.max(fingerprint.fusion_threshold),
            retry_after_secs: face.retry_after_secs.max(fingerprint.retry_after_secs),
            face,
            fingerprint,
            elapsed_ms: 0,
            session: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.decision == Decision::Accept
    }
}

// ═══════════════════════════════════════════════════════════════════
// AUTHENTICATOR
// ═══════════════════════════════════════════════════════════════════

/// Shared, immutable orchestrator; clone the `Arc`s, not the engine
pub struct Authenticator {
    policy: Arc<SecurityPolicy>,
    store: Arc<dyn TemplateStore>,
    tracker: Arc<AttemptTracker>,
    extractors: Arc<ExtractorRegistry>,
    preprocessor: Preprocessor,
    quality: Arc<dyn QualityAssessor>,
    executor: BoundedExecutor,
    sessions: Option<Arc<dyn SessionIssuer>>,
    audit: Option<Arc<dyn AuditSink>>,
}

pub struct AuthenticatorBuilder {
    store: Arc<dyn TemplateStore>,
    policy: Arc<SecurityPolicy>,
    tracker: Option<Arc<AttemptTracker>>,
    extractors: Option<Arc<ExtractorRegistry>>,
    preprocessor: Preprocessor,
    quality: Option<Arc<dyn QualityAssessor>>,
    executor: BoundedExecutor,
    sessions: Option<Arc<dyn SessionIssuer>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl AuthenticatorBuilder {
    pub fn new(store: Arc<dyn TemplateStore>) -> Self {
        Self {
            store,
            policy: Arc::new(SecurityPolicy::standard()),
            tracker: None,
            extractors: None,
            preprocessor: Preprocessor::default(),
            quality: None,
            executor: BoundedExecutor::default(),
            sessions: None,
            audit: None,
        }
    }

    pub fn policy(mut self, policy: Arc<SecurityPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn tracker(mut self, tracker: Arc<AttemptTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn extractors(mut self, extractors: Arc<ExtractorRegistry>) -> Self {
        self.extractors = Some(extractors);
        self
    }

    pub fn preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn quality(mut self, quality: Arc<dyn QualityAssessor>) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn executor(mut self, executor: BoundedExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn sessions(mut self, sessions: Arc<dyn SessionIssuer>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn build(self) -> Authenticator {
        Authenticator {
            policy: self.policy,
            store: self.store,
            tracker: self.tracker.unwrap_or_default(),
            extractors: self
                .extractors
                .unwrap_or_else(|| Arc::new(ExtractorRegistry::standard())),
            preprocessor: self.preprocessor,
            quality: self
                .quality
                .unwrap_or_else(|| Arc::new(HeuristicQualityAssessor::default())),
            executor: self.executor,
            sessions: self.sessions,
            audit: self.audit,
        }
    }
}

/// Probe feature for one algorithm, shared by its scoring jobs
struct ProbeFeature {
    algorithm: Algorithm,
    extractor: Extractor,
    feature: Arc<Embedding>,
    references: Vec<Embedding>,
}

/// Read-only half of a request
enum Evaluation {
    /// Decided before matching (locked out, low quality)
    Settled(AuthResponse),
    /// Fused; `decision` is provisional until committed
    Scored(AuthResponse),
}

impl Evaluation {
    fn into_response(self) -> AuthResponse {
        match self {
            Self::Settled(response) | Self::Scored(response) => response,
        }
    }
}

fn cancel_aware(err: CoreError) -> AuthError {
    match err {
        CoreError::Cancelled => AuthError::Cancelled,
        other => AuthError::Core(other),
    }
}

impl Authenticator {
    pub fn builder(store: Arc<dyn TemplateStore>) -> AuthenticatorBuilder {
        AuthenticatorBuilder::new(store)
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    pub fn tracker(&self) -> &AttemptTracker {
        &self.tracker
    }

    pub fn extractors(&self) -> &Arc<ExtractorRegistry> {
        &self.extractors
    }

    /// 1:N scanner sharing this engine's extractors and worker bound
    pub fn scanner(&self) -> IdentificationScanner {
        IdentificationScanner::new(
            self.extractors.clone(),
            self.preprocessor,
            self.executor.clone(),
        )
    }

    /// 1:N search; never consults policy thresholds or the tracker
    pub async fn identify(
        &self,
        probe: &Probe,
        algorithm: Algorithm,
        corpus: &ReferenceCorpus,
        cancel: &CancelToken,
    ) -> AuthResult<IdentificationReport> {
        self.scanner()
            .scan(probe, algorithm, corpus, cancel)
            .await
            .map_err(cancel_aware)
    }

    pub async fn authenticate(&self, request: &AuthRequest) -> AuthResult<AuthResponse> {
        self.authenticate_cancellable(request, &CancelToken::new())
            .await
    }

    #[tracing::instrument(
        name = "authenticate",
        skip_all,
        fields(
            identity = %request.identity_id,
            modality = %request.modality(),
            level = tracing::field::Empty,
        )
    )]
    pub async fn authenticate_cancellable(
        &self,
        request: &AuthRequest,
        cancel: &CancelToken,
    ) -> AuthResult<AuthResponse> {
        let started = Instant::now();
        let evaluation = self
            .evaluate(&request.identity_id, &request.probe, request.level, cancel)
            .await?;

        let response = match evaluation {
            Evaluation::Settled(response) => response,
            Evaluation::Scored(mut response) => {
                if response.decision == Decision::Accept {
                    self.on_accept(&mut response);
                } else {
                    self.on_reject(&mut response);
                }
                tracing::info!(
                    decision = response.decision.as_str(),
                    confidence = response.fused_confidence,
                    threshold = response.fusion_threshold,
                    "authentication decided"
                );
                response
            }
        };
        Ok(finish(response, started))
    }

    pub async fn authenticate_dual(&self, request: &DualAuthRequest) -> AuthResult<DualAuthResponse> {
        self.authenticate_dual_cancellable(request, &CancelToken::new())
            .await
    }

    /// Face and fingerprint in one decision; attempts are recorded per modality
    #[tracing::instrument(
        name = "authenticate_dual",
        skip_all,
        fields(identity = %request.identity_id, level = tracing::field::Empty)
    )]
    pub async fn authenticate_dual_cancellable(
        &self,
        request: &DualAuthRequest,
        cancel: &CancelToken,
    ) -> AuthResult<DualAuthResponse> {
        let started = Instant::now();
        let identity_id = request.identity_id.as_str();
        let (face, fingerprint) = tokio::join!(
            self.evaluate(identity_id, &request.face, request.level, cancel),
            self.evaluate(identity_id, &request.fingerprint, request.level, cancel),
        );

        let mut response = match (face?, fingerprint?) {
            (Evaluation::Scored(face), Evaluation::Scored(fingerprint)) => {
                self.settle_dual(face, fingerprint)
            }
            // One side never reached matching; nothing is recorded
            (face, fingerprint) => {
                let (face, fingerprint) = (face.into_response(), fingerprint.into_response());
                let decision = if face.decision == Decision::LockedOut
                    || fingerprint.decision == Decision::LockedOut
                {
                    Decision::LockedOut
                } else {
                    Decision::RejectedQuality
                };
                DualAuthResponse::new(decision, face, fingerprint)
            }
        };

        tracing::info!(
            decision = response.decision.as_str(),
            combined = response.combined_confidence,
            threshold = response.fusion_threshold,
            "dual authentication decided"
        );
        response.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(response)
    }

    /// Lock check, quality gate, matching and fusion; no shared state is
    /// written here
    async fn evaluate(
        &self,
        identity_id: &str,
        probe: &Probe,
        requested: SecurityLevel,
        cancel: &CancelToken,
    ) -> AuthResult<Evaluation> {
        let modality = probe.modality();

        // Identity's enrolled level is a floor on the requested one
        let level = requested.max(self.store.security_level(identity_id)?);
        tracing::Span::current().record("level", level.as_str());
        let limits = self.policy.level(level);

        let mut response = AuthResponse {
            identity_id: identity_id.to_string(),
            modality,
            decision: Decision::Reject,
            security_level: level,
            fused_confidence: 0.0,
            fusion_threshold: limits.fusion_threshold,
            per_algorithm: BTreeMap::new(),
            quality: None,
            retry_after_secs: None,
            elapsed_ms: 0,
            session: None,
        };

        let status = self.tracker.status(identity_id, modality, limits);
        if status.is_locked() {
            self.lock_out(&mut response, status);
            return Ok(Evaluation::Settled(response));
        }

        let normalized = self.preprocessor.normalize(probe.raw(), modality)?;
        let quality = self.quality.assess(&normalized).clamp(0.0, 1.0);
        response.quality = Some(quality);
        if quality < limits.min_quality {
            response.decision = Decision::RejectedQuality;
            tracing::info!(%modality, quality, required = limits.min_quality, "probe below minimum quality");
            self.audit(
                AuditEvent::new(AuditEventType::AuthRejectedQuality, identity_id)
                    .with("modality", modality.as_str())
                    .with("quality", quality)
                    .with("required", limits.min_quality),
            );
            return Ok(Evaluation::Settled(response));
        }

        let templates = self.store.load_templates(identity_id, modality)?;
        if templates.is_empty() {
            return Err(AuthError::NotEnrolled {
                identity: identity_id.to_string(),
                modality,
            });
        }

        response.per_algorithm = self
            .match_templates(Arc::new(normalized), &templates, limits, cancel)
            .await?;
        let fusion = fuse_detailed(&response.score_map(), self.policy.weights());

        // Nothing below may run for a request the caller abandoned
        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }
        if fusion.is_empty() {
            tracing::error!(%modality, "every algorithm failed to produce a score");
            return Err(AuthError::MatchingUnavailable);
        }
        tracing::debug!(
            %modality,
            confidence = fusion.confidence,
            contributing = ?fusion.contributing,
            "scores fused"
        );

        response.fused_confidence = fusion.confidence;
        response.decision = if fusion.confidence >= limits.fusion_threshold {
            Decision::Accept
        } else {
            Decision::Reject
        };
        Ok(Evaluation::Scored(response))
    }

    /// Per-algorithm extraction, then per-template scoring, both fanned out
    async fn match_templates(
        &self,
        normalized: Arc<NormalizedImage>,
        templates: &[Template],
        limits: &LevelPolicy,
        cancel: &CancelToken,
    ) -> AuthResult<BTreeMap<Algorithm, AlgorithmScore>> {
        let modality = normalized.modality();
        let mut per_algorithm = BTreeMap::new();
        let mut pending = Vec::new();

        for &algorithm in limits.algorithms(modality) {
            let extractor = match self.extractors.get(algorithm) {
                Ok(extractor) => extractor.clone(),
                Err(_) => {
                    per_algorithm.insert(algorithm, AlgorithmScore::null("not registered"));
                    continue;
                }
            };
            let references: Vec<Embedding> = templates
                .iter()
                .filter(|t| t.algorithm() == algorithm)
                .map(|t| t.embedding().clone())
                .collect();
            if references.is_empty() {
                per_algorithm.insert(algorithm, AlgorithmScore::null("no enrolled templates"));
                continue;
            }
            pending.push((algorithm, extractor, references));
        }

        let extraction_jobs = pending.iter().map(|(_, extractor, _)| {
            let extractor = extractor.clone();
            let image = normalized.clone();
            move || extractor.extract(&image)
        });
        let outcomes = self
            .executor
            .run_all(extraction_jobs.collect::<Vec<_>>(), cancel)
            .await
            .map_err(cancel_aware)?;

        let mut features = Vec::new();
        for ((algorithm, extractor, references), outcome) in pending.into_iter().zip(outcomes) {
            let note = match outcome {
                TaskOutcome::Completed(feature) => {
                    features.push(ProbeFeature {
                        algorithm,
                        extractor,
                        feature: Arc::new(feature),
                        references,
                    });
                    continue;
                }
                TaskOutcome::Empty => "no probe feature".to_string(),
                TaskOutcome::TimedOut => "extraction timed out".to_string(),
                TaskOutcome::Failed(reason) => format!("extraction failed: {reason}"),
            };
            tracing::debug!(%algorithm, note = %note, "algorithm degraded to null");
            per_algorithm.insert(algorithm, AlgorithmScore::null(note));
        }

        let mut owners = Vec::new();
        let mut scoring_jobs = Vec::new();
        for (slot, probe) in features.iter().enumerate() {
            for reference in &probe.references {
                let extractor = probe.extractor.clone();
                let feature = probe.feature.clone();
                let reference = reference.clone();
                let algorithm = probe.algorithm;
                owners.push(slot);
                scoring_jobs.push(move || match extractor.score(&feature, &reference) {
                    Ok(score) => score,
                    Err(e) => {
                        tracing::warn!(%algorithm, error = %e, "template could not be scored");
                        None
                    }
                });
            }
        }
        let scored = self
            .executor
            .run_all(scoring_jobs, cancel)
            .await
            .map_err(cancel_aware)?;

        let mut per_slot: Vec<Vec<f32>> = vec![Vec::new(); features.len()];
        for (slot, outcome) in owners.into_iter().zip(scored) {
            if let Some(score) = outcome.into_option() {
                per_slot[slot].push(score);
            }
        }

        for (probe, scores) in features.iter().zip(per_slot) {
            let templates_scored = scores.len();
            let entry = match best_of(scores) {
                Some(score) => AlgorithmScore {
                    score: Some(score),
                    passed: score >= limits.algorithm_threshold,
                    templates_scored,
                    note: None,
                },
                None => AlgorithmScore::null("no template could be scored"),
            };
            per_algorithm.insert(probe.algorithm, entry);
        }
        Ok(per_algorithm)
    }

    /// Turn `response` into LOCKED_OUT for the lock in `status`
    fn lock_out(&self, response: &mut AuthResponse, status: LockStatus) {
        response.decision = Decision::LockedOut;
        response.retry_after_secs = status.retry_after_secs(self.tracker.now());
        tracing::warn!(
            modality = %response.modality,
            retry_after = ?response.retry_after_secs,
            "attempt while locked out"
        );
        self.audit(
            AuditEvent::new(AuditEventType::AuthLockedOut, response.identity_id.as_str())
                .with("modality", response.modality.as_str())
                .with("retry_after_secs", response.retry_after_secs.unwrap_or(0)),
        );
    }

    /// Reset the failure window for a provisional ACCEPT. Returns false,
    /// with `response` turned LOCKED_OUT, when a concurrent request locked
    /// the identity while this one was matching.
    fn commit_success(&self, response: &mut AuthResponse) -> bool {
        let limits = self.policy.level(response.security_level);
        let (identity_id, modality) = (response.identity_id.as_str(), response.modality);
        if !self.tracker.record_success(identity_id, modality, limits) {
            let status = self.tracker.status(identity_id, modality, limits);
            self.lock_out(response, status);
            return false;
        }
        self.store.record_success(identity_id, self.tracker.now());
        true
    }

    fn issue_session(&self, identity_id: &str) -> Option<SecretString> {
        let sessions = self.sessions.as_ref()?;
        match sessions.issue_session(identity_id) {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::warn!(error = %e, "session issue failed");
                None
            }
        }
    }

    fn on_accept(&self, response: &mut AuthResponse) {
        if !self.commit_success(response) {
            return;
        }
        response.session = self.issue_session(&response.identity_id);
        self.audit(
            AuditEvent::new(AuditEventType::AuthSuccess, response.identity_id.as_str())
                .with("modality", response.modality.as_str())
                .with("level", response.security_level.as_str())
                .with("confidence", response.fused_confidence),
        );
    }

    fn on_reject(&self, response: &mut AuthResponse) {
        let limits = self.policy.level(response.security_level);
        let outcome =
            self.tracker
                .record_failure(&response.identity_id, response.modality, limits);

        self.audit(
            AuditEvent::new(AuditEventType::AuthFailed, response.identity_id.as_str())
                .with("modality", response.modality.as_str())
                .with("level", response.security_level.as_str())
                .with("confidence", response.fused_confidence),
        );
        if outcome.lock_triggered {
            response.retry_after_secs = outcome.status.retry_after_secs(self.tracker.now());
            self.audit(
                AuditEvent::new(AuditEventType::LockoutTriggered, response.identity_id.as_str())
                    .with("modality", response.modality.as_str())
                    .with("max_attempts", limits.max_attempts)
                    .with("lockout_seconds", limits.lockout_seconds),
            );
        }
    }

    /// Commit two scored modalities as one decision
    fn settle_dual(&self, mut face: AuthResponse, mut fingerprint: AuthResponse) -> DualAuthResponse {
        let combined = (face.fused_confidence + fingerprint.fused_confidence) / 2.0;
        let threshold = face.fusion_threshold.max(fingerprint.fusion_threshold);
        let accepted = face.decision == Decision::Accept
            && fingerprint.decision == Decision::Accept
            && combined >= threshold;

        if !accepted {
            // Only the modalities that failed on their own count as failures
            for side in [&mut face, &mut fingerprint] {
                if side.decision == Decision::Reject {
                    self.on_reject(side);
                }
            }
            let response = DualAuthResponse::new(Decision::Reject, face, fingerprint);
            self.audit(
                AuditEvent::new(AuditEventType::DualAuthFailed, response.identity_id.as_str())
                    .with("face_confidence", response.face.fused_confidence)
                    .with("fingerprint_confidence", response.fingerprint.fused_confidence)
                    .with("combined", combined)
                    .with("required", threshold),
            );
            return response;
        }

        // Face first; a lock found on either side stops the commit there
        let committed = self.commit_success(&mut face) && self.commit_success(&mut fingerprint);
        let decision = if committed {
            Decision::Accept
        } else {
            Decision::LockedOut
        };
        let mut response = DualAuthResponse::new(decision, face, fingerprint);
        if committed {
            response.session = self.issue_session(&response.identity_id);
            self.audit(
                AuditEvent::new(AuditEventType::DualAuthSuccess, response.identity_id.as_str())
                    .with("face_confidence", response.face.fused_confidence)
                    .with("fingerprint_confidence", response.fingerprint.fused_confidence)
                    .with("combined", combined),
            );
        }
        response
    }

    fn audit(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.log_event(event);
        }
    }
}

fn finish(mut response: AuthResponse, started: Instant) -> AuthResponse {
    response.elapsed_ms = started.elapsed().as_millis() as u64;
    response
}
