//! Biomatch Core - Identification Scanner (1:N)
//!
//! Scores a probe against every entry of a reference corpus for one
//! algorithm and returns the full ranked list. This is a search, not an
//! access decision: no policy threshold is consulted here.
//!
//! The corpus is copy-on-write. Writers publish a new snapshot with a
//! bumped version; a scan holds one snapshot for its whole run, so it
//! never observes a half-applied enrollment.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

use crate::algorithm::Algorithm;
use crate::error::{CoreError, CoreResult};
use crate::executor::{BoundedExecutor, CancelToken, TaskOutcome};
use crate::extract::{Extractor, ExtractorRegistry};
use crate::preprocess::Preprocessor;
use crate::template::{Embedding, Probe, Template};

// ═══════════════════════════════════════════════════════════════════
// CORPUS
// ═══════════════════════════════════════════════════════════════════

/// What a corpus entry holds
#[derive(Debug, Clone)]
pub enum CorpusSource {
    /// Raw image bytes, decoded at scan time
    Image(Arc<[u8]>),
    /// Precomputed template
    Template(Template),
}

/// One reference in the corpus
#[derive(Debug, Clone)]
pub struct CorpusEntry {
    pub label: String,
    pub identity_id: Option<String>,
    pub source: CorpusSource,
}

impl CorpusEntry {
    pub fn image(label: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            label: label.into(),
            identity_id: None,
            source: CorpusSource::Image(bytes.into()),
        }
    }

    pub fn template(label: impl Into<String>, identity_id: impl Into<String>, template: Template) -> Self {
        Self {
            label: label.into(),
            identity_id: Some(identity_id.into()),
            source: CorpusSource::Template(template),
        }
    }

    pub fn with_identity(mut self, identity_id: impl Into<String>) -> Self {
        self.identity_id = Some(identity_id.into());
        self
    }
}

/// Immutable view of the corpus at one version
#[derive(Debug, Default)]
pub struct CorpusSnapshot {
    version: u64,
    entries: Vec<Arc<CorpusEntry>>,
}

impl CorpusSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Arc<CorpusEntry>] {
        &self.entries
    }
}

/// Versioned, concurrently readable reference corpus
#[derive(Debug, Default)]
pub struct ReferenceCorpus {
    current: RwLock<Arc<CorpusSnapshot>>,
}

impl ReferenceCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = CorpusEntry>) -> Self {
        let corpus = Self::new();
        corpus.extend(entries);
        corpus
    }

    /// Current snapshot; cheap, never blocks on a scan
    pub fn snapshot(&self) -> Arc<CorpusSnapshot> {
        self.current.read().clone()
    }

    /// Append one entry, returning the new version
    pub fn insert(&self, entry: CorpusEntry) -> u64 {
        self.extend(std::iter::once(entry))
    }

    /// Append several entries as one version bump
    pub fn extend(&self, entries: impl IntoIterator<Item = CorpusEntry>) -> u64 {
        let mut guard = self.current.write();
        let mut next = guard.entries.clone();
        next.extend(entries.into_iter().map(Arc::new));
        let version = guard.version + 1;
        *guard = Arc::new(CorpusSnapshot {
            version,
            entries: next,
        });
        version
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ═══════════════════════════════════════════════════════════════════
// REPORT
// ═══════════════════════════════════════════════════════════════════

/// One scored corpus entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedMatch {
    /// Position in the scanned snapshot
    pub index: usize,
    pub label: String,
    pub identity_id: Option<String>,
    pub score: f32,
}

/// Why a corpus entry has no score
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Undecodable,
    NoFeatures,
    TimedOut,
    Failed(String),
    AlgorithmMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedEntry {
    pub index: usize,
    pub label: String,
    pub reason: SkipReason,
}

/// Full result of a 1:N scan
#[derive(Debug, Clone, Serialize)]
pub struct IdentificationReport {
    pub algorithm: Algorithm,
    pub corpus_version: u64,
    pub corpus_size: usize,
    pub best: Option<RankedMatch>,
    /// Descending by score; ties keep corpus order
    pub ranked: Vec<RankedMatch>,
    pub skipped: Vec<SkippedEntry>,
    pub elapsed_ms: u64,
}

impl IdentificationReport {
    pub fn top(&self, n: usize) -> &[RankedMatch] {
        &self.ranked[..n.min(self.ranked.len())]
    }
}

// ═══════════════════════════════════════════════════════════════════
// SCANNER
// ═══════════════════════════════════════════════════════════════════

/// Linear best-match search over a corpus
#[derive(Clone)]
pub struct IdentificationScanner {
    registry: Arc<ExtractorRegistry>,
    preprocessor: Preprocessor,
    executor: BoundedExecutor,
}

impl IdentificationScanner {
    pub fn new(
        registry: Arc<ExtractorRegistry>,
        preprocessor: Preprocessor,
        executor: BoundedExecutor,
    ) -> Self {
        Self {
            registry,
            preprocessor,
            executor,
        }
    }

    pub async fn scan(
        &self,
        probe: &Probe,
        algorithm: Algorithm,
        corpus: &ReferenceCorpus,
        cancel: &CancelToken,
    ) -> CoreResult<IdentificationReport> {
        self.scan_observed(probe, algorithm, corpus, cancel, |_, _| {})
            .await
    }

    /// Scan, reporting `(finished, total)` as corpus entries complete
    pub async fn scan_observed(
        &self,
        probe: &Probe,
        algorithm: Algorithm,
        corpus: &ReferenceCorpus,
        cancel: &CancelToken,
        mut on_progress: impl FnMut(usize, usize),
    ) -> CoreResult<IdentificationReport> {
        let started = Instant::now();
        let extractor = self.registry.get(algorithm)?.clone();
        let modality = algorithm.modality();
        if probe.modality() != modality {
            return Err(CoreError::ModalityMismatch {
                algorithm,
                modality: probe.modality(),
            });
        }

        let normalized = self.preprocessor.normalize(probe.raw(), modality)?;
        let probe_feature = {
            let extractor = extractor.clone();
            let job = move || extractor.extract(&normalized);
            let mut outcomes = self.executor.run_all(std::iter::once(job), cancel).await?;
            match outcomes.pop() {
                Some(TaskOutcome::Completed(feature)) => Arc::new(feature),
                Some(TaskOutcome::TimedOut) => return Err(CoreError::ExtractionTimeout(algorithm)),
                Some(TaskOutcome::Failed(reason)) => {
                    return Err(CoreError::ExtractionFailed { algorithm, reason })
                }
                _ => return Err(CoreError::NoProbeFeatures(algorithm)),
            }
        };

        let snapshot = corpus.snapshot();
        let total = snapshot.len();
        let jobs = snapshot.entries().iter().map(|entry| {
            let entry = entry.clone();
            let extractor = extractor.clone();
            let probe_feature = probe_feature.clone();
            let preprocessor = self.preprocessor;
            move || {
                Some(score_entry(
                    &entry,
                    &extractor,
                    &preprocessor,
                    &probe_feature,
                ))
            }
        });

        let mut finished = 0usize;
        let outcomes = self
            .executor
            .run_all_observed(jobs, cancel, |_, _| {
                finished += 1;
                on_progress(finished, total);
            })
            .await?;

        let mut ranked = Vec::with_capacity(total);
        let mut skipped = Vec::new();
        for (index, outcome) in outcomes.into_iter().enumerate() {
            let entry = &snapshot.entries()[index];
            let result = match outcome {
                TaskOutcome::Completed(result) => result,
                TaskOutcome::Empty => Err(SkipReason::NoFeatures),
                TaskOutcome::TimedOut => Err(SkipReason::TimedOut),
                TaskOutcome::Failed(reason) => Err(SkipReason::Failed(reason)),
            };
            match result {
                Ok(score) => ranked.push(RankedMatch {
                    index,
                    label: entry.label.clone(),
                    identity_id: entry.identity_id.clone(),
                    score,
                }),
                Err(reason) => {
                    log::debug!("skipping corpus entry '{}': {:?}", entry.label, reason);
                    skipped.push(SkippedEntry {
                        index,
                        label: entry.label.clone(),
                        reason,
                    });
                }
            }
        }

        // sort_by is stable, so equal scores keep corpus order
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        let report = IdentificationReport {
            algorithm,
            corpus_version: snapshot.version(),
            corpus_size: total,
            best: ranked.first().cloned(),
            ranked,
            skipped,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        log::info!(
            "scan {} over {} entries: {} ranked, {} skipped in {}ms",
            algorithm,
            total,
            report.ranked.len(),
            report.skipped.len(),
            report.elapsed_ms
        );
        Ok(report)
    }
}

fn score_entry(
    entry: &CorpusEntry,
    extractor: &Extractor,
    preprocessor: &Preprocessor,
    probe_feature: &Embedding,
) -> Result<f32, SkipReason> {
    let algorithm = extractor.algorithm();
    let reference = match &entry.source {
        CorpusSource::Template(template) => {
            if template.algorithm() != algorithm {
                return Err(SkipReason::AlgorithmMismatch);
            }
            template.embedding().clone()
        }
        CorpusSource::Image(bytes) => {
            let normalized = preprocessor
                .normalize(bytes, algorithm.modality())
                .map_err(|_| SkipReason::Undecodable)?;
            extractor.extract(&normalized).ok_or(SkipReason::NoFeatures)?
        }
    };

    match extractor.score(probe_feature, &reference) {
        Ok(Some(score)) => Ok(score),
        Ok(None) => Err(SkipReason::NoFeatures),
        Err(e) => Err(SkipReason::Failed(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::Modality;
    use crate::executor::ExecutorConfig;
    use crate::fixtures;

    fn scanner() -> IdentificationScanner {
        IdentificationScanner::new(
            Arc::new(ExtractorRegistry::standard()),
            Preprocessor::default(),
            BoundedExecutor::new(ExecutorConfig::default()),
        )
    }

    fn corpus_of_ten() -> ReferenceCorpus {
        let mut entries = Vec::new();
        for i in 0..8u32 {
            let img = if i % 2 == 0 {
                fixtures::ridge_pattern(160, 0.5 + i as f32)
            } else {
                fixtures::noise(160, i as u64)
            };
            entries.push(CorpusEntry::image(format!("ref-{i}"), fixtures::encode_png(&img)));
        }
        entries.insert(3, CorpusEntry::image("broken-a", b"not an image".to_vec()));
        entries.push(CorpusEntry::image("broken-b", vec![0u8; 16]));
        ReferenceCorpus::from_entries(entries)
    }

    #[tokio::test]
    async fn test_undecodable_entries_are_skipped() {
        let corpus = corpus_of_ten();
        assert_eq!(corpus.len(), 10);

        let probe = Probe::new(
            Modality::Fingerprint,
            fixtures::encode_png(&fixtures::ridge_pattern(160, 2.5)),
        );
        let report = scanner()
            .scan(&probe, Algorithm::Hog, &corpus, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(report.ranked.len(), 8);
        assert_eq!(report.skipped.len(), 2);
        assert!(report
            .skipped
            .iter()
            .all(|s| s.reason == SkipReason::Undecodable));

        let best = report.best.clone().unwrap();
        assert_eq!(best.label, "ref-2");
        assert!((best.score - 1.0).abs() < 1e-4);
        assert!(report.ranked.iter().all(|m| m.score <= best.score));
        assert!(report.ranked.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_ties_keep_corpus_order() {
        let same = fixtures::encode_png(&fixtures::ridge_pattern(128, 1.0));
        let corpus = ReferenceCorpus::from_entries(
            ["first", "second", "third"]
                .into_iter()
                .map(|label| CorpusEntry::image(label, same.clone())),
        );
        let probe = Probe::new(Modality::Fingerprint, same.clone());
        let report = scanner()
            .scan(&probe, Algorithm::Lbp, &corpus, &CancelToken::new())
            .await
            .unwrap();
        let labels: Vec<&str> = report.ranked.iter().map(|m| m.label.as_str()).collect();
        assert_eq!(labels, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_probe_modality_must_match() {
        let corpus = ReferenceCorpus::new();
        let probe = Probe::new(
            Modality::Face,
            fixtures::encode_png(&fixtures::ridge_pattern(64, 1.0)),
        );
        let err = scanner()
            .scan(&probe, Algorithm::Gabor, &corpus, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ModalityMismatch { .. }));
    }

    #[tokio::test]
    async fn test_uniform_probe_has_no_features() {
        let corpus = corpus_of_ten();
        let probe = Probe::new(
            Modality::Fingerprint,
            fixtures::encode_png(&fixtures::flat(64, 128)),
        );
        let err = scanner()
            .scan(&probe, Algorithm::Minutiae, &corpus, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NoProbeFeatures(Algorithm::Minutiae)));
    }

    #[tokio::test]
    async fn test_template_entries_and_mismatch() {
        let img = fixtures::ridge_pattern(128, 1.5);
        let pre = Preprocessor::default();
        let normalized = pre
            .normalize(&fixtures::encode_png(&img), Modality::Fingerprint)
            .unwrap();
        let registry = ExtractorRegistry::standard();
        let lbp = registry.get(Algorithm::Lbp).unwrap().extract(&normalized).unwrap();
        let gabor = registry.get(Algorithm::Gabor).unwrap().extract(&normalized).unwrap();

        let corpus = ReferenceCorpus::from_entries([
            CorpusEntry::template("alice-lbp", "alice", Template::new(Algorithm::Lbp, lbp, 0.9).unwrap()),
            CorpusEntry::template("alice-gabor", "alice", Template::new(Algorithm::Gabor, gabor, 0.9).unwrap()),
        ]);
        let probe = Probe::new(Modality::Fingerprint, fixtures::encode_png(&img));
        let report = scanner()
            .scan(&probe, Algorithm::Lbp, &corpus, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(report.ranked.len(), 1);
        assert_eq!(report.best.unwrap().identity_id.as_deref(), Some("alice"));
        assert_eq!(report.skipped[0].reason, SkipReason::AlgorithmMismatch);
    }

    #[test]
    fn test_snapshot_is_stable_across_writes() {
        let corpus = ReferenceCorpus::new();
        corpus.insert(CorpusEntry::image("a", vec![1u8]));
        let before = corpus.snapshot();
        let version = corpus.insert(CorpusEntry::image("b", vec![2u8]));

        assert_eq!(before.len(), 1);
        assert_eq!(before.version(), 1);
        assert_eq!(version, 2);
        assert_eq!(corpus.snapshot().len(), 2);
    }
}
