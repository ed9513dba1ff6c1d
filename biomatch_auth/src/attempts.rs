//! Licznik prób - okno porażek i blokada per tożsamość+modalność
//!
//! UNLOCKED -> LOCKED, gdy liczba porażek w kroczącym oknie blokady
//! osiągnie `max_attempts`. LOCKED -> UNLOCKED automatycznie po upływie
//! czasu blokady od porażki, która ją wyzwoliła. Liczenie, porównanie
//! i blokada odbywają się pod jednym muteksem na klucz.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use biomatch_core::Modality;

use crate::clock::{Clock, SystemClock};
use crate::policy::LevelPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

/// Wpis próby, tylko do dopisywania
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub identity_id: String,
    pub modality: Modality,
    pub timestamp: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}

/// Persistence side of attempt accounting
pub trait AttemptLog: Send + Sync {
    fn append_attempt(&self, record: AttemptRecord);

    /// Failures at or after `window_start` and after the latest success
    fn recent_failures(&self, identity_id: &str, modality: Modality, window_start: DateTime<Utc>)
        -> u32;
}

/// In-memory attempt log with age-based pruning
pub struct MemoryAttemptLog {
    records: RwLock<Vec<AttemptRecord>>,
    retention: Duration,
}

impl MemoryAttemptLog {
    pub fn new(retention: Duration) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            retention,
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryAttemptLog {
    /// Retains one day, longer than any built-in lockout window
    fn default() -> Self {
        Self::new(Duration::hours(24))
    }
}

impl AttemptLog for MemoryAttemptLog {
    fn append_attempt(&self, record: AttemptRecord) {
        let mut records = self.records.write();
        let cutoff = record.timestamp - self.retention;
        records.retain(|r| r.timestamp >= cutoff);
        records.push(record);
    }

    fn recent_failures(
        &self,
        identity_id: &str,
        modality: Modality,
        window_start: DateTime<Utc>,
    ) -> u32 {
        let records = self.records.read();
        let mut count = 0u32;
        for r in records
            .iter()
            .filter(|r| r.identity_id == identity_id && r.modality == modality)
        {
            match r.outcome {
                AttemptOutcome::Success => count = 0,
                AttemptOutcome::Failure if r.timestamp >= window_start => count += 1,
                AttemptOutcome::Failure => {}
            }
        }
        count
    }
}

/// Stan blokady jednej pary tożsamość+modalność
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Unlocked { recent_failures: u32 },
    Locked { until: DateTime<Utc> },
}

impl LockStatus {
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }

    /// Pełne sekundy do zdjęcia blokady (w górę)
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> Option<u64> {
        match self {
            Self::Locked { until } => {
                let ms = (*until - now).num_milliseconds().max(0) as u64;
                Some(ms.div_ceil(1000))
            }
            Self::Unlocked { .. } => None,
        }
    }
}

/// Result of recording one failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub status: LockStatus,
    /// This failure is the one that engaged the lock
    pub lock_triggered: bool,
}

#[derive(Debug, Default)]
struct AttemptWindow {
    failures: VecDeque<DateTime<Utc>>,
    locked_at: Option<DateTime<Utc>>,
}

impl AttemptWindow {
    /// Apply expiry and pruning as of `now`
    fn refresh(&mut self, now: DateTime<Utc>, limits: &LevelPolicy) {
        let duration = limits.lockout_duration();
        if let Some(locked_at) = self.locked_at {
            if now - locked_at >= duration {
                self.locked_at = None;
                self.failures.clear();
                tracing::info!("lockout expired");
            }
        }
        let window_start = now - duration;
        while self.failures.front().is_some_and(|t| *t < window_start) {
            self.failures.pop_front();
        }
    }

    fn status(&self, limits: &LevelPolicy) -> LockStatus {
        match self.locked_at {
            Some(locked_at) => LockStatus::Locked {
                until: locked_at + limits.lockout_duration(),
            },
            None => LockStatus::Unlocked {
                recent_failures: self.failures.len() as u32,
            },
        }
    }
}

type WindowKey = (String, Modality);

/// Shared failure accounting for all concurrent requests
pub struct AttemptTracker {
    clock: Arc<dyn Clock>,
    log: Arc<dyn AttemptLog>,
    windows: RwLock<HashMap<WindowKey, Arc<Mutex<AttemptWindow>>>>,
}

impl Default for AttemptTracker {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), Arc::new(MemoryAttemptLog::default()))
    }
}

impl AttemptTracker {
    pub fn new(clock: Arc<dyn Clock>, log: Arc<dyn AttemptLog>) -> Self {
        Self {
            clock,
            log,
            windows: RwLock::new(HashMap::new()),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Per-key window, hydrated from the log on first use
    fn window(
        &self,
        identity_id: &str,
        modality: Modality,
        limits: &LevelPolicy,
    ) -> Arc<Mutex<AttemptWindow>> {
        let key = (identity_id.to_string(), modality);
        if let Some(window) = self.windows.read().get(&key) {
            return window.clone();
        }

        let mut windows = self.windows.write();
        windows
            .entry(key)
            .or_insert_with(|| {
                let now = self.clock.now();
                let count =
                    self.log
                        .recent_failures(identity_id, modality, now - limits.lockout_duration());
                // Exact timestamps are not known here; stamping at `now`
                // keeps hydrated failures alive for a full window.
                let mut window = AttemptWindow {
                    failures: std::iter::repeat(now).take(count as usize).collect(),
                    locked_at: None,
                };
                if count >= limits.max_attempts {
                    window.locked_at = Some(now);
                }
                if count > 0 {
                    tracing::debug!(identity = identity_id, %modality, count, "hydrated failure window");
                }
                Arc::new(Mutex::new(window))
            })
            .clone()
    }

    pub fn status(&self, identity_id: &str, modality: Modality, limits: &LevelPolicy) -> LockStatus {
        let window = self.window(identity_id, modality, limits);
        let mut guard = window.lock();
        guard.refresh(self.clock.now(), limits);
        guard.status(limits)
    }

    /// Liczy jedną porażkę i atomowo stosuje przejście blokady
    pub fn record_failure(
        &self,
        identity_id: &str,
        modality: Modality,
        limits: &LevelPolicy,
    ) -> FailureOutcome {
        let window = self.window(identity_id, modality, limits);
        let mut guard = window.lock();
        let now = self.clock.now();
        guard.refresh(now, limits);

        let already_locked = guard.locked_at.is_some();
        if !already_locked {
            guard.failures.push_back(now);
        }
        self.log.append_attempt(AttemptRecord {
            identity_id: identity_id.to_string(),
            modality,
            timestamp: now,
            outcome: AttemptOutcome::Failure,
        });

        let lock_triggered =
            !already_locked && guard.failures.len() as u32 >= limits.max_attempts;
        if lock_triggered {
            guard.locked_at = Some(now);
            tracing::warn!(
                identity = identity_id,
                %modality,
                failures = guard.failures.len(),
                lockout_seconds = limits.lockout_seconds,
                "LOCKOUT: max attempts reached"
            );
        }

        FailureOutcome {
            status: guard.status(limits),
            lock_triggered,
        }
    }

    /// Zeruje licznik porażek; ignorowane podczas blokady
    pub fn record_success(&self, identity_id: &str, modality: Modality, limits: &LevelPolicy) -> bool {
        let window = self.window(identity_id, modality, limits);
        let mut guard = window.lock();
        let now = self.clock.now();
        guard.refresh(now, limits);
        if guard.locked_at.is_some() {
            tracing::warn!(identity = identity_id, %modality, "success ignored while locked");
            return false;
        }

        guard.failures.clear();
        self.log.append_attempt(AttemptRecord {
            identity_id: identity_id.to_string(),
            modality,
            timestamp: now,
            outcome: AttemptOutcome::Success,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::policy::{SecurityLevel, SecurityPolicy};

    fn medium() -> LevelPolicy {
        SecurityPolicy::standard().level(SecurityLevel::Medium).clone()
    }

    fn tracker() -> (Arc<ManualClock>, Arc<MemoryAttemptLog>, AttemptTracker) {
        let clock = Arc::new(ManualClock::default());
        let log = Arc::new(MemoryAttemptLog::default());
        let tracker = AttemptTracker::new(clock.clone(), log.clone());
        (clock, log, tracker)
    }

    #[test]
    fn test_locks_at_max_attempts() {
        let (_, _, tracker) = tracker();
        let limits = medium();
        for i in 1..limits.max_attempts {
            let out = tracker.record_failure("alice", Modality::Face, &limits);
            assert!(!out.lock_triggered);
            assert_eq!(out.status, LockStatus::Unlocked { recent_failures: i });
        }
        let out = tracker.record_failure("alice", Modality::Face, &limits);
        assert!(out.lock_triggered);
        assert!(tracker.status("alice", Modality::Face, &limits).is_locked());

        // other modality is tracked separately
        assert!(!tracker.status("alice", Modality::Fingerprint, &limits).is_locked());
    }

    #[test]
    fn test_lock_expires_after_duration() {
        let (clock, _, tracker) = tracker();
        let limits = medium();
        for _ in 0..limits.max_attempts {
            tracker.record_failure("bob", Modality::Fingerprint, &limits);
        }
        let status = tracker.status("bob", Modality::Fingerprint, &limits);
        assert_eq!(status.retry_after_secs(clock.now()), Some(600));

        clock.advance(Duration::seconds(599));
        assert!(tracker.status("bob", Modality::Fingerprint, &limits).is_locked());

        clock.advance(Duration::seconds(1));
        assert_eq!(
            tracker.status("bob", Modality::Fingerprint, &limits),
            LockStatus::Unlocked { recent_failures: 0 }
        );
    }

    #[test]
    fn test_old_failures_leave_the_window() {
        let (clock, _, tracker) = tracker();
        let limits = medium();
        for _ in 0..4 {
            tracker.record_failure("carol", Modality::Face, &limits);
        }
        clock.advance(Duration::seconds(601));
        let out = tracker.record_failure("carol", Modality::Face, &limits);
        assert_eq!(out.status, LockStatus::Unlocked { recent_failures: 1 });
    }

    #[test]
    fn test_success_resets_only_when_unlocked() {
        let (_, _, tracker) = tracker();
        let limits = medium();
        tracker.record_failure("dave", Modality::Face, &limits);
        tracker.record_failure("dave", Modality::Face, &limits);
        assert!(tracker.record_success("dave", Modality::Face, &limits));
        assert_eq!(
            tracker.status("dave", Modality::Face, &limits),
            LockStatus::Unlocked { recent_failures: 0 }
        );

        for _ in 0..limits.max_attempts {
            tracker.record_failure("dave", Modality::Face, &limits);
        }
        assert!(!tracker.record_success("dave", Modality::Face, &limits));
        assert!(tracker.status("dave", Modality::Face, &limits).is_locked());
    }

    #[test]
    fn test_hydrates_from_log() {
        let (clock, log, tracker) = tracker();
        let limits = medium();
        for _ in 0..3 {
            tracker.record_failure("erin", Modality::Face, &limits);
        }
        assert_eq!(log.recent_failures("erin", Modality::Face, clock.now() - Duration::seconds(600)), 3);

        let restarted = AttemptTracker::new(clock.clone(), log.clone());
        assert_eq!(
            restarted.status("erin", Modality::Face, &limits),
            LockStatus::Unlocked { recent_failures: 3 }
        );
        restarted.record_failure("erin", Modality::Face, &limits);
        let out = restarted.record_failure("erin", Modality::Face, &limits);
        assert!(out.lock_triggered);
    }

    #[test]
    fn test_log_counts_since_last_success() {
        let log = MemoryAttemptLog::default();
        let now = Utc::now();
        let record = |outcome, secs| AttemptRecord {
            identity_id: "frank".into(),
            modality: Modality::Fingerprint,
            timestamp: now + Duration::seconds(secs),
            outcome,
        };
        log.append_attempt(record(AttemptOutcome::Failure, 0));
        log.append_attempt(record(AttemptOutcome::Success, 1));
        log.append_attempt(record(AttemptOutcome::Failure, 2));
        assert_eq!(log.recent_failures("frank", Modality::Fingerprint, now), 1);
        assert_eq!(log.recent_failures("frank", Modality::Face, now), 0);
    }

    #[test]
    fn test_concurrent_failures_trigger_one_lock() {
        let (_, _, tracker) = tracker();
        let tracker = Arc::new(tracker);
        let limits = medium();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tracker = tracker.clone();
                let limits = limits.clone();
                std::thread::spawn(move || {
                    tracker
                        .record_failure("grace", Modality::Face, &limits)
                        .lock_triggered
                })
            })
            .collect();
        let triggered = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|t| *t)
            .count();
        assert_eq!(triggered, 1);
    }
}
