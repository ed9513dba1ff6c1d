//! Dziennik audytu - zdarzenia bezpieczeństwa poza ścieżką żądania
//!
//! `ChannelAuditSink` przekazuje zdarzenia do wątku roboczego przez
//! ograniczony kanał crossbeam. Pełny kanał odrzuca zdarzenie i je
//! zlicza; żądanie nigdy nie czeka na I/O audytu.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    AuthSuccess,
    AuthFailed,
    AuthRejectedQuality,
    AuthLockedOut,
    LockoutTriggered,
    UserEnrolled,
    DualAuthSuccess,
    DualAuthFailed,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthSuccess => "AUTH_SUCCESS",
            Self::AuthFailed => "AUTH_FAILED",
            Self::AuthRejectedQuality => "AUTH_REJECTED_QUALITY",
            Self::AuthLockedOut => "AUTH_LOCKED_OUT",
            Self::LockoutTriggered => "LOCKOUT_TRIGGERED",
            Self::UserEnrolled => "USER_ENROLLED",
            Self::DualAuthSuccess => "DUAL_AUTH_SUCCESS",
            Self::DualAuthFailed => "DUAL_AUTH_FAILED",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::AuthSuccess | Self::DualAuthSuccess | Self::UserEnrolled => Severity::Info,
            Self::AuthFailed | Self::DualAuthFailed | Self::AuthRejectedQuality => {
                Severity::Warning
            }
            Self::AuthLockedOut | Self::LockoutTriggered => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Jeden wpis audytu. Nigdy nie zawiera obrazów ani embeddingów.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub event_type: AuditEventType,
    pub identity_id: String,
    pub severity: Severity,
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, identity_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            identity_id: identity_id.into(),
            severity: event_type.severity(),
            metadata: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn log_event(&self, event: AuditEvent);
}

fn emit(event: &AuditEvent) {
    let metadata = Value::Object(event.metadata.clone());
    match event.severity {
        Severity::Info => tracing::info!(
            target: "biomatch::audit",
            event = event.event_type.as_str(),
            identity = %event.identity_id,
            id = %event.id,
            %metadata,
            "audit event"
        ),
        Severity::Warning => tracing::warn!(
            target: "biomatch::audit",
            event = event.event_type.as_str(),
            identity = %event.identity_id,
            id = %event.id,
            %metadata,
            "audit event"
        ),
        Severity::Critical => tracing::error!(
            target: "biomatch::audit",
            event = event.event_type.as_str(),
            identity = %event.identity_id,
            id = %event.id,
            %metadata,
            "audit event"
        ),
    }
}

/// Bounded, non-blocking audit sink backed by a worker thread
pub struct ChannelAuditSink {
    tx: Mutex<Option<Sender<AuditEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl ChannelAuditSink {
    pub fn new(capacity: usize) -> Self {
        Self::with_observer(capacity, |_| {})
    }

    /// Worker calls `observer` after emitting each event
    pub fn with_observer<F>(capacity: usize, observer: F) -> Self
    where
        F: Fn(&AuditEvent) + Send + 'static,
    {
        let (tx, rx) = bounded::<AuditEvent>(capacity.max(1));
        let worker = std::thread::Builder::new()
            .name("biomatch-audit".into())
            .spawn(move || {
                for event in rx {
                    emit(&event);
                    observer(&event);
                }
            });

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(error = %e, "audit worker failed to start");
                None
            }
        };
        Self {
            tx: Mutex::new(worker.as_ref().map(|_| tx)),
            worker: Mutex::new(worker),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Close the channel and wait for queued events to drain
    pub fn shutdown(&self) {
        self.tx.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!("audit worker panicked");
            }
        }
    }
}

impl AuditSink for ChannelAuditSink {
    fn log_event(&self, event: AuditEvent) {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(event = event.event_type.as_str(), "audit channel full, event dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl Drop for ChannelAuditSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Collects events in memory
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, event_type: AuditEventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn log_event(&self, event: AuditEvent) {
        emit(&event);
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_severity_by_type() {
        assert_eq!(AuditEventType::AuthSuccess.severity(), Severity::Info);
        assert_eq!(AuditEventType::AuthFailed.severity(), Severity::Warning);
        assert_eq!(AuditEventType::LockoutTriggered.severity(), Severity::Critical);
        assert_eq!(AuditEventType::DualAuthFailed.severity(), Severity::Warning);
        assert_eq!(AuditEventType::DualAuthSuccess.as_str(), "DUAL_AUTH_SUCCESS");
    }

    #[test]
    fn test_event_serializes_screaming_type() {
        let event = AuditEvent::new(AuditEventType::AuthRejectedQuality, "alice")
            .with("quality", 0.42)
            .with("modality", "face");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "AUTH_REJECTED_QUALITY");
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["metadata"]["modality"], "face");
    }

    #[test]
    fn test_channel_sink_delivers_all_before_shutdown() {
        let seen = Arc::new(AtomicU64::new(0));
        let counter = seen.clone();
        let sink = ChannelAuditSink::with_observer(64, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        for i in 0..10 {
            sink.log_event(AuditEvent::new(AuditEventType::AuthFailed, format!("user{i}")));
        }
        sink.shutdown();
        assert_eq!(seen.load(Ordering::SeqCst), 10);
        assert_eq!(sink.dropped(), 0);
    }

    #[test]
    fn test_events_after_shutdown_are_dropped() {
        let sink = ChannelAuditSink::new(4);
        sink.shutdown();
        sink.log_event(AuditEvent::new(AuditEventType::AuthSuccess, "alice"));
        assert_eq!(sink.dropped(), 1);
    }

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
        let sink = ChannelAuditSink::with_observer(1, move |_| {
            let _ = release_rx.recv();
        });
        for _ in 0..5 {
            sink.log_event(AuditEvent::new(AuditEventType::AuthFailed, "bob"));
        }
        assert!(sink.dropped() >= 3);
        drop(release_tx);
        sink.shutdown();
    }

    #[test]
    fn test_memory_sink_counts() {
        let sink = MemoryAuditSink::new();
        sink.log_event(AuditEvent::new(AuditEventType::AuthFailed, "carol"));
        sink.log_event(AuditEvent::new(AuditEventType::AuthFailed, "carol"));
        sink.log_event(AuditEvent::new(AuditEventType::LockoutTriggered, "carol"));
        assert_eq!(sink.count(AuditEventType::AuthFailed), 2);
        assert_eq!(sink.events().len(), 3);
    }
}
