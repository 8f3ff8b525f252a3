use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing upload and question activity.
#[derive(Default)]
pub struct ServiceMetrics {
    documents_uploaded: AtomicU64,
    bytes_uploaded: AtomicU64,
    uploads_rejected: AtomicU64,
    questions_answered: AtomicU64,
    fallback_answers: AtomicU64,
    requests_rate_limited: AtomicU64,
}

impl ServiceMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stored document and its raw size.
    pub fn record_upload(&self, byte_size: u64) {
        self.documents_uploaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(byte_size, Ordering::Relaxed);
    }

    /// Record an upload refused before storage (type, size, encryption, parse failure).
    pub fn record_rejected_upload(&self) {
        self.uploads_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an answered question; `fallback` marks answers not produced by the model.
    pub fn record_answer(&self, fallback: bool) {
        self.questions_answered.fetch_add(1, Ordering::Relaxed);
        if fallback {
            self.fallback_answers.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a request denied by admission control.
    pub fn record_rate_limited(&self) {
        self.requests_rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_uploaded: self.documents_uploaded.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            uploads_rejected: self.uploads_rejected.load(Ordering::Relaxed),
            questions_answered: self.questions_answered.load(Ordering::Relaxed),
            fallback_answers: self.fallback_answers.load(Ordering::Relaxed),
            requests_rate_limited: self.requests_rate_limited.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of service counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents stored since startup.
    pub documents_uploaded: u64,
    /// Raw bytes stored since startup.
    pub bytes_uploaded: u64,
    /// Uploads refused before storage.
    pub uploads_rejected: u64,
    /// Questions answered, fallbacks included.
    pub questions_answered: u64,
    /// Answers that came from a fallback rather than the model.
    pub fallback_answers: u64,
    /// Requests denied by admission control.
    pub requests_rate_limited: u64,
}
