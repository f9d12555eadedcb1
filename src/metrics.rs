use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    requests_completed: AtomicU64,
    requests_failed: AtomicU64,
    questions_answered: AtomicU64,
    chunks_indexed: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request that returned answers.
    pub fn record_success(&self, chunk_count: u64, question_count: u64) {
        self.requests_completed.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed.fetch_add(chunk_count, Ordering::Relaxed);
        self.questions_answered
            .fetch_add(question_count, Ordering::Relaxed);
    }

    /// Record a request that failed at any step.
    pub fn record_failure(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_completed: self.requests_completed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            questions_answered: self.questions_answered.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Requests that returned answers since startup.
    pub requests_completed: u64,
    /// Requests that failed since startup.
    pub requests_failed: u64,
    /// Answers returned across all completed requests.
    pub questions_answered: u64,
    /// Chunks indexed across all completed requests.
    pub chunks_indexed: u64,
}
