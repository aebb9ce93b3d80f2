use std::sync::atomic::{AtomicU64, Ordering};

/// Relaxed monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    #[inline]
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Metrics registry for the engine.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Executions by outcome
    pub executions_started: Counter,
    pub executions_completed: Counter,
    pub executions_failed: Counter,

    /// Batches by outcome
    pub batches_completed: Counter,
    pub batches_failed: Counter,

    /// Scan volume
    pub records_scanned: Counter,
    pub malformed_records: Counter,
    pub violations_found: Counter,
}

impl EngineMetrics {
    pub fn new() -> Self {
        EngineMetrics::default()
    }

    /// Point-in-time copy for logging.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            executions_started: self.executions_started.get(),
            executions_completed: self.executions_completed.get(),
            executions_failed: self.executions_failed.get(),
            batches_completed: self.batches_completed.get(),
            batches_failed: self.batches_failed.get(),
            records_scanned: self.records_scanned.get(),
            malformed_records: self.malformed_records.get(),
            violations_found: self.violations_found.get(),
        }
    }
}

/// Plain values captured from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub executions_started: u64,
    pub executions_completed: u64,
    pub executions_failed: u64,
    pub batches_completed: u64,
    pub batches_failed: u64,
    pub records_scanned: u64,
    pub malformed_records: u64,
    pub violations_found: u64,
}
