use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Reconciliation counters shared by every machine in the process
#[derive(Debug, Default)]
pub struct ReconcileMetrics {
    pub ticks: AtomicU64,
    pub transitions: AtomicU64,
    pub incomplete_ticks: AtomicU64,
    pub action_errors: AtomicU64,
    pub completion_check_errors: AtomicU64,
    pub persistence_errors: AtomicU64,
}

impl ReconcileMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transition(&self) {
        self.transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_incomplete(&self) {
        self.incomplete_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_action_error(&self) {
        self.action_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion_check_error(&self) {
        self.completion_check_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistence_error(&self) {
        self.persistence_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> ReconcileStats {
        ReconcileStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            incomplete_ticks: self.incomplete_ticks.load(Ordering::Relaxed),
            action_errors: self.action_errors.load(Ordering::Relaxed),
            completion_check_errors: self.completion_check_errors.load(Ordering::Relaxed),
            persistence_errors: self.persistence_errors.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Reconcile metrics: ticks={}, transitions={}, incomplete={}, action_errors={}, check_errors={}, persistence_errors={}",
            stats.ticks,
            stats.transitions,
            stats.incomplete_ticks,
            stats.action_errors,
            stats.completion_check_errors,
            stats.persistence_errors
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileStats {
    pub ticks: u64,
    pub transitions: u64,
    pub incomplete_ticks: u64,
    pub action_errors: u64,
    pub completion_check_errors: u64,
    pub persistence_errors: u64,
}

/// Global metrics instance
static RECONCILE_METRICS: std::sync::LazyLock<ReconcileMetrics> =
    std::sync::LazyLock::new(ReconcileMetrics::new);

pub fn reconcile_metrics() -> &'static ReconcileMetrics {
    &RECONCILE_METRICS
}

/// Time an operation and log its duration when finished
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        info!(
            operation = %self.operation,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
    }
}
