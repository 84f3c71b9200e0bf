use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{info, warn};

/// Step engine and store usage counters
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub transitions_accepted: AtomicU64,
    pub transitions_rejected: AtomicU64,
    pub store_requests: AtomicU64,
    pub store_errors: AtomicU64,
    pub concurrent_modifications: AtomicU64,
    pub history_failures: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        self.transitions_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.transitions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_request(&self) {
        self.store_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_concurrent_modification(&self) {
        self.concurrent_modifications.fetch_add(1, Ordering::Relaxed);
        warn!("Step write lost an optimistic concurrency check");
    }

    pub fn record_history_failure(&self) {
        self.history_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> EngineStats {
        EngineStats {
            transitions_accepted: self.transitions_accepted.load(Ordering::Relaxed),
            transitions_rejected: self.transitions_rejected.load(Ordering::Relaxed),
            store_requests: self.store_requests.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            concurrent_modifications: self.concurrent_modifications.load(Ordering::Relaxed),
            history_failures: self.history_failures.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Engine metrics: accepted={}, rejected={}, store_requests={}, store_errors={}, conflicts={}, history_failures={}, cache_hits={}, cache_misses={}",
            stats.transitions_accepted,
            stats.transitions_rejected,
            stats.store_requests,
            stats.store_errors,
            stats.concurrent_modifications,
            stats.history_failures,
            stats.cache_hits,
            stats.cache_misses
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub transitions_accepted: u64,
    pub transitions_rejected: u64,
    pub store_requests: u64,
    pub store_errors: u64,
    pub concurrent_modifications: u64,
    pub history_failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Time an operation and log its duration
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
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}
