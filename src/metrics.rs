use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the limiter counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub throttled_requests: u64,
    pub storage_failures: u64,
    pub corrupt_resets: u64,
    pub conflicts: u64,
    pub retries: u64,
}

/// Process-local operational counters.
///
/// Holds counts only. Bucket state is never kept here.
#[derive(Debug, Default)]
pub struct LimiterMetrics {
    allowed: AtomicU64,
    throttled: AtomicU64,
    storage_failures: AtomicU64,
    corrupt_resets: AtomicU64,
    conflicts: AtomicU64,
    retries: AtomicU64,
}

impl LimiterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_decision(&self, allowed: bool) {
        if allowed {
            self.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.throttled.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_storage_failure(&self) {
        self.storage_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_corrupt_reset(&self) {
        self.corrupt_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let allowed_requests = self.allowed.load(Ordering::Relaxed);
        let throttled_requests = self.throttled.load(Ordering::Relaxed);
        MetricsSnapshot {
            total_requests: allowed_requests + throttled_requests,
            allowed_requests,
            throttled_requests,
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
            corrupt_resets: self.corrupt_resets.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}
