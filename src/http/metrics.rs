//! Lightweight counters tracking HTTP attempts, failures, retries, and
//! latency so the client can expose aggregated snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct HttpMetrics {
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    total_retries: AtomicU64,
    total_latency_ns: AtomicU64,
}

impl HttpMetrics {
    pub(crate) fn record_success(&self, latency: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Transport failures and non-200 statuses alike.
    pub(crate) fn record_failure(&self, latency: Duration) {
        self.record_success(latency);
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.total_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> HttpMetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_errors = self.total_errors.load(Ordering::Relaxed);
        let total_latency_ns = self.total_latency_ns.load(Ordering::Relaxed);

        let average_latency_ms = if total_requests == 0 {
            0.0
        } else {
            (total_latency_ns as f64 / total_requests as f64) / 1_000_000.0
        };

        HttpMetricsSnapshot {
            total_requests,
            total_errors,
            total_retries: self.total_retries.load(Ordering::Relaxed),
            average_latency_ms,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct HttpMetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub total_retries: u64,
    pub average_latency_ms: f64,
}
