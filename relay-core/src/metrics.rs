use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counters for relay activity
#[derive(Debug, Default)]
pub struct Metrics {
    pub requests_captured: AtomicU64,
    pub responses_captured: AtomicU64,
    pub captures_skipped: AtomicU64,
    pub responses_modified: AtomicU64,
    pub requests_intercepted: AtomicU64,
    pub requests_auto_released: AtomicU64,
    pub requests_released: AtomicU64,
    pub upstream_failures: AtomicU64,
    pub persistence_failures: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub capture: CaptureMetrics,
    pub interception: InterceptionMetrics,
    pub persistence_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureMetrics {
    pub requests: u64,
    pub responses: u64,
    pub skipped: u64,
    pub modified: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InterceptionMetrics {
    pub held: u64,
    pub auto_released: u64,
    pub released: u64,
    pub upstream_failures: u64,
    pub upstream_failure_rate: f64,
}

impl Metrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let auto_released = self.requests_auto_released.load(Ordering::Relaxed);
        let released = self.requests_released.load(Ordering::Relaxed);
        let upstream_failures = self.upstream_failures.load(Ordering::Relaxed);
        let forwarded = auto_released + released;

        let upstream_failure_rate = if forwarded > 0 {
            (upstream_failures as f64 / forwarded as f64) * 100.0
        } else {
            0.0
        };

        MetricsSnapshot {
            capture: CaptureMetrics {
                requests: self.requests_captured.load(Ordering::Relaxed),
                responses: self.responses_captured.load(Ordering::Relaxed),
                skipped: self.captures_skipped.load(Ordering::Relaxed),
                modified: self.responses_modified.load(Ordering::Relaxed),
            },
            interception: InterceptionMetrics {
                held: self.requests_intercepted.load(Ordering::Relaxed),
                auto_released,
                released,
                upstream_failures,
                upstream_failure_rate,
            },
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_failure_rate() {
        let metrics = Metrics::default();
        Metrics::incr(&metrics.requests_auto_released);
        Metrics::incr(&metrics.requests_auto_released);
        Metrics::incr(&metrics.requests_released);
        Metrics::incr(&metrics.requests_released);
        Metrics::incr(&metrics.upstream_failures);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.interception.auto_released, 2);
        assert_eq!(snapshot.interception.released, 2);
        assert!((snapshot.interception.upstream_failure_rate - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = Metrics::default().snapshot();
        assert_eq!(snapshot.capture.requests, 0);
        assert_eq!(snapshot.interception.upstream_failure_rate, 0.0);
    }
}
