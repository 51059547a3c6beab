//! Cache metrics collector: counters, latency samples, and alert thresholds
//! from §4.5.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// An operation slower than this counts toward the slow-op rate.
const SLOW_OP_THRESHOLD_MS: u128 = 100;

/// Bound on retained latency samples; oldest are dropped first.
const MAX_LATENCY_SAMPLES: usize = 1000;

#[derive(Debug)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    slow_ops: AtomicU64,
    latency_samples_ms: Mutex<Vec<u64>>,
    started_at: Instant,
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            slow_ops: AtomicU64::new(0),
            latency_samples_ms: Mutex::new(Vec::new()),
            started_at: Instant::now(),
        }
    }
}

impl CacheMetrics {
    pub fn record_hit(&self, latency: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    pub fn record_miss(&self, latency: Duration) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    pub fn record_error(&self, latency: Duration) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    fn record_latency(&self, latency: Duration) {
        if latency.as_millis() > SLOW_OP_THRESHOLD_MS {
            self.slow_ops.fetch_add(1, Ordering::Relaxed);
        }
        let mut samples = self.latency_samples_ms.lock().unwrap();
        samples.push(latency.as_millis() as u64);
        if samples.len() > MAX_LATENCY_SAMPLES {
            let excess = samples.len() - MAX_LATENCY_SAMPLES;
            samples.drain(0..excess);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot_with_entry_count(0)
    }

    /// Same as [`CacheMetrics::snapshot`], but lets the owning cache report
    /// its live entry count so the snapshot can approximate memory use
    /// (§4.5: "hit ratio, average latency, ops/sec, memory used").
    pub fn snapshot_with_entry_count(&self, entry_count: usize) -> MetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let slow_ops = self.slow_ops.load(Ordering::Relaxed);
        let total_ops = hits + misses + errors;

        let samples = self.latency_samples_ms.lock().unwrap();
        let avg_latency_ms = if samples.is_empty() {
            0.0
        } else {
            samples.iter().sum::<u64>() as f64 / samples.len() as f64
        };

        let elapsed_secs = self.started_at.elapsed().as_secs_f64();
        let ops_per_sec = if elapsed_secs > 0.0 { total_ops as f64 / elapsed_secs } else { 0.0 };

        MetricsSnapshot {
            hits,
            misses,
            errors,
            total_ops,
            hit_ratio: if total_ops == 0 {
                1.0
            } else {
                hits as f64 / total_ops as f64
            },
            error_rate: if total_ops == 0 {
                0.0
            } else {
                errors as f64 / total_ops as f64
            },
            avg_latency_ms,
            slow_ops,
            slow_rate: if total_ops == 0 {
                0.0
            } else {
                slow_ops as f64 / total_ops as f64
            },
            ops_per_sec,
            // Approximate: live entry count, not a byte size — the cache
            // stores heterogeneous domain types, so a true byte accounting
            // would need a `size_of_val` per entry that buys little here.
            entry_count,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub total_ops: u64,
    pub hit_ratio: f64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub slow_ops: u64,
    pub slow_rate: f64,
    pub ops_per_sec: f64,
    pub entry_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,
}

impl MetricsSnapshot {
    /// Derives alerts against the fixed thresholds in §4.5. Each threshold
    /// only fires once the relevant op-count floor is met, so a handful of
    /// early misses on a cold cache doesn't page anyone.
    pub fn alerts(&self) -> Vec<Alert> {
        let mut alerts = Vec::new();

        if self.total_ops >= 100 && self.hit_ratio < 0.7 {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                message: format!("cache hit ratio {:.2} below 0.7 over {} ops", self.hit_ratio, self.total_ops),
            });
        }

        if self.total_ops >= 50 && self.error_rate > 0.05 {
            alerts.push(Alert {
                level: AlertLevel::Critical,
                message: format!("cache error rate {:.2} above 0.05 over {} ops", self.error_rate, self.total_ops),
            });
        }

        if self.avg_latency_ms > 50.0 {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                message: format!("cache average latency {:.1}ms above 50ms", self.avg_latency_ms),
            });
        }

        if self.total_ops >= 50 && self.slow_rate > 0.1 {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                message: format!("cache slow-op rate {:.2} above 0.1 over {} ops", self.slow_rate, self.total_ops),
            });
        }

        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_ratio_below_threshold_with_enough_ops_raises_warning() {
        let metrics = CacheMetrics::default();
        for _ in 0..30 {
            metrics.record_hit(Duration::from_millis(1));
        }
        for _ in 0..70 {
            metrics.record_miss(Duration::from_millis(1));
        }
        let snapshot = metrics.snapshot();
        assert!(snapshot.hit_ratio < 0.7);
        let alerts = snapshot.alerts();
        assert!(alerts.iter().any(|a| a.level == AlertLevel::Warning));
    }

    #[test]
    fn low_op_count_suppresses_hit_ratio_alert() {
        let metrics = CacheMetrics::default();
        metrics.record_miss(Duration::from_millis(1));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.hit_ratio, 0.0);
        assert!(snapshot.alerts().is_empty());
    }

    #[test]
    fn error_rate_above_threshold_raises_critical() {
        let metrics = CacheMetrics::default();
        for _ in 0..46 {
            metrics.record_hit(Duration::from_millis(1));
        }
        for _ in 0..4 {
            metrics.record_error(Duration::from_millis(1));
        }
        let alerts = metrics.snapshot().alerts();
        assert!(alerts.iter().any(|a| a.level == AlertLevel::Critical));
    }

    #[test]
    fn slow_ops_counted_past_100ms() {
        let metrics = CacheMetrics::default();
        metrics.record_hit(Duration::from_millis(150));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.slow_ops, 1);
    }
}
