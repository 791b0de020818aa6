//! Per-request metrics collection
//!
//! Lightweight in-memory counters keyed by logical request id (the
//! caller-supplied key grouping related completion requests, typically one
//! per file). Counters drive two behaviors besides observability: the
//! consecutive-failure streak escalates debounce delays, and aggregate
//! hit/success/latency statistics feed `GetStatistics`.
//!
//! ## Design
//!
//! - Atomic counters for high-frequency updates
//! - DashMap for low-contention per-key storage
//! - Entries idle past the retention window are swept periodically

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

/// Counters for one logical request id.
#[derive(Debug)]
struct KeyMetrics {
    total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    cache_hits: AtomicU64,
    /// Consecutive failures; any success resets it.
    failure_streak: AtomicU32,
    /// Cumulative latency of successful calls, microseconds.
    latency_total_micros: AtomicU64,
    latency_samples: AtomicU64,
    last_activity: Mutex<Instant>,
}

impl KeyMetrics {
    fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            failure_streak: AtomicU32::new(0),
            latency_total_micros: AtomicU64::new(0),
            latency_samples: AtomicU64::new(0),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }
}

/// Aggregate statistics snapshot across all logical ids.
#[derive(Debug, Clone, Default)]
pub struct EngineStatistics {
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub cache_hits: u64,
    /// Cache hits / total requests, in `[0, 1]`.
    pub hit_rate: f64,
    /// Successes / (successes + failures), in `[0, 1]`.
    pub success_rate: f64,
    pub average_latency: Duration,
}

/// Request metrics registry, instance-owned by the engine.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    keys: DashMap<String, KeyMetrics>,
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self {
            keys: DashMap::new(),
        }
    }

    fn with_key<R>(&self, id: &str, f: impl FnOnce(&KeyMetrics) -> R) -> R {
        let entry = self
            .keys
            .entry(id.to_string())
            .or_insert_with(KeyMetrics::new);
        entry.touch();
        f(entry.value())
    }

    pub fn record_cache_hit(&self, id: &str) {
        self.with_key(id, |m| {
            m.total.fetch_add(1, Ordering::Relaxed);
            m.cache_hits.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn record_success(&self, id: &str, latency: Duration) {
        self.with_key(id, |m| {
            m.total.fetch_add(1, Ordering::Relaxed);
            m.successes.fetch_add(1, Ordering::Relaxed);
            m.failure_streak.store(0, Ordering::Relaxed);
            m.latency_total_micros
                .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
            m.latency_samples.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub fn record_failure(&self, id: &str) {
        self.with_key(id, |m| {
            m.total.fetch_add(1, Ordering::Relaxed);
            m.failures.fetch_add(1, Ordering::Relaxed);
            m.failure_streak.fetch_add(1, Ordering::Relaxed);
        });
    }

    /// Current consecutive-failure streak for a logical id.
    pub fn failure_streak(&self, id: &str) -> u32 {
        self.keys
            .get(id)
            .map(|m| m.failure_streak.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Drop per-key entries idle longer than `retention`. Returns the
    /// number of swept keys.
    pub fn sweep_stale(&self, retention: Duration) -> usize {
        let now = Instant::now();
        let before = self.keys.len();
        self.keys
            .retain(|_, m| now.duration_since(*m.last_activity.lock()) <= retention);
        before - self.keys.len()
    }

    /// Aggregate snapshot across all keys.
    pub fn statistics(&self) -> EngineStatistics {
        let mut stats = EngineStatistics::default();
        let mut latency_micros = 0u64;
        let mut latency_samples = 0u64;

        for entry in self.keys.iter() {
            let m = entry.value();
            stats.total_requests += m.total.load(Ordering::Relaxed);
            stats.successes += m.successes.load(Ordering::Relaxed);
            stats.failures += m.failures.load(Ordering::Relaxed);
            stats.cache_hits += m.cache_hits.load(Ordering::Relaxed);
            latency_micros += m.latency_total_micros.load(Ordering::Relaxed);
            latency_samples += m.latency_samples.load(Ordering::Relaxed);
        }

        if stats.total_requests > 0 {
            stats.hit_rate = stats.cache_hits as f64 / stats.total_requests as f64;
        }
        let attempts = stats.successes + stats.failures;
        if attempts > 0 {
            stats.success_rate = stats.successes as f64 / attempts as f64;
        }
        if latency_samples > 0 {
            stats.average_latency = Duration::from_micros(latency_micros / latency_samples);
        }
        stats
    }

    pub fn tracked_keys(&self) -> usize {
        self.keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_resets_failure_streak() {
        let metrics = RequestMetrics::new();
        metrics.record_failure("file.cs");
        metrics.record_failure("file.cs");
        metrics.record_failure("file.cs");
        assert_eq!(metrics.failure_streak("file.cs"), 3);

        metrics.record_success("file.cs", Duration::from_millis(40));
        assert_eq!(metrics.failure_streak("file.cs"), 0);
    }

    #[test]
    fn streaks_are_per_key() {
        let metrics = RequestMetrics::new();
        metrics.record_failure("a");
        metrics.record_failure("a");
        metrics.record_failure("b");
        assert_eq!(metrics.failure_streak("a"), 2);
        assert_eq!(metrics.failure_streak("b"), 1);
        assert_eq!(metrics.failure_streak("missing"), 0);
    }

    #[test]
    fn aggregate_statistics() {
        let metrics = RequestMetrics::new();
        metrics.record_cache_hit("a");
        metrics.record_success("a", Duration::from_millis(100));
        metrics.record_success("b", Duration::from_millis(300));
        metrics.record_failure("b");

        let stats = metrics.statistics();
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.cache_hits, 1);
        assert!((stats.hit_rate - 0.25).abs() < f64::EPSILON);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(stats.average_latency, Duration::from_millis(200));
    }

    #[test]
    fn sweep_drops_idle_keys_only() {
        let metrics = RequestMetrics::new();
        metrics.record_success("old", Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(30));
        metrics.record_success("fresh", Duration::from_millis(10));

        let swept = metrics.sweep_stale(Duration::from_millis(20));
        assert_eq!(swept, 1);
        assert_eq!(metrics.tracked_keys(), 1);
        assert_eq!(metrics.failure_streak("fresh"), 0);
    }
}
