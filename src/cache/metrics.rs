//! Cache Metrics Collection
//!
//! Metrics are pushed through an injected [`MetricsSink`] as
//! `{operation, tier, outcome}` counts. Nothing here registers global state.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use prometheus::{IntCounterVec, Opts, Registry};

use super::entry::CacheLevel;

/// Receiver of per-call cache counts
pub trait MetricsSink: Send + Sync {
    /// Count one `operation` against `level` that ended with `outcome`
    fn record(&self, operation: &'static str, level: CacheLevel, outcome: &'static str);
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _operation: &'static str, _level: CacheLevel, _outcome: &'static str) {}
}

type MetricKey = (&'static str, CacheLevel, &'static str);

/// In-process metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    counters: DashMap<MetricKey, AtomicU64>,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Current count for one label combination
    pub fn count(&self, operation: &'static str, level: CacheLevel, outcome: &'static str) -> u64 {
        self.counters
            .get(&(operation, level, outcome))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Hits recorded for `get` on `level`
    pub fn hits(&self, level: CacheLevel) -> u64 {
        self.count("get", level, "hit")
    }

    /// Misses (including expirations) recorded for `get` on `level`
    pub fn misses(&self, level: CacheLevel) -> u64 {
        self.count("get", level, "miss") + self.count("get", level, "expired")
    }

    pub fn hit_ratio(&self, level: CacheLevel) -> f64 {
        let hits = self.hits(level) as f64;
        let total = hits + self.misses(level) as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Get snapshot of all counters, sorted by label
    pub fn snapshot(&self) -> Vec<MetricSample> {
        let mut samples: Vec<MetricSample> = self
            .counters
            .iter()
            .map(|entry| {
                let (operation, level, outcome) = *entry.key();
                MetricSample {
                    operation,
                    level,
                    outcome,
                    value: entry.value().load(Ordering::Relaxed),
                }
            })
            .collect();
        samples.sort_by_key(|s| (s.operation, s.level.as_str(), s.outcome));
        samples
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.counters.clear();
    }
}

impl MetricsSink for CacheMetrics {
    fn record(&self, operation: &'static str, level: CacheLevel, outcome: &'static str) {
        self.counters
            .entry((operation, level, outcome))
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// One counter value from a [`CacheMetrics`] snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub operation: &'static str,
    pub level: CacheLevel,
    pub outcome: &'static str,
    pub value: u64,
}

/// Prometheus-backed sink registered into a caller-owned registry
#[derive(Clone)]
pub struct PrometheusMetrics {
    operations: IntCounterVec,
}

impl PrometheusMetrics {
    /// Register `tiercache_operations_total` in `registry`
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let operations = IntCounterVec::new(
            Opts::new(
                "tiercache_operations_total",
                "Cache operations by tier and outcome",
            ),
            &["operation", "tier", "outcome"],
        )?;
        registry.register(Box::new(operations.clone()))?;
        Ok(Self { operations })
    }

    pub fn value(&self, operation: &str, level: CacheLevel, outcome: &str) -> u64 {
        self.operations
            .with_label_values(&[operation, level.as_str(), outcome])
            .get()
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record(&self, operation: &'static str, level: CacheLevel, outcome: &'static str) {
        self.operations
            .with_label_values(&[operation, level.as_str(), outcome])
            .inc();
    }
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics").finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
