//! L1 Cache - Sharded In-Memory Tier
//!
//! TTL- and capacity-bounded key/value store partitioned over independently
//! locked shards.
//!
//! # Design
//!
//! - Keys route to a shard by FNV-1a 64 modulo the shard count
//! - `active` counts stored entries; a new key reserves a slot with a
//!   compare-and-swap under its shard's write lock, so admission never exceeds
//!   `max_entries`
//! - Expired entries are purged on read, by the background janitor, and by the
//!   synchronous sweep a full cache runs before rejecting a write
//! - Sweeps list expired keys under a read lock and then remove them one at a
//!   time, re-checking expiry under the write lock

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::entry::{expiry_after, CacheEntry, CacheLevel, LookupOutcome};
use super::janitor;
use super::memory::MemoryProbe;
use super::metrics::{MetricsSink, NoopMetrics};
use super::shard::{shard_index, InsertOutcome, Shard};
use crate::config::ShardedCacheConfig;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct L1Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    evicted: AtomicU64,
    sweeps: AtomicU64,
    capacity_rejections: AtomicU64,
}

struct JanitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl JanitorHandle {
    /// A stopped janitor counts as gone even while its task is winding down
    fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }
}

/// Sharded, TTL-bounded L1 cache
pub struct ShardedCache<V> {
    shards: Box<[Shard<V>]>,
    active: AtomicUsize,
    config: ShardedCacheConfig,
    metrics: Arc<dyn MetricsSink>,
    counters: L1Counters,
    janitor: Mutex<Option<JanitorHandle>>,
}

impl<V> ShardedCache<V> {
    /// Create a cache without a metrics sink or background cleanup
    pub fn new(config: ShardedCacheConfig) -> Result<Self> {
        Self::with_metrics(config, Arc::new(NoopMetrics))
    }

    /// Create a cache reporting to `metrics`
    pub fn with_metrics(config: ShardedCacheConfig, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        config.validate()?;
        let shards: Vec<Shard<V>> = (0..config.shard_count).map(|_| Shard::new()).collect();
        Ok(Self {
            shards: shards.into_boxed_slice(),
            active: AtomicUsize::new(0),
            config,
            metrics,
            counters: L1Counters::default(),
            janitor: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ShardedCacheConfig {
        &self.config
    }

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard that `key` is stored in
    #[inline]
    pub fn shard_index(&self, key: &str) -> usize {
        shard_index(key, self.shards.len())
    }

    #[inline]
    fn shard_for(&self, key: &str) -> &Shard<V> {
        &self.shards[self.shard_index(key)]
    }

    /// Admission counter: entries stored and not yet removed
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Entries physically present across all shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    fn try_reserve_slot(&self) -> bool {
        let max = self.config.max_entries;
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .is_ok()
    }

    fn release_slots(&self, n: usize) {
        if n == 0 {
            return;
        }
        // Saturating: a racing clear() may already have subtracted these.
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some(c.saturating_sub(n)));
    }

    /// Look up `key`, purging it if it has expired
    pub fn get(&self, key: &str) -> LookupOutcome<V>
    where
        V: Clone,
    {
        let shard = self.shard_for(key);
        let now = Instant::now();

        let outcome = match shard.get(key) {
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                LookupOutcome::NotFound
            }
            Some(entry) if !entry.is_expired_at(now) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                LookupOutcome::Hit(entry.into_value())
            }
            Some(_) => {
                // Only the caller that actually removes the entry releases its slot.
                if shard.remove_if(key, |e| e.is_expired_at(now)) {
                    self.release_slots(1);
                    self.counters.evicted.fetch_add(1, Ordering::Relaxed);
                }
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                LookupOutcome::Expired
            }
        };

        self.metrics.record("get", CacheLevel::L1, outcome.label());
        outcome
    }

    /// Store `value` under `key` for `ttl`.
    ///
    /// TTLs longer than [`MAX_TTL`](super::MAX_TTL) are clamped to it.
    ///
    /// A new key on a full cache triggers a synchronous sweep; if no slot is
    /// freed the write is refused with `CapacityExceeded`.
    pub fn set(&self, key: &str, value: V, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            self.metrics.record("set", CacheLevel::L1, "invalid");
            return Err(Error::Validation(format!(
                "ttl for key {} must be greater than zero",
                key
            )));
        }

        let now = Instant::now();
        let entry = CacheEntry::with_expiry(value, expiry_after(now, ttl));
        let shard = self.shard_for(key);

        let entry = match shard.insert_with(key, entry, now, || self.try_reserve_slot()) {
            Ok(outcome) => return self.record_insert(outcome),
            Err(entry) => entry,
        };

        let swept = self.sweep_expired();
        debug!(key, swept, "L1 full, swept before retrying insert");

        match shard.insert_with(key, entry, Instant::now(), || self.try_reserve_slot()) {
            Ok(outcome) => self.record_insert(outcome),
            Err(_) => {
                self.counters
                    .capacity_rejections
                    .fetch_add(1, Ordering::Relaxed);
                self.metrics.record("set", CacheLevel::L1, "rejected");
                Err(Error::CapacityExceeded {
                    active: self.active_count(),
                    max_entries: self.config.max_entries,
                })
            }
        }
    }

    fn record_insert(&self, outcome: InsertOutcome) -> Result<()> {
        let label = match outcome {
            InsertOutcome::Inserted => "inserted",
            InsertOutcome::Replaced => "replaced",
            InsertOutcome::ReplacedExpired => "replaced_expired",
        };
        self.metrics.record("set", CacheLevel::L1, label);
        Ok(())
    }

    /// Store `value` with the configured default TTL
    pub fn set_default(&self, key: &str, value: V) -> Result<()> {
        self.set(key, value, self.config.default_ttl)
    }

    /// Remove `key`; absent keys are not an error
    pub fn delete(&self, key: &str) -> Result<()> {
        let removed = self.shard_for(key).remove(key).is_some();
        if removed {
            self.release_slots(1);
        }
        self.metrics.record(
            "delete",
            CacheLevel::L1,
            if removed { "removed" } else { "absent" },
        );
        Ok(())
    }

    /// Empty every shard.
    ///
    /// Not linearizable with concurrent writes: a racing `set` may survive.
    pub fn clear(&self) -> Result<()> {
        let mut removed = 0;
        for shard in self.shards.iter() {
            let n = shard.clear();
            self.release_slots(n);
            removed += n;
        }
        debug!(removed, "L1 cleared");
        self.metrics.record("clear", CacheLevel::L1, "ok");
        Ok(())
    }

    fn sweep_shard(&self, shard: &Shard<V>, now: Instant) -> usize {
        let mut removed = 0;
        for key in shard.expired_keys(now) {
            if shard.remove_if(&key, |e| e.is_expired_at(now)) {
                removed += 1;
            }
        }
        self.release_slots(removed);
        removed
    }

    fn finish_sweep(&self, removed: usize) -> usize {
        self.counters.sweeps.fetch_add(1, Ordering::Relaxed);
        self.counters
            .evicted
            .fetch_add(removed as u64, Ordering::Relaxed);
        self.metrics.record("sweep", CacheLevel::L1, "ok");
        removed
    }

    /// Remove every expired entry, one shard at a time on the calling thread
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let removed = self
            .shards
            .iter()
            .map(|shard| self.sweep_shard(shard, now))
            .sum();
        self.finish_sweep(removed)
    }

    /// Get cache statistics
    pub fn stats(&self) -> L1Stats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed)
            + self.counters.expirations.load(Ordering::Relaxed);
        let total = hits + misses;
        L1Stats {
            entries: self.len(),
            active_entries: self.active_count(),
            max_entries: self.config.max_entries,
            shard_count: self.shard_count(),
            hits,
            misses,
            hit_ratio: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            sweeps: self.counters.sweeps.load(Ordering::Relaxed),
            capacity_rejections: self.counters.capacity_rejections.load(Ordering::Relaxed),
            taken_at: Utc::now(),
        }
    }

    /// True while a janitor task is attached and not yet stopped
    pub fn is_janitor_running(&self) -> bool {
        self.janitor
            .lock()
            .as_ref()
            .is_some_and(JanitorHandle::is_active)
    }

    /// Signal the background janitor to exit. Does not wait for it.
    ///
    /// Reads and writes keep working; expired entries are then only purged on
    /// access or by a capacity-triggered sweep.
    pub fn stop(&self) {
        if let Some(janitor) = self.janitor.lock().as_ref() {
            janitor.cancel.cancel();
        }
    }

    /// Stop the janitor and wait for its task to finish
    pub async fn shutdown(&self) {
        let handle = self.janitor.lock().take();
        if let Some(JanitorHandle { cancel, task }) = handle {
            cancel.cancel();
            if let Err(e) = task.await {
                warn!(error = %e, "L1 janitor task ended abnormally");
            }
        }
    }
}

impl<V: Send + Sync + 'static> ShardedCache<V> {
    /// Remove every expired entry, fanning the shards out over
    /// `sweep_workers` threads
    pub fn sweep_expired_parallel(&self) -> usize {
        let workers = self.config.sweep_workers.min(self.shards.len());
        if workers <= 1 {
            return self.sweep_expired();
        }

        let now = Instant::now();
        let chunk = self.shards.len().div_ceil(workers);
        let swept = crossbeam::thread::scope(|s| {
            let handles: Vec<_> = self
                .shards
                .chunks(chunk)
                .map(|group| {
                    s.spawn(move |_| {
                        group
                            .iter()
                            .map(|shard| self.sweep_shard(shard, now))
                            .sum::<usize>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or(0))
                .sum::<usize>()
        });

        match swept {
            Ok(removed) => self.finish_sweep(removed),
            Err(_) => {
                warn!("L1 sweep worker panicked");
                0
            }
        }
    }

    /// Attach the background janitor.
    ///
    /// The janitor runs a full sweep every `cleanup_interval` and an
    /// out-of-cycle sweep whenever `probe` reports usage at or above
    /// `memory_high_water`. It stops when `parent` is cancelled, on `stop()`,
    /// or once the cache is dropped. Must be called within a tokio runtime.
    pub fn spawn_janitor(self: &Arc<Self>, probe: Arc<dyn MemoryProbe>, parent: &CancellationToken) {
        let mut slot = self.janitor.lock();
        if slot.as_ref().is_some_and(JanitorHandle::is_active) {
            warn!("L1 janitor already running");
            return;
        }

        let cancel = parent.child_token();
        let task = tokio::spawn(janitor::run(
            Arc::downgrade(self),
            probe,
            cancel.clone(),
        ));
        *slot = Some(JanitorHandle { cancel, task });
    }
}

impl<V> Drop for ShardedCache<V> {
    fn drop(&mut self) {
        if let Some(janitor) = self.janitor.get_mut().as_ref() {
            janitor.cancel.cancel();
        }
    }
}

impl<V> std::fmt::Debug for ShardedCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedCache")
            .field("shard_count", &self.shards.len())
            .field("active", &self.active_count())
            .field("max_entries", &self.config.max_entries)
            .finish()
    }
}

/// L1 cache statistics
#[derive(Debug, Clone)]
pub struct L1Stats {
    /// Entries stored, including expired ones not yet swept
    pub entries: usize,
    /// Admission counter
    pub active_entries: usize,
    pub max_entries: usize,
    pub shard_count: usize,
    pub hits: u64,
    /// Misses, expirations included
    pub misses: u64,
    /// Hit ratio (0.0 - 1.0)
    pub hit_ratio: f64,
    /// Lookups that found an expired entry
    pub expirations: u64,
    /// Expired entries removed by reads or sweeps
    pub evicted: u64,
    pub sweeps: u64,
    pub capacity_rejections: u64,
    pub taken_at: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================
