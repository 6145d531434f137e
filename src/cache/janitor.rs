//! L1 Janitor
//!
//! Background loop that keeps the L1 cache free of expired entries. Two timers
//! drive it: the fixed cleanup interval, and a faster memory check that sweeps
//! out of cycle when the process is under memory pressure.

use std::sync::{Arc, Weak};

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::entry::expiry_after;
use super::l1::ShardedCache;
use super::memory::MemoryProbe;

/// Why a sweep ran
#[derive(Debug, Clone, Copy)]
enum Trigger {
    Interval,
    MemoryPressure,
}

fn first_tick(period: std::time::Duration) -> Instant {
    Instant::from_std(expiry_after(std::time::Instant::now(), period))
}

/// Run until `cancel` fires or the cache is dropped
#[instrument(skip_all)]
pub(crate) async fn run<V>(
    cache: Weak<ShardedCache<V>>,
    probe: Arc<dyn MemoryProbe>,
    cancel: CancellationToken,
) where
    V: Send + Sync + 'static,
{
    let (cleanup_every, memory_every, high_water) = match cache.upgrade() {
        Some(c) => (
            c.config().cleanup_interval,
            c.config().memory_check_interval,
            c.config().memory_high_water,
        ),
        None => return,
    };

    info!(
        cleanup_interval = ?cleanup_every,
        memory_check_interval = ?memory_every,
        high_water,
        "L1 janitor started"
    );

    let mut cleanup = interval_at(first_tick(cleanup_every), cleanup_every);
    cleanup.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut memory = interval_at(first_tick(memory_every), memory_every);
    memory.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let trigger = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = cleanup.tick() => Trigger::Interval,
            _ = memory.tick() => {
                // Probes may read /proc under a lock; keep that off the runtime workers.
                let probe = Arc::clone(&probe);
                let sample = match tokio::task::spawn_blocking(move || probe.sample()).await {
                    Ok(sample) => sample,
                    Err(e) => {
                        warn!(error = %e, "memory probe task failed");
                        continue;
                    }
                };
                match sample {
                    Some(usage) if usage.exceeds(high_water) => {
                        debug!(used = usage.used, reference = usage.reference, "memory above high water");
                        Trigger::MemoryPressure
                    }
                    _ => continue,
                }
            }
        };

        let Some(strong) = cache.upgrade() else {
            break;
        };

        let removed = match tokio::task::spawn_blocking(move || strong.sweep_expired_parallel()).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "L1 sweep task failed");
                continue;
            }
        };
        debug!(?trigger, removed, "L1 sweep finished");
    }

    info!("L1 janitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::StaticMemoryProbe;
    use crate::config::ShardedCacheConfig;
    use std::time::Duration;

    fn config(cleanup: Duration, memory_check: Duration) -> ShardedCacheConfig {
        ShardedCacheConfig {
            max_entries: 1000,
            cleanup_interval: cleanup,
            memory_check_interval: memory_check,
            shard_count: 8,
            ..Default::default()
        }
    }

    fn idle_probe() -> Arc<dyn MemoryProbe> {
        Arc::new(StaticMemoryProbe::new(0, 100))
    }

    #[tokio::test]
    async fn test_interval_sweep_removes_expired() {
        let cache = Arc::new(
            ShardedCache::new(config(Duration::from_millis(30), Duration::from_secs(60))).unwrap(),
        );
        let root = CancellationToken::new();
        cache.spawn_janitor(idle_probe(), &root);
        assert!(cache.is_janitor_running());

        for i in 0..20 {
            cache.set(&format!("k{}", i), i, Duration::from_millis(5)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(cache.len(), 0);
        assert_eq!(cache.active_count(), 0);
        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_memory_pressure_triggers_sweep() {
        let cache = Arc::new(
            ShardedCache::new(config(Duration::from_secs(3600), Duration::from_millis(20))).unwrap(),
        );
        let probe = Arc::new(StaticMemoryProbe::new(10, 100));
        let root = CancellationToken::new();
        cache.spawn_janitor(probe.clone(), &root);

        cache.set("k", 1, Duration::from_millis(5)).unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        // Below the high-water mark nothing sweeps
        assert_eq!(cache.len(), 1);

        probe.set_used(95);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.active_count(), 0);

        cache.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_and_parent_cancellation() {
        let cache = Arc::new(
            ShardedCache::<u32>::new(config(Duration::from_millis(10), Duration::from_millis(10)))
                .unwrap(),
        );
        let root = CancellationToken::new();
        cache.spawn_janitor(idle_probe(), &root);

        cache.stop();
        cache.stop();
        assert!(!cache.is_janitor_running());
        cache.shutdown().await;

        // Foreground operations still work after stop
        cache.set("k", 7, Duration::from_secs(60)).unwrap();
        assert_eq!(cache.get("k").into_value(), Some(7));

        cache.spawn_janitor(idle_probe(), &root);
        assert!(cache.is_janitor_running());
        root.cancel();
        tokio::time::timeout(Duration::from_secs(1), cache.shutdown())
            .await
            .expect("janitor should exit after parent cancellation");
    }

    #[tokio::test]
    async fn test_restart_right_after_stop() {
        let cache = Arc::new(
            ShardedCache::<u32>::new(config(Duration::from_millis(20), Duration::from_secs(60)))
                .unwrap(),
        );
        let root = CancellationToken::new();
        cache.spawn_janitor(idle_probe(), &root);

        // The old task has not been polled since stop(), so it is still alive
        cache.stop();
        cache.spawn_janitor(idle_probe(), &root);
        assert!(cache.is_janitor_running());

        cache.set("k", 1, Duration::from_millis(5)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.len(), 0);

        cache.shutdown().await;
        assert!(!cache.is_janitor_running());
    }

    #[derive(Default)]
    struct ThreadRecordingProbe {
        threads: parking_lot::Mutex<Vec<std::thread::ThreadId>>,
    }

    impl MemoryProbe for ThreadRecordingProbe {
        fn sample(&self) -> Option<crate::cache::memory::MemoryUsage> {
            self.threads.lock().push(std::thread::current().id());
            None
        }
    }

    #[tokio::test]
    async fn test_memory_sampled_off_the_runtime_thread() {
        let cache = Arc::new(
            ShardedCache::<u32>::new(config(Duration::from_secs(3600), Duration::from_millis(10)))
                .unwrap(),
        );
        let probe = Arc::new(ThreadRecordingProbe::default());
        let root = CancellationToken::new();
        cache.spawn_janitor(probe.clone(), &root);

        tokio::time::sleep(Duration::from_millis(80)).await;
        cache.shutdown().await;

        let runtime_thread = std::thread::current().id();
        let threads = probe.threads.lock();
        assert!(!threads.is_empty());
        assert!(threads.iter().all(|id| *id != runtime_thread));
    }

    #[tokio::test]
    async fn test_janitor_exits_when_cache_dropped() {
        let cache = Arc::new(
            ShardedCache::<u32>::new(config(Duration::from_millis(10), Duration::from_secs(60)))
                .unwrap(),
        );
        let root = CancellationToken::new();
        cache.spawn_janitor(idle_probe(), &root);
        let weak = Arc::downgrade(&cache);

        drop(cache);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(weak.upgrade().is_none());
    }
}
