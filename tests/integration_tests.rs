//! tiercache Integration Tests
//!
//! End-to-end behaviour of the two-tier cache:
//! - L1 engine: capacity, expiry and the background janitor
//! - Manager: read-repair, write durability and single-tier access
//! - Concurrency: many tasks over one cache
//! - Configuration and metrics exposition

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use tiercache::cache::{
    CacheLevel, CacheMetrics, DistributedTier, InMemoryDistributedTier, JsonCodec, L2Tier,
    LookupOutcome, PrometheusMetrics, RawCodec, ShardedCache, StaticMemoryProbe,
    TieredCacheManager,
};
use tiercache::config::{CacheSettings, ManagerConfig, ShardedCacheConfig};
use tiercache::Error;

const HOUR: Duration = Duration::from_secs(3600);

fn l1_config(max_entries: usize) -> ShardedCacheConfig {
    ShardedCacheConfig {
        max_entries,
        shard_count: 16,
        ..Default::default()
    }
}

struct Stack {
    l1: Arc<ShardedCache<String>>,
    backend: Arc<InMemoryDistributedTier>,
    manager: TieredCacheManager<String>,
}

fn stack(l1: ShardedCacheConfig, manager: ManagerConfig) -> Stack {
    let l1 = Arc::new(ShardedCache::<String>::new(l1).unwrap());
    let backend = Arc::new(InMemoryDistributedTier::new());
    let l2 = Arc::new(L2Tier::new(backend.clone(), JsonCodec::<String>::new()));
    let manager = TieredCacheManager::<String>::new(l1.clone(), l2, manager).unwrap();
    Stack {
        l1,
        backend,
        manager,
    }
}

// =============================================================================
// L1 Engine
// =============================================================================

mod l1_tests {
    use super::*;

    #[test]
    fn test_capacity_scenario() {
        let cache = ShardedCache::new(l1_config(2)).unwrap();

        assert_ok!(cache.set("a", 1, HOUR));
        assert_ok!(cache.set("b", 2, HOUR));
        assert_matches!(cache.set("c", 3, HOUR), Err(Error::CapacityExceeded { .. }));

        assert_ok!(cache.delete("a"));
        assert_ok!(cache.set("c", 3, HOUR));
        assert_eq!(cache.get("c"), LookupOutcome::Hit(3));
        assert_eq!(cache.active_count(), 2);
    }

    #[test]
    fn test_ttl_boundary() {
        let cache = ShardedCache::new(l1_config(10)).unwrap();
        cache.set("k", "v", Duration::from_millis(50)).unwrap();

        assert!(cache.get("k").is_hit());
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(cache.get("k"), LookupOutcome::Expired);
        assert_eq!(cache.get("k"), LookupOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_janitor_reclaims_capacity() {
        let cache = Arc::new(
            ShardedCache::new(ShardedCacheConfig {
                max_entries: 10,
                shard_count: 4,
                cleanup_interval: Duration::from_millis(25),
                ..Default::default()
            })
            .unwrap(),
        );
        let root = CancellationToken::new();
        cache.spawn_janitor(Arc::new(StaticMemoryProbe::new(0, 1)), &root);

        for i in 0..10 {
            cache.set(&format!("k{}", i), i, Duration::from_millis(10)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(cache.active_count(), 0);
        assert!(cache.stats().sweeps >= 1);

        root.cancel();
        tokio::time::timeout(Duration::from_secs(1), cache.shutdown())
            .await
            .expect("janitor should stop");
        assert!(!cache.is_janitor_running());
    }
}

// =============================================================================
// Manager
// =============================================================================

mod manager_tests {
    use super::*;

    #[tokio::test]
    async fn test_l1_expiry_leaves_l2_intact() {
        let s = stack(
            l1_config(100),
            ManagerConfig {
                l1_ttl: Duration::from_secs(1),
                ..Default::default()
            },
        );
        let cancel = CancellationToken::new();
        s.manager
            .set_to_level(&cancel, CacheLevel::L2, "x", "hello".to_string(), HOUR)
            .await
            .unwrap();

        assert_eq!(s.manager.get(&cancel, "x").await.unwrap(), "hello");
        tokio::time::sleep(Duration::from_secs(2)).await;

        let l1 = s.manager.get_from_level(&cancel, CacheLevel::L1, "x").await;
        assert!(l1.unwrap_err().is_miss());
        assert_eq!(
            s.manager.get_from_level(&cancel, CacheLevel::L2, "x").await.unwrap(),
            "hello"
        );
    }

    #[tokio::test]
    async fn test_write_durability_with_full_l1() {
        let s = stack(l1_config(1), ManagerConfig::default());
        let cancel = CancellationToken::new();
        s.l1.set("resident", "r".to_string(), HOUR).unwrap();

        assert_ok!(s.manager.set(&cancel, "k", "v".to_string(), HOUR).await);
        assert_eq!(s.l1.get("k"), LookupOutcome::NotFound);
        assert_eq!(s.manager.get(&cancel, "k").await.unwrap(), "v");
    }

    #[tokio::test]
    async fn test_l2_outage_is_surfaced() {
        let s = stack(l1_config(100), ManagerConfig::default());
        let cancel = CancellationToken::new();
        s.manager.set(&cancel, "k", "v".to_string(), HOUR).await.unwrap();
        s.backend.set_failing(true);

        // L1 still answers while L2 is down
        assert_eq!(s.manager.get(&cancel, "k").await.unwrap(), "v");
        let err = assert_err!(s.manager.get(&cancel, "other").await);
        assert_matches!(err, Error::UnderlyingTierFailure { level: CacheLevel::L2, .. });
        assert_err!(s.manager.set(&cancel, "k2", "v".to_string(), HOUR).await);
    }

    #[tokio::test]
    async fn test_warmup_then_serve_from_l1() {
        let s = stack(l1_config(100), ManagerConfig::default());
        let cancel = CancellationToken::new();
        for i in 0..20 {
            s.backend
                .set(&format!("w{}", i), format!("\"{}\"", i).into(), HOUR)
                .await
                .unwrap();
        }

        let report = s
            .manager
            .warmup(&cancel, (0..20).map(|i| format!("w{}", i)))
            .await
            .unwrap();
        assert_eq!(report.warmed, 20);

        let reads = s.backend.stats().reads;
        assert_eq!(s.manager.get(&cancel, "w7").await.unwrap(), "7");
        assert_eq!(s.backend.stats().reads, reads);
    }

    #[tokio::test]
    async fn test_raw_bytes_stack() {
        let l1 = Arc::new(ShardedCache::<bytes::Bytes>::new(l1_config(10)).unwrap());
        let backend = Arc::new(InMemoryDistributedTier::new());
        let l2 = Arc::new(L2Tier::new(backend.clone(), RawCodec));
        let manager =
            TieredCacheManager::<bytes::Bytes>::new(l1, l2, ManagerConfig::default()).unwrap();
        let cancel = CancellationToken::new();

        let payload = bytes::Bytes::from_static(b"\x00\xffraw");
        manager.set(&cancel, "blob", payload.clone(), HOUR).await.unwrap();
        assert_eq!(backend.get("blob").await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_timeout_as_deadline() {
        let s = stack(l1_config(10), ManagerConfig::default());
        let cancel = CancellationToken::new();

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            s.manager.set(&cancel, "k", "v".to_string(), HOUR),
        )
        .await;
        assert_matches!(result, Ok(Ok(())));
    }
}

// =============================================================================
// Concurrency
// =============================================================================

mod concurrency_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_manager_use() {
        let s = Arc::new(stack(l1_config(10_000), ManagerConfig::default()));
        let cancel = CancellationToken::new();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let s = Arc::clone(&s);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    for i in 0..200 {
                        let key = format!("t{}-{}", t, i % 50);
                        s.manager
                            .set(&cancel, &key, i.to_string(), HOUR)
                            .await
                            .unwrap();
                        s.manager.get(&cancel, &key).await.unwrap();
                        if i % 7 == 0 {
                            s.manager.delete(&cancel, &key).await.unwrap();
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(s.l1.active_count(), s.l1.len());
        assert!(s.l1.len() <= 8 * 50);
    }

    #[test]
    fn test_counter_converges_after_sweep() {
        let cache = Arc::new(ShardedCache::new(l1_config(100_000)).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let ttl = if i % 2 == 0 {
                            Duration::from_millis(5)
                        } else {
                            HOUR
                        };
                        cache.set(&format!("k{}-{}", t, i), i, ttl).unwrap();
                        if i % 3 == 0 {
                            cache.get(&format!("k{}-{}", t, i / 2));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        std::thread::sleep(Duration::from_millis(20));
        cache.sweep_expired_parallel();

        assert_eq!(cache.len(), 8 * 250);
        assert_eq!(cache.active_count(), cache.len());
    }
}

// =============================================================================
// Configuration & Metrics
// =============================================================================

mod ambient_tests {
    use super::*;

    #[tokio::test]
    async fn test_stack_from_yaml_settings() {
        let settings = CacheSettings::from_yaml(
            r#"
maxEntries: 3
shardCount: 4
cleanupInterval: 10s
l1Ttl: 500ms
"#,
        )
        .unwrap();

        let s = stack(
            settings.sharded_cache_config().unwrap(),
            settings.manager_config().unwrap(),
        );
        assert_eq!(s.l1.shard_count(), 4);
        assert_eq!(s.manager.config().l1_ttl, Duration::from_millis(500));

        let cancel = CancellationToken::new();
        for key in ["a", "b", "c", "d"] {
            s.manager.set(&cancel, key, key.to_string(), HOUR).await.unwrap();
        }
        assert_eq!(s.l1.active_count(), 3);
        assert_eq!(s.backend.len(), 4);
    }

    #[tokio::test]
    async fn test_metrics_sinks_observe_traffic() {
        let registry = prometheus::Registry::new();
        let prom = Arc::new(PrometheusMetrics::register(&registry).unwrap());
        let counters = Arc::new(CacheMetrics::new());

        let l1 = Arc::new(ShardedCache::<String>::with_metrics(l1_config(10), prom.clone()).unwrap());
        let l2 = Arc::new(L2Tier::with_metrics(
            Arc::new(InMemoryDistributedTier::new()),
            JsonCodec::<String>::new(),
            counters.clone(),
        ));
        let manager = TieredCacheManager::<String>::new(l1, l2, ManagerConfig::default()).unwrap();
        let cancel = CancellationToken::new();

        manager.set(&cancel, "k", "v".to_string(), HOUR).await.unwrap();
        manager.get(&cancel, "k").await.unwrap();
        let _ = manager.get(&cancel, "missing").await;

        assert_eq!(prom.value("get", CacheLevel::L1, "hit"), 1);
        assert_eq!(prom.value("get", CacheLevel::L1, "miss"), 1);
        assert_eq!(counters.count("set", CacheLevel::L2, "ok"), 1);
        assert_eq!(counters.misses(CacheLevel::L2), 1);

        let text = prometheus::TextEncoder::new()
            .encode_to_string(&registry.gather())
            .unwrap();
        assert!(text.contains("tiercache_operations_total"));
    }
}
