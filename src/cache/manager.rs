//! Cache Manager - Unified Two-Tier Cache
//!
//! Fronts a process-local L1 and a shared L2 with a single get/set/delete
//! façade.
//!
//! - Reads try L1, fall back to L2 and repair L1 with the L2 value
//! - Writes go to both tiers concurrently; only the L2 outcome is reported
//! - Deletes and clears touch L1 first, best-effort, then L2
//!
//! Every operation takes a [`CancellationToken`]; once it fires the call
//! returns [`Error::Cancelled`] and any in-flight tier work is dropped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::entry::CacheLevel;
use super::metrics::{MetricsSink, NoopMetrics};
use super::tier::CacheTier;
use crate::config::ManagerConfig;
use crate::error::{Error, Result};

type TierRef<V> = Arc<dyn CacheTier<V>>;

/// Outcome of a successful warmup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarmupReport {
    pub warmed: usize,
    pub requested: usize,
}

/// Builder for [`TieredCacheManager`]
pub struct TieredCacheManagerBuilder<V> {
    tiers: Vec<TierRef<V>>,
    config: ManagerConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl<V> TieredCacheManagerBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Register a tier under its own level
    pub fn tier(mut self, tier: TierRef<V>) -> Self {
        self.tiers.push(tier);
        self
    }

    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Validate and build.
    ///
    /// Fails if the configuration is invalid, no tier was registered, or two
    /// tiers claim the same level.
    pub fn build(self) -> Result<TieredCacheManager<V>> {
        self.config.validate()?;
        if self.tiers.is_empty() {
            return Err(Error::Validation(
                "at least one cache tier must be registered".into(),
            ));
        }

        let mut tiers = HashMap::with_capacity(self.tiers.len());
        for tier in self.tiers {
            let level = tier.level();
            if tiers.insert(level, tier).is_some() {
                return Err(Error::Validation(format!(
                    "cache tier {} registered twice",
                    level
                )));
            }
        }

        Ok(TieredCacheManager {
            tiers,
            config: self.config,
            metrics: self.metrics,
        })
    }
}

/// Two-tier cache façade
pub struct TieredCacheManager<V> {
    tiers: HashMap<CacheLevel, TierRef<V>>,
    config: ManagerConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl<V> TieredCacheManager<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn builder() -> TieredCacheManagerBuilder<V> {
        TieredCacheManagerBuilder {
            tiers: Vec::new(),
            config: ManagerConfig::default(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Build a manager over the usual L1 + L2 pair
    pub fn new(l1: TierRef<V>, l2: TierRef<V>, config: ManagerConfig) -> Result<Self> {
        Self::builder().tier(l1).tier(l2).config(config).build()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// True if a tier is registered for `level`
    pub fn has_level(&self, level: CacheLevel) -> bool {
        self.tiers.contains_key(&level)
    }

    /// The tier registered for `level`
    pub fn tier(&self, level: CacheLevel) -> Result<&TierRef<V>> {
        self.tiers.get(&level).ok_or(Error::TierUnavailable(level))
    }

    fn l1(&self) -> Option<&TierRef<V>> {
        self.tiers.get(&CacheLevel::L1)
    }

    fn l2(&self) -> Option<&TierRef<V>> {
        self.tiers.get(&CacheLevel::L2)
    }

    async fn guarded<T, F>(cancel: &CancellationToken, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled { operation });
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled { operation }),
            result = fut => result,
        }
    }

    fn validate_ttl(key: &str, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            return Err(Error::Validation(format!(
                "ttl for key {} must be greater than zero",
                key
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Façade
    // =========================================================================

    /// Look up `key`, falling back to L2 on an L1 miss.
    ///
    /// An L2 hit is written back into L1 with the L1 TTL before returning.
    /// Misses in every tier collapse into a single `NotFound`.
    #[instrument(skip(self, cancel))]
    pub async fn get(&self, cancel: &CancellationToken, key: &str) -> Result<V> {
        Self::guarded(cancel, "get", self.get_inner(key)).await
    }

    async fn get_inner(&self, key: &str) -> Result<V> {
        if let Some(l1) = self.l1() {
            match l1.get(key).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_miss() => {}
                Err(e) => {
                    warn!(operation = "get", key, tier = %CacheLevel::L1, error = %e, "L1 lookup failed");
                }
            }
        }

        let Some(l2) = self.l2() else {
            return Err(Error::not_found(key));
        };

        let value = match l2.get(key).await {
            Ok(value) => value,
            Err(e) if e.is_miss() => return Err(Error::not_found(key)),
            Err(e) => return Err(e),
        };

        if let Some(l1) = self.l1() {
            self.repair_l1(l1, key, value.clone()).await;
        }
        Ok(value)
    }

    async fn repair_l1(&self, l1: &TierRef<V>, key: &str, value: V) {
        match l1.set(key, value, self.config.l1_ttl).await {
            Ok(()) => {
                self.metrics.record("read_repair", CacheLevel::L1, "ok");
            }
            Err(e) => {
                self.metrics.record("read_repair", CacheLevel::L1, "failed");
                warn!(operation = "read_repair", key, tier = %CacheLevel::L1, error = %e, "L1 write-back failed");
            }
        }
    }

    /// Store `value` in both tiers.
    ///
    /// L1 gets the configured L1 TTL and L2 the caller's `ttl`. The writes run
    /// concurrently; an L1 failure is logged and the L2 result is returned.
    #[instrument(skip(self, cancel, value))]
    pub async fn set(
        &self,
        cancel: &CancellationToken,
        key: &str,
        value: V,
        ttl: Duration,
    ) -> Result<()> {
        Self::validate_ttl(key, ttl)?;
        Self::guarded(cancel, "set", self.set_inner(key, value, ttl)).await
    }

    async fn set_inner(&self, key: &str, value: V, ttl: Duration) -> Result<()> {
        match (self.l1(), self.l2()) {
            (Some(l1), Some(l2)) => {
                let (l1_result, l2_result) = tokio::join!(
                    l1.set(key, value.clone(), self.config.l1_ttl),
                    l2.set(key, value, ttl),
                );
                if let Err(e) = l1_result {
                    warn!(operation = "set", key, tier = %CacheLevel::L1, error = %e, "L1 write failed");
                }
                l2_result
            }
            (Some(l1), None) => l1.set(key, value, self.config.l1_ttl).await,
            (None, Some(l2)) => l2.set(key, value, ttl).await,
            (None, None) => Err(Error::TierUnavailable(CacheLevel::L2)),
        }
    }

    /// Remove `key` from L1 (best-effort) and then from L2
    #[instrument(skip(self, cancel))]
    pub async fn delete(&self, cancel: &CancellationToken, key: &str) -> Result<()> {
        Self::guarded(cancel, "delete", async {
            let l1_result = match self.l1() {
                Some(l1) => l1.delete(key).await,
                None => Ok(()),
            };
            match self.l2() {
                Some(l2) => {
                    if let Err(e) = l1_result {
                        warn!(operation = "delete", key, tier = %CacheLevel::L1, error = %e, "L1 delete failed");
                    }
                    l2.delete(key).await
                }
                None => l1_result,
            }
        })
        .await
    }

    /// Empty L1 (best-effort) and then L2
    #[instrument(skip(self, cancel))]
    pub async fn clear(&self, cancel: &CancellationToken) -> Result<()> {
        Self::guarded(cancel, "clear", async {
            let l1_result = match self.l1() {
                Some(l1) => l1.clear().await,
                None => Ok(()),
            };
            match self.l2() {
                Some(l2) => {
                    if let Err(e) = l1_result {
                        warn!(operation = "clear", tier = %CacheLevel::L1, error = %e, "L1 clear failed");
                    }
                    l2.clear().await
                }
                None => l1_result,
            }
        })
        .await
    }

    /// Load `keys` from L2 into L1.
    ///
    /// At most `warmup_concurrency` keys are in flight. Keys that fail, L2
    /// misses included, are reported together in `Error::Warmup`; keys that
    /// succeeded stay in L1 either way.
    #[instrument(skip(self, cancel, keys))]
    pub async fn warmup<I, S>(&self, cancel: &CancellationToken, keys: I) -> Result<WarmupReport>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        let requested = keys.len();
        let l1 = self.tier(CacheLevel::L1)?;
        let l2 = self.tier(CacheLevel::L2)?;
        let ttl = self.config.l1_ttl;

        let warm = async {
            stream::iter(keys)
                .map(|key| async move {
                    let result = match l2.get(&key).await {
                        Ok(value) => l1.set(&key, value, ttl).await,
                        Err(e) => Err(e),
                    };
                    (key, result)
                })
                .buffer_unordered(self.config.warmup_concurrency)
                .filter_map(|(key, result)| async move { result.err().map(|e| (key, e)) })
                .collect::<Vec<_>>()
                .await
        };

        let failures = Self::guarded(cancel, "warmup", async { Ok(warm.await) }).await?;
        let warmed = requested - failures.len();
        debug!(requested, warmed, "warmup finished");

        if failures.is_empty() {
            self.metrics.record("warmup", CacheLevel::L1, "ok");
            Ok(WarmupReport { warmed, requested })
        } else {
            self.metrics.record("warmup", CacheLevel::L1, "partial");
            for (key, e) in &failures {
                warn!(operation = "warmup", key = %key, tier = %CacheLevel::L1, error = %e, "key not warmed");
            }
            Err(Error::Warmup {
                requested,
                failures,
            })
        }
    }

    // =========================================================================
    // Single-tier access
    // =========================================================================

    /// Read `key` from exactly one tier; misses are reported as the tier saw them
    #[instrument(skip(self, cancel))]
    pub async fn get_from_level(
        &self,
        cancel: &CancellationToken,
        level: CacheLevel,
        key: &str,
    ) -> Result<V> {
        let tier = self.tier(level)?;
        Self::guarded(cancel, "get_from_level", tier.get(key)).await
    }

    /// Write `key` to exactly one tier
    #[instrument(skip(self, cancel, value))]
    pub async fn set_to_level(
        &self,
        cancel: &CancellationToken,
        level: CacheLevel,
        key: &str,
        value: V,
        ttl: Duration,
    ) -> Result<()> {
        let tier = self.tier(level)?;
        Self::validate_ttl(key, ttl)?;
        Self::guarded(cancel, "set_to_level", tier.set(key, value, ttl)).await
    }

    /// Remove `key` from exactly one tier
    #[instrument(skip(self, cancel))]
    pub async fn delete_from_level(
        &self,
        cancel: &CancellationToken,
        level: CacheLevel,
        key: &str,
    ) -> Result<()> {
        let tier = self.tier(level)?;
        Self::guarded(cancel, "delete_from_level", tier.delete(key)).await
    }

    /// Empty exactly one tier
    #[instrument(skip(self, cancel))]
    pub async fn clear_level(&self, cancel: &CancellationToken, level: CacheLevel) -> Result<()> {
        let tier = self.tier(level)?;
        Self::guarded(cancel, "clear_level", tier.clear()).await
    }
}

impl<V> std::fmt::Debug for TieredCacheManager<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut levels: Vec<_> = self.tiers.keys().map(|l| l.as_str()).collect();
        levels.sort_unstable();
        f.debug_struct("TieredCacheManager")
            .field("tiers", &levels)
            .field("config", &self.config)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
