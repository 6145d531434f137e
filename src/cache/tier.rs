//! Tier Abstraction
//!
//! [`CacheTier`] is the uniform interface the manager drives. The L1 engine
//! implements it directly; [`L2Tier`] adapts a byte-oriented
//! [`DistributedTier`] plus a [`ValueCodec`] into a typed tier.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::codec::ValueCodec;
use super::entry::{CacheLevel, LookupOutcome};
use super::l1::ShardedCache;
use super::l2::DistributedTier;
use super::metrics::{MetricsSink, NoopMetrics};
use crate::error::{Error, Result, TierError};

/// One level of the cache hierarchy
#[async_trait]
pub trait CacheTier<V>: Send + Sync {
    /// Which level this tier serves
    fn level(&self) -> CacheLevel;

    /// `NotFound` or `Expired` on a miss
    async fn get(&self, key: &str) -> Result<V>;

    async fn set(&self, key: &str, value: V, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

#[async_trait]
impl<V> CacheTier<V> for ShardedCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn level(&self) -> CacheLevel {
        CacheLevel::L1
    }

    async fn get(&self, key: &str) -> Result<V> {
        match ShardedCache::get(self, key) {
            LookupOutcome::Hit(value) => Ok(value),
            LookupOutcome::Expired => Err(Error::Expired {
                key: key.to_string(),
            }),
            LookupOutcome::NotFound => Err(Error::not_found(key)),
        }
    }

    async fn set(&self, key: &str, value: V, ttl: Duration) -> Result<()> {
        ShardedCache::set(self, key, value, ttl)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        ShardedCache::delete(self, key)
    }

    async fn clear(&self) -> Result<()> {
        ShardedCache::clear(self)
    }
}

/// Typed view over a distributed backend
pub struct L2Tier<V, C> {
    backend: Arc<dyn DistributedTier>,
    codec: C,
    metrics: Arc<dyn MetricsSink>,
    _value: PhantomData<fn() -> V>,
}

impl<V, C> L2Tier<V, C>
where
    C: ValueCodec<V>,
{
    pub fn new(backend: Arc<dyn DistributedTier>, codec: C) -> Self {
        Self::with_metrics(backend, codec, Arc::new(NoopMetrics))
    }

    pub fn with_metrics(
        backend: Arc<dyn DistributedTier>,
        codec: C,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            backend,
            codec,
            metrics,
            _value: PhantomData,
        }
    }

    fn failure(operation: &'static str, source: TierError) -> Error {
        Error::UnderlyingTierFailure {
            operation,
            level: CacheLevel::L2,
            source,
        }
    }
}

#[async_trait]
impl<V, C> CacheTier<V> for L2Tier<V, C>
where
    V: Send + Sync + 'static,
    C: ValueCodec<V> + 'static,
{
    fn level(&self) -> CacheLevel {
        CacheLevel::L2
    }

    async fn get(&self, key: &str) -> Result<V> {
        let bytes = match self.backend.get(key).await {
            Ok(bytes) => bytes,
            Err(TierError::NotFound) => {
                self.metrics.record("get", CacheLevel::L2, "miss");
                return Err(Error::not_found(key));
            }
            Err(e) => {
                self.metrics.record("get", CacheLevel::L2, "error");
                return Err(Self::failure("get", e));
            }
        };

        match self.codec.decode(&bytes) {
            Ok(value) => {
                self.metrics.record("get", CacheLevel::L2, "hit");
                Ok(value)
            }
            Err(e) => {
                self.metrics.record("get", CacheLevel::L2, "error");
                Err(e)
            }
        }
    }

    async fn set(&self, key: &str, value: V, ttl: Duration) -> Result<()> {
        if ttl.is_zero() {
            self.metrics.record("set", CacheLevel::L2, "invalid");
            return Err(Error::Validation(format!(
                "ttl for key {} must be greater than zero",
                key
            )));
        }

        let bytes = self.codec.encode(&value)?;
        match self.backend.set(key, bytes, ttl).await {
            Ok(()) => {
                self.metrics.record("set", CacheLevel::L2, "ok");
                Ok(())
            }
            Err(e) => {
                self.metrics.record("set", CacheLevel::L2, "error");
                Err(Self::failure("set", e))
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self.backend.delete(key).await {
            Ok(()) | Err(TierError::NotFound) => {
                self.metrics.record("delete", CacheLevel::L2, "ok");
                Ok(())
            }
            Err(e) => {
                self.metrics.record("delete", CacheLevel::L2, "error");
                Err(Self::failure("delete", e))
            }
        }
    }

    async fn clear(&self) -> Result<()> {
        self.backend.clear().await.map_err(|e| {
            self.metrics.record("clear", CacheLevel::L2, "error");
            Self::failure("clear", e)
        })?;
        self.metrics.record("clear", CacheLevel::L2, "ok");
        Ok(())
    }
}

impl<V, C> std::fmt::Debug for L2Tier<V, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("L2Tier").finish_non_exhaustive()
    }
}
