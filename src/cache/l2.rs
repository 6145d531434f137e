//! L2 Cache - Distributed Tier
//!
//! The shared tier is an external key/value service (typically Redis). The
//! manager only sees it through [`DistributedTier`], a byte-oriented
//! get/set/delete/clear interface with per-key TTLs.
//!
//! [`InMemoryDistributedTier`] is a DashMap-backed stand-in used by tests and
//! the demo binary. It honours TTLs and can be told to fail writes.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::entry::expiry_after;
use crate::error::TierError;

/// Distributed key/value backend
#[async_trait]
pub trait DistributedTier: Send + Sync {
    /// Fetch the payload stored under `key`; `TierError::NotFound` on a miss
    async fn get(&self, key: &str) -> Result<Bytes, TierError>;

    /// Store `value` under `key`, expiring after `ttl`
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), TierError>;

    /// Remove `key`; absent keys are not an error
    async fn delete(&self, key: &str) -> Result<(), TierError>;

    /// Remove every key owned by this tier
    async fn clear(&self) -> Result<(), TierError>;
}

/// L2 backend statistics
#[derive(Debug, Clone, Default)]
pub struct L2BackendStats {
    pub object_count: u64,
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
}

#[derive(Debug, Clone)]
struct StoredValue {
    data: Bytes,
    expires_at: Instant,
}

/// In-memory distributed tier for tests and local runs
#[derive(Debug, Default)]
pub struct InMemoryDistributedTier {
    storage: DashMap<String, StoredValue>,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    failing: AtomicBool,
    fail_next_sets: AtomicUsize,
}

impl InMemoryDistributedTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail until reset
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make the next `n` calls to `set` fail
    pub fn fail_next_sets(&self, n: usize) {
        self.fail_next_sets.store(n, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), TierError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TierError::Backend(anyhow::anyhow!("distributed tier unavailable")));
        }
        Ok(())
    }

    fn take_injected_set_failure(&self) -> bool {
        self.fail_next_sets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Number of unexpired keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.storage.iter().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> L2BackendStats {
        L2BackendStats {
            object_count: self.len() as u64,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl DistributedTier for InMemoryDistributedTier {
    async fn get(&self, key: &str) -> Result<Bytes, TierError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;

        let now = Instant::now();
        if let Some(stored) = self.storage.get(key) {
            if stored.expires_at > now {
                return Ok(stored.data.clone());
            }
        }
        self.storage.remove_if(key, |_, v| v.expires_at <= now);
        Err(TierError::NotFound)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), TierError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;
        if self.take_injected_set_failure() {
            return Err(TierError::Backend(anyhow::anyhow!("injected write failure")));
        }
        if ttl.is_zero() {
            return Err(TierError::Backend(anyhow::anyhow!("ttl must be greater than zero")));
        }

        self.storage.insert(
            key.to_string(),
            StoredValue {
                data: value,
                expires_at: expiry_after(Instant::now(), ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), TierError> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;
        self.storage.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), TierError> {
        self.check_available()?;
        self.storage.clear();
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
