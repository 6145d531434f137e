//! Shard Implementation
//!
//! One partition of the L1 keyspace. Each shard owns its own `RwLock`, so
//! operations on different shards never contend.
//!
//! # Design
//!
//! - Keys are routed with FNV-1a 64, reduced modulo the shard count
//! - Reads take the shared lock; inserts and removals take the exclusive lock
//! - Scans collect candidate keys under the shared lock and leave removal to
//!   the caller, one key at a time

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use super::entry::CacheEntry;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a 64-bit hash of `bytes`
#[inline]
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Shard index for `key` among `shard_count` shards
#[inline]
pub fn shard_index(key: &str, shard_count: usize) -> usize {
    (fnv1a_64(key.as_bytes()) % shard_count as u64) as usize
}

/// What an accepted insert did to the shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New key stored; one admission slot consumed
    Inserted,
    /// Live entry overwritten in place
    Replaced,
    /// Expired entry replaced; its slot is reused
    ReplacedExpired,
}

/// Single shard containing a map and access statistics
#[repr(align(64))]
pub struct Shard<V> {
    map: RwLock<HashMap<String, CacheEntry<V>>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl<V> Default for Shard<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Shard<V> {
    /// Create a new empty shard
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of stored entries, live or not yet swept
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Get a copy of the entry for `key`, expired or not
    pub fn get(&self, key: &str) -> Option<CacheEntry<V>>
    where
        V: Clone,
    {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.map.read().get(key).cloned()
    }

    /// Insert or overwrite `key`.
    ///
    /// `admit` runs under the write lock and only for keys with no existing
    /// mapping; returning false leaves the shard untouched and hands the entry
    /// back as `Err`.
    pub fn insert_with<F>(
        &self,
        key: &str,
        entry: CacheEntry<V>,
        now: Instant,
        admit: F,
    ) -> Result<InsertOutcome, CacheEntry<V>>
    where
        F: FnOnce() -> bool,
    {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.map.write();

        match guard.get_mut(key) {
            Some(existing) => {
                let was_expired = existing.is_expired_at(now);
                *existing = entry;
                if was_expired {
                    Ok(InsertOutcome::ReplacedExpired)
                } else {
                    Ok(InsertOutcome::Replaced)
                }
            }
            None => {
                if !admit() {
                    return Err(entry);
                }
                guard.insert(key.to_owned(), entry);
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    /// Remove `key`, returning the entry if one was mapped
    pub fn remove(&self, key: &str) -> Option<CacheEntry<V>> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.map.write().remove(key)
    }

    /// Remove `key` only if its current entry satisfies `pred`.
    ///
    /// Returns true if an entry was removed.
    pub fn remove_if<F>(&self, key: &str, pred: F) -> bool
    where
        F: FnOnce(&CacheEntry<V>) -> bool,
    {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.map.write();
        match guard.get(key) {
            Some(entry) if pred(entry) => {
                guard.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Keys whose entries are expired at `now`
    pub fn expired_keys(&self, now: Instant) -> Vec<String> {
        self.map
            .read()
            .iter()
            .filter(|(_, e)| e.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Drop every entry, returning how many were removed
    pub fn clear(&self) -> usize {
        let mut guard = self.map.write();
        let removed = guard.len();
        guard.clear();
        removed
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn live(v: i32) -> CacheEntry<i32> {
        CacheEntry::new(v, Duration::from_secs(3600))
    }

    fn dead(v: i32) -> CacheEntry<i32> {
        CacheEntry::with_expiry(v, Instant::now() - Duration::from_millis(1))
    }

    #[test]
    fn test_fnv1a_known_vectors() {
        assert_eq!(fnv1a_64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(fnv1a_64(b"foobar"), 0x8594_4171_f739_67e8);
    }

    #[test]
    fn test_shard_creation() {
        let shard: Shard<i32> = Shard::new();
        assert!(shard.is_empty());
        assert_eq!(shard.len(), 0);
    }

    #[test]
    fn test_shard_insert_outcomes() {
        let shard: Shard<i32> = Shard::new();
        let now = Instant::now();

        assert_eq!(shard.insert_with("k", live(1), now, || true).unwrap(), InsertOutcome::Inserted);
        assert_eq!(shard.insert_with("k", live(2), now, || false).unwrap(), InsertOutcome::Replaced);
        assert_eq!(shard.get("k").unwrap().into_value(), 2);

        assert_eq!(shard.insert_with("gone", dead(1), now, || true).unwrap(), InsertOutcome::Inserted);
        assert_eq!(
            shard.insert_with("gone", live(3), Instant::now(), || false).unwrap(),
            InsertOutcome::ReplacedExpired
        );

        let rejected = shard.insert_with("new", live(4), now, || false);
        assert_eq!(rejected.unwrap_err().into_value(), 4);
        assert!(shard.get("new").is_none());
        assert_eq!(shard.len(), 2);
    }

    #[test]
    fn test_shard_remove_if() {
        let shard: Shard<i32> = Shard::new();
        let now = Instant::now();
        shard.insert_with("k", live(1), now, || true).unwrap();

        assert!(!shard.remove_if("k", |e| e.is_expired()));
        assert!(shard.remove_if("k", |_| true));
        assert!(!shard.remove_if("k", |_| true));
        assert!(shard.remove("k").is_none());
    }

    #[test]
    fn test_shard_expired_keys_and_clear() {
        let shard: Shard<i32> = Shard::new();
        let now = Instant::now();
        shard.insert_with("a", live(1), now, || true).unwrap();
        shard.insert_with("b", dead(2), now, || true).unwrap();
        shard.insert_with("c", dead(3), now, || true).unwrap();

        let mut expired = shard.expired_keys(Instant::now());
        expired.sort();
        assert_eq!(expired, vec!["b".to_string(), "c".to_string()]);
        assert!(shard.get("a").is_some_and(|e| !e.is_expired()));
        assert!(shard.get("b").is_some_and(|e| e.is_expired()));

        assert_eq!(shard.clear(), 3);
        assert!(shard.is_empty());
    }

    #[test]
    fn test_shard_statistics() {
        let shard: Shard<i32> = Shard::new();
        shard.insert_with("k", live(1), Instant::now(), || true).unwrap();
        shard.get("k");
        shard.get("k");

        assert_eq!(shard.write_count(), 1);
        assert_eq!(shard.read_count(), 2);
    }

    #[test]
    fn test_shard_index_distribution() {
        let mut counts = vec![0usize; 16];
        for i in 0..1000 {
            counts[shard_index(&format!("key{}", i), 16)] += 1;
        }

        let max_count = counts.iter().max().unwrap();
        let min_count = counts.iter().min().unwrap();
        assert!(*max_count < 200, "Uneven distribution: max shard has {}", max_count);
        assert!(*min_count > 20, "Uneven distribution: min shard has {}", min_count);
    }

    proptest! {
        #[test]
        fn prop_shard_index_is_stable_and_bounded(key in ".*", shards in 1usize..1024) {
            let first = shard_index(&key, shards);
            prop_assert!(first < shards);
            prop_assert_eq!(first, shard_index(&key, shards));
        }
    }
}
