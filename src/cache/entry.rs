//! Cache Entry Types
//!
//! Entries, tier identifiers and L1 lookup outcomes.

use std::time::{Duration, Instant};

/// Cache tier identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheLevel {
    /// L1 - process-local memory
    L1,
    /// L2 - shared distributed store
    L2,
}

impl CacheLevel {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheLevel::L1 => "l1",
            CacheLevel::L2 => "l2",
        }
    }
}

impl std::fmt::Display for CacheLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Longest lifetime an entry can be given; larger TTLs are clamped to it
pub const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Absolute expiry `ttl` after `now`, clamped to [`MAX_TTL`] so that
/// "never expire" TTLs such as `Duration::MAX` cannot overflow `Instant`
pub fn expiry_after(now: Instant, ttl: Duration) -> Instant {
    let ttl = ttl.min(MAX_TTL);
    now.checked_add(ttl)
        .or_else(|| now.checked_add(Duration::from_secs(365 * 24 * 60 * 60)))
        .unwrap_or(now)
}

/// A stored value with its absolute expiry
#[derive(Clone)]
pub struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    /// Create an entry that expires `ttl` from now
    pub fn new(value: V, ttl: Duration) -> Self {
        Self::with_expiry(value, expiry_after(Instant::now(), ttl))
    }

    /// Create an entry with an explicit expiry instant
    pub fn with_expiry(value: V, expires_at: Instant) -> Self {
        Self { value, expires_at }
    }

    /// Check if the entry has expired at `now`
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Check if the entry has expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Time left before expiry, zero once expired
    pub fn remaining_ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn into_value(self) -> V {
        self.value
    }
}

impl<V> std::fmt::Debug for CacheEntry<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("remaining_ttl", &self.remaining_ttl())
            .field("is_expired", &self.is_expired())
            .finish()
    }
}

/// Result of an L1 lookup
///
/// Misses are outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome<V> {
    /// Live value found
    Hit(V),
    /// Entry was present but past its expiry; it has been purged
    Expired,
    /// No entry for the key
    NotFound,
}

impl<V> LookupOutcome<V> {
    pub fn is_hit(&self) -> bool {
        matches!(self, LookupOutcome::Hit(_))
    }

    /// Convert into the hit value, if any
    pub fn into_value(self) -> Option<V> {
        match self {
            LookupOutcome::Hit(v) => Some(v),
            _ => None,
        }
    }

    /// Metrics label for this outcome
    pub fn label(&self) -> &'static str {
        match self {
            LookupOutcome::Hit(_) => "hit",
            LookupOutcome::Expired => "expired",
            LookupOutcome::NotFound => "miss",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
