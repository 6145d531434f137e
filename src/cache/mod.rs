//! Two-Tiered Cache System
//!
//! A fast process-local L1 in front of a shared distributed L2.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                     TieredCacheManager                               │
//! │        get: L1 → L2 (+ read-repair)   set: L1 ∥ L2 (L2 reported)      │
//! ├──────────────────────────────────┬───────────────────────────────────┤
//! │  L1 ShardedCache (RAM)           │  L2Tier (distributed)             │
//! │  ┌────────────────────────────┐  │  ┌─────────────────────────────┐  │
//! │  │ 256 × RwLock<HashMap>      │  │  │ ValueCodec  ⇄  Bytes         │  │
//! │  │ FNV-1a routing, TTL,       │  │  │ DistributedTier (Redis, ...) │  │
//! │  │ admission cap              │  │  └─────────────────────────────┘  │
//! │  └────────────────────────────┘  │                                   │
//! │          ▲ janitor (interval + memory pressure)                      │
//! └──────────────────────────────────┴───────────────────────────────────┘
//! ```
//!
//! # Design Principles
//!
//! - Shards never contend with each other; each owns its lock
//! - L1 admission is bounded exactly by an atomic slot counter
//! - L2 is authoritative: a successful `set` means L2 holds the value
//! - Metrics and memory sampling are injected, never global

mod codec;
mod entry;
mod janitor;
mod l1;
mod l2;
mod manager;
mod memory;
mod metrics;
mod shard;
mod tier;

pub use codec::{JsonCodec, RawCodec, ValueCodec};
pub use entry::{CacheEntry, CacheLevel, LookupOutcome, MAX_TTL};
pub use l1::{L1Stats, ShardedCache};
pub use l2::{DistributedTier, InMemoryDistributedTier, L2BackendStats};
pub use manager::{TieredCacheManager, TieredCacheManagerBuilder, WarmupReport};
pub use memory::{MemoryProbe, MemoryUsage, ProcessMemoryProbe, StaticMemoryProbe};
pub use metrics::{CacheMetrics, MetricSample, MetricsSink, NoopMetrics, PrometheusMetrics};
pub use shard::{fnv1a_64, shard_index, Shard};
pub use tier::{CacheTier, L2Tier};

/// Default number of L1 shards
pub const SHARD_COUNT: usize = 256;

/// Default L1 admission limit
pub const DEFAULT_MAX_ENTRIES: usize = 100_000;

// =============================================================================
// Tests
// =============================================================================
