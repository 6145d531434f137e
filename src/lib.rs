//! tiercache - Two-Tier Key/Value Cache
//!
//! A sharded, TTL-bounded in-memory L1 in front of a shared distributed L2,
//! behind a single cancellable get/set/delete façade.
//!
//! # Architecture
//!
//! ```text
//! caller ──▶ TieredCacheManager ──▶ L1 ShardedCache (process memory)
//!                               └──▶ L2Tier ──▶ DistributedTier (Redis, ...)
//! ```
//!
//! # Modules
//!
//! - [`cache`] - L1 engine, L2 adapter, codecs, metrics and the manager
//! - [`config`] - Runtime configuration and YAML settings
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tiercache::cache::{InMemoryDistributedTier, JsonCodec, L2Tier, ShardedCache, TieredCacheManager};
//! use tiercache::config::{ManagerConfig, ShardedCacheConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> tiercache::Result<()> {
//! let l1 = Arc::new(ShardedCache::<String>::new(ShardedCacheConfig::default())?);
//! let l2 = Arc::new(L2Tier::new(Arc::new(InMemoryDistributedTier::new()), JsonCodec::<String>::new()));
//! let manager = TieredCacheManager::<String>::new(l1, l2, ManagerConfig::default())?;
//!
//! let cancel = CancellationToken::new();
//! manager.set(&cancel, "user:1", "ada".to_string(), Duration::from_secs(3600)).await?;
//! assert_eq!(manager.get(&cancel, "user:1").await?, "ada");
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use cache::{CacheLevel, ShardedCache, TieredCacheManager};
pub use config::{CacheSettings, ManagerConfig, ShardedCacheConfig};
pub use error::{Error, Result};
