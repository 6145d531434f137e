//! Cache Configuration
//!
//! Runtime configuration for the L1 engine and the tier manager, plus a
//! serde-friendly [`CacheSettings`] form that can be loaded from YAML with
//! human-readable durations ("500ms", "30s", "5m", "1h", "1d").

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{DEFAULT_MAX_ENTRIES, SHARD_COUNT};
use crate::error::{Error, Result};

// =============================================================================
// L1 Configuration
// =============================================================================

/// Configuration for the sharded L1 cache
#[derive(Debug, Clone)]
pub struct ShardedCacheConfig {
    /// Maximum number of live entries admitted
    pub max_entries: usize,

    /// Interval between full expiry sweeps
    pub cleanup_interval: Duration,

    /// TTL applied by `set_default`
    pub default_ttl: Duration,

    /// Number of shards
    pub shard_count: usize,

    /// Fraction of the probe's reference size that triggers an out-of-cycle sweep
    pub memory_high_water: f64,

    /// How often the memory probe is consulted
    pub memory_check_interval: Duration,

    /// Threads used to fan a background sweep out over the shards
    pub sweep_workers: usize,
}

impl Default for ShardedCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            cleanup_interval: Duration::from_secs(60),
            default_ttl: Duration::from_secs(300),
            shard_count: SHARD_COUNT,
            memory_high_water: 0.80,
            memory_check_interval: Duration::from_secs(1),
            sweep_workers: 4,
        }
    }
}

impl ShardedCacheConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(Error::Validation("max_entries must be > 0".into()));
        }
        if self.cleanup_interval.is_zero() {
            return Err(Error::Validation("cleanup_interval must be > 0".into()));
        }
        if self.default_ttl.is_zero() {
            return Err(Error::Validation("default_ttl must be > 0".into()));
        }
        if self.shard_count == 0 {
            return Err(Error::Validation("shard_count must be > 0".into()));
        }
        if !(self.memory_high_water > 0.0 && self.memory_high_water <= 1.0) {
            return Err(Error::Validation(
                "memory_high_water must be in (0, 1]".into(),
            ));
        }
        if self.memory_check_interval.is_zero() {
            return Err(Error::Validation(
                "memory_check_interval must be > 0".into(),
            ));
        }
        if self.sweep_workers == 0 {
            return Err(Error::Validation("sweep_workers must be > 0".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Manager Configuration
// =============================================================================

/// Configuration for the tiered cache manager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// TTL used for every L1 write issued by the manager
    pub l1_ttl: Duration,

    /// Maximum keys warmed concurrently
    pub warmup_concurrency: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            l1_ttl: Duration::from_secs(60),
            warmup_concurrency: 32,
        }
    }
}

impl ManagerConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.l1_ttl.is_zero() {
            return Err(Error::Validation("l1_ttl must be > 0".into()));
        }
        if self.warmup_concurrency == 0 {
            return Err(Error::Validation("warmup_concurrency must be > 0".into()));
        }
        Ok(())
    }
}

// =============================================================================
// File Settings
// =============================================================================

/// Serializable settings, typically loaded from a YAML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    pub max_entries: usize,
    pub cleanup_interval: String,
    pub default_ttl: String,
    pub shard_count: usize,
    pub memory_high_water: f64,
    pub memory_check_interval: String,
    pub sweep_workers: usize,
    pub l1_ttl: String,
    pub warmup_concurrency: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            cleanup_interval: "60s".to_string(),
            default_ttl: "5m".to_string(),
            shard_count: SHARD_COUNT,
            memory_high_water: 0.80,
            memory_check_interval: "1s".to_string(),
            sweep_workers: 4,
            l1_ttl: "60s".to_string(),
            warmup_concurrency: 32,
        }
    }
}

impl CacheSettings {
    /// Parse settings from a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load settings from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    /// Build a validated L1 configuration
    pub fn sharded_cache_config(&self) -> Result<ShardedCacheConfig> {
        let config = ShardedCacheConfig {
            max_entries: self.max_entries,
            cleanup_interval: parse_duration(&self.cleanup_interval)?,
            default_ttl: parse_duration(&self.default_ttl)?,
            shard_count: self.shard_count,
            memory_high_water: self.memory_high_water,
            memory_check_interval: parse_duration(&self.memory_check_interval)?,
            sweep_workers: self.sweep_workers,
        };
        config.validate()?;
        Ok(config)
    }

    /// Build a validated manager configuration
    pub fn manager_config(&self) -> Result<ManagerConfig> {
        let config = ManagerConfig {
            l1_ttl: parse_duration(&self.l1_ttl)?,
            warmup_concurrency: self.warmup_concurrency,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Parse a duration string like "500ms", "30s", "5m", "1h", "1d" or "1h30m".
///
/// A trailing bare number is taken as seconds. Zero durations are rejected.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::DurationParse("empty duration string".to_string()));
    }

    let mut total_ms: u64 = 0;
    let mut num_buf = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            num_buf.push(c);
            continue;
        }

        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        num_buf.clear();

        let multiplier = match c {
            'm' | 'M' if chars.peek().is_some_and(|n| n.eq_ignore_ascii_case(&'s')) => {
                chars.next();
                1
            }
            'd' | 'D' => 86_400_000,
            'h' | 'H' => 3_600_000,
            'm' | 'M' => 60_000,
            's' | 'S' => 1_000,
            _ => {
                return Err(Error::DurationParse(format!(
                    "unknown duration unit: {}",
                    c
                )))
            }
        };

        total_ms = total_ms.saturating_add(num.saturating_mul(multiplier));
    }

    if !num_buf.is_empty() {
        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        total_ms = total_ms.saturating_add(num.saturating_mul(1_000));
    }

    if total_ms == 0 {
        return Err(Error::DurationParse(
            "duration must be greater than 0".to_string(),
        ));
    }

    Ok(Duration::from_millis(total_ms))
}
