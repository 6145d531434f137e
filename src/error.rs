//! Error types for the tiered cache

use thiserror::Error;

use crate::cache::CacheLevel;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the tiered cache
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Lookup Outcomes
    // =========================================================================
    /// Key is not present in any consulted tier
    #[error("key not found: {key}")]
    NotFound { key: String },

    /// Key was present but its TTL had elapsed
    #[error("key expired: {key}")]
    Expired { key: String },

    // =========================================================================
    // Admission / Validation
    // =========================================================================
    /// L1 is full and a sweep could not free a slot
    #[error("L1 capacity exceeded: {active} of {max_entries} entries in use")]
    CapacityExceeded { active: usize, max_entries: usize },

    /// Bad configuration value or TTL
    #[error("validation error: {0}")]
    Validation(String),

    // =========================================================================
    // Tier Errors
    // =========================================================================
    /// Requested tier is not registered with the manager
    #[error("cache tier {0} is not registered")]
    TierUnavailable(CacheLevel),

    /// The distributed tier failed
    #[error("{operation} on {level} failed: {source}")]
    UnderlyingTierFailure {
        operation: &'static str,
        level: CacheLevel,
        #[source]
        source: TierError,
    },

    /// Value could not be encoded or decoded at the L2 boundary
    #[error("codec error: {0}")]
    Codec(String),

    /// The caller's cancellation token fired
    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    /// One or more keys could not be warmed
    #[error("warmup failed for {} of {requested} keys: {}", .failures.len(), failed_keys(.failures))]
    Warmup {
        requested: usize,
        failures: Vec<(String, Error)>,
    },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Duration parse error
    #[error("failed to parse duration: {0}")]
    DurationParse(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the miss outcomes (`NotFound` and `Expired`)
    pub fn is_miss(&self) -> bool {
        matches!(self, Error::NotFound { .. } | Error::Expired { .. })
    }

    pub(crate) fn not_found(key: &str) -> Self {
        Error::NotFound {
            key: key.to_string(),
        }
    }
}

fn failed_keys(failures: &[(String, Error)]) -> String {
    failures
        .iter()
        .map(|(key, _)| key.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors reported by a distributed tier backend
#[derive(Error, Debug)]
pub enum TierError {
    /// The backend holds no value for the key
    #[error("key not found")]
    NotFound,

    /// Any other backend failure (connection, protocol, timeout)
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}
