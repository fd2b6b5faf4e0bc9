//! Configuration Module
//!
//! Cache, rate limiting and LMDB settings. Values are loaded from environment
//! variables with defaults matching the forum's production settings.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const ONE_DAY: Duration = Duration::from_secs(86_400);
const FIVE_MINUTES: Duration = Duration::from_secs(300);

/// Lifetime class of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TtlClass {
    /// Primary-key lookups, refreshed by the update hook.
    Get,
    /// Unqualified row counts, adjusted by the insert/delete hooks.
    Count,
    /// Filter-first lookups. Cannot be invalidated precisely.
    FilterFirst,
    /// Filter-count lookups. Cannot be invalidated precisely.
    FilterCount,
}

// ============================================================================
// CACHE CONFIGURATION
// ============================================================================

/// Entity cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Leading segment of every entity cache key.
    pub key_prefix: String,
    pub get_ttl: Duration,
    pub count_ttl: Duration,
    pub filter_first_ttl: Duration,
    pub filter_count_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "db".to_string(),
            get_ttl: ONE_DAY,
            count_ttl: ONE_DAY,
            filter_first_ttl: FIVE_MINUTES,
            filter_count_ttl: FIVE_MINUTES,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from environment variables.
    ///
    /// - `ZERQU_CACHE_PREFIX` (default: `db`)
    /// - `ZERQU_CACHE_GET_TTL` seconds (default: 86400)
    /// - `ZERQU_CACHE_COUNT_TTL` seconds (default: 86400)
    /// - `ZERQU_CACHE_FF_TTL` seconds (default: 300)
    /// - `ZERQU_CACHE_FC_TTL` seconds (default: 300)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            key_prefix: std::env::var("ZERQU_CACHE_PREFIX").unwrap_or(defaults.key_prefix),
            get_ttl: env_secs("ZERQU_CACHE_GET_TTL", defaults.get_ttl)?,
            count_ttl: env_secs("ZERQU_CACHE_COUNT_TTL", defaults.count_ttl)?,
            filter_first_ttl: env_secs("ZERQU_CACHE_FF_TTL", defaults.filter_first_ttl)?,
            filter_count_ttl: env_secs("ZERQU_CACHE_FC_TTL", defaults.filter_count_ttl)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_get_ttl(mut self, ttl: Duration) -> Self {
        self.get_ttl = ttl;
        self
    }

    pub fn with_count_ttl(mut self, ttl: Duration) -> Self {
        self.count_ttl = ttl;
        self
    }

    pub fn with_filter_first_ttl(mut self, ttl: Duration) -> Self {
        self.filter_first_ttl = ttl;
        self
    }

    pub fn with_filter_count_ttl(mut self, ttl: Duration) -> Self {
        self.filter_count_ttl = ttl;
        self
    }

    /// TTL for the given entry class.
    pub fn ttl_for(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Get => self.get_ttl,
            TtlClass::Count => self.count_ttl,
            TtlClass::FilterFirst => self.filter_first_ttl,
            TtlClass::FilterCount => self.filter_count_ttl,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_prefix.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "key_prefix".to_string(),
            });
        }
        if self.key_prefix.contains(':') {
            return Err(ConfigError::InvalidValue {
                field: "key_prefix".to_string(),
                value: self.key_prefix.clone(),
                reason: "must not contain ':'".to_string(),
            });
        }
        for (field, ttl) in [
            ("get_ttl", self.get_ttl),
            ("count_ttl", self.count_ttl),
            ("filter_first_ttl", self.filter_first_ttl),
            ("filter_count_ttl", self.filter_count_ttl),
        ] {
            if ttl.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: "0".to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// RATE LIMITING CONFIGURATION
// ============================================================================

/// Fixed-window rate limit defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests allowed per window.
    pub default_limit: i64,
    pub default_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_limit: 600,
            default_window: FIVE_MINUTES,
        }
    }
}

impl RateLimitConfig {
    /// Load from environment variables.
    ///
    /// - `ZERQU_RATE_LIMIT_ENABLED`: "true" or "false" (default: true)
    /// - `ZERQU_RATE_LIMIT_COUNT`: requests per window (default: 600)
    /// - `ZERQU_RATE_LIMIT_WINDOW`: window length in seconds (default: 300)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let enabled = std::env::var("ZERQU_RATE_LIMIT_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(defaults.enabled);
        let default_limit = match std::env::var("ZERQU_RATE_LIMIT_COUNT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                field: "ZERQU_RATE_LIMIT_COUNT".to_string(),
                value: raw.clone(),
                reason: "must be an integer".to_string(),
            })?,
            Err(_) => defaults.default_limit,
        };
        let config = Self {
            enabled,
            default_limit,
            default_window: env_secs("ZERQU_RATE_LIMIT_WINDOW", defaults.default_window)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.default_window = window;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_limit <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "default_limit".to_string(),
                value: self.default_limit.to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.default_window.as_secs() == 0 {
            return Err(ConfigError::InvalidValue {
                field: "default_window".to_string(),
                value: format!("{:?}", self.default_window),
                reason: "must be at least one second".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// LMDB CONFIGURATION
// ============================================================================

/// Location and size of the LMDB cache environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmdbConfig {
    pub path: PathBuf,
    pub max_size_mb: usize,
}

impl Default for LmdbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/cache"),
            max_size_mb: 256,
        }
    }
}

impl LmdbConfig {
    /// Load from `ZERQU_LMDB_PATH` and `ZERQU_LMDB_MAX_SIZE_MB`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            path: std::env::var("ZERQU_LMDB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.path),
            max_size_mb: std::env::var("ZERQU_LMDB_MAX_SIZE_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size_mb),
        }
    }
}

fn env_secs(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidValue {
                field: name.to_string(),
                value: raw.clone(),
                reason: "must be a whole number of seconds".to_string(),
            }),
        Err(_) => Ok(default),
    }
}
