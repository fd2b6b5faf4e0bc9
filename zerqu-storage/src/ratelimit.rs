//! Fixed-window rate limiting on top of a [`CacheStore`].
//!
//! Each window is two keys sharing one expiry:
//!
//! - `<prefix>$c`: requests remaining in the window
//! - `<prefix>$r`: epoch second at which the window was due to reset
//!
//! The reset instant is fixed when the window opens; later calls only
//! decrement the counter. A window ends when its keys expire. Read-then-write
//! is not atomic, so concurrent callers may each spend the same unit; the
//! limit is approximate under contention.

use std::sync::Arc;
use std::time::Duration;

use zerqu_core::{RateLimitConfig, ZerquResult};

use crate::cache::clock::{Clock, SystemClock};
use crate::cache::traits::{decode_counter, encode_counter, CacheStore};

const COUNTER_SUFFIX: &str = "$c";
const RESET_SUFFIX: &str = "$r";

/// Build the prefix for a resource/caller pair, e.g. `"topics:10.0.0.1"`.
pub fn rate_limit_key(resource: &str, identifier: &str) -> String {
    format!("{}:{}", resource, identifier)
}

/// Result of consuming one unit from a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Units left. Reported as stored, so it may be zero or negative.
    pub remaining: i64,
    /// Seconds until the window's reset instant. Zero or negative once that
    /// instant has passed but the keys have not yet expired.
    pub reset_in_secs: i64,
    allowed: bool,
}

impl RateLimitStatus {
    /// Whether this request should be rejected.
    pub fn is_exceeded(&self) -> bool {
        !self.allowed
    }

    /// Seconds a rejected caller should wait, for a `Retry-After` header.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.is_exceeded().then(|| self.reset_in_secs.max(0) as u64)
    }
}

/// Fixed-window limiter.
pub struct RateLimiter<C: CacheStore + ?Sized> {
    store: Arc<C>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
}

impl<C: CacheStore + ?Sized> RateLimiter<C> {
    pub fn new(store: Arc<C>, config: RateLimitConfig) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), config)
    }

    pub fn with_clock(store: Arc<C>, clock: Arc<dyn Clock>, config: RateLimitConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Consume one unit with the configured default limit and window.
    pub async fn consume_default(&self, prefix: &str) -> ZerquResult<RateLimitStatus> {
        self.consume(prefix, self.config.default_limit, self.config.default_window)
            .await
    }

    /// Consume one unit from the window named by `prefix`.
    ///
    /// Store failures propagate; the caller decides whether to fail open.
    pub async fn consume(
        &self,
        prefix: &str,
        limit: i64,
        duration: Duration,
    ) -> ZerquResult<RateLimitStatus> {
        let window_secs = duration.as_secs().max(1) as i64;
        if !self.config.enabled {
            return Ok(RateLimitStatus {
                remaining: limit,
                reset_in_secs: window_secs,
                allowed: true,
            });
        }

        let counter_key = format!("{}{}", prefix, COUNTER_SUFFIX);
        let reset_key = format!("{}{}", prefix, RESET_SUFFIX);
        let keys = [counter_key.clone(), reset_key.clone()];
        let found = self.store.get_many(&keys).await?;

        let read = |key: &str| {
            found
                .get(key)
                .and_then(|value| value.as_deref())
                .and_then(decode_counter)
        };
        let now = self.clock.now_secs();

        let status = match (read(&counter_key), read(&reset_key)) {
            (Some(remaining), Some(reset_at)) => {
                let reset_in = reset_at - now;
                if remaining <= 0 && reset_in > 0 {
                    RateLimitStatus {
                        remaining,
                        reset_in_secs: reset_in,
                        allowed: false,
                    }
                } else {
                    let remaining = remaining - 1;
                    let ttl = Duration::from_secs(reset_in.max(1) as u64);
                    self.store
                        .set(&counter_key, encode_counter(remaining), ttl)
                        .await?;
                    RateLimitStatus {
                        remaining,
                        reset_in_secs: reset_in,
                        allowed: remaining >= 0,
                    }
                }
            }
            (counter, reset) => {
                if counter.is_some() || reset.is_some() {
                    tracing::debug!(prefix, "partial rate window, starting a new one");
                }
                let remaining = limit - 1;
                self.store
                    .set_many(
                        vec![
                            (counter_key, encode_counter(remaining)),
                            (reset_key, encode_counter(now + window_secs)),
                        ],
                        Duration::from_secs(window_secs as u64),
                    )
                    .await?;
                RateLimitStatus {
                    remaining,
                    reset_in_secs: window_secs,
                    allowed: remaining >= 0,
                }
            }
        };

        tracing::debug!(
            prefix,
            remaining = status.remaining,
            reset_in = status.reset_in_secs,
            exceeded = status.is_exceeded(),
            "rate limit consumed"
        );
        Ok(status)
    }
}

impl<C: CacheStore + ?Sized> std::fmt::Debug for RateLimiter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish()
    }
}
