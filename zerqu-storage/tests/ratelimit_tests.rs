//! Integration tests for the fixed-window rate limiter
//!
//! Tests verify:
//! - Remaining units count down and stop at zero inside a window
//! - A new window opens once the old keys expire
//! - Windows for different prefixes are independent
//! - The limiter shares a store with entity caches without key clashes

use std::sync::Arc;
use std::time::Duration;

use zerqu_storage::{rate_limit_key, CacheStore, LmdbCacheStore, RateLimiter};
use zerqu_test_utils::fixtures::{self, CacheHarness};

const MINUTE: Duration = Duration::from_secs(60);

#[tokio::test]
async fn test_window_counts_down_then_blocks() {
    let harness = CacheHarness::new(fixtures::users(1));
    let limiter = harness.rate_limiter(fixtures::tight_rate_limit());

    let mut seen = Vec::new();
    for _ in 0..4 {
        let status = limiter.consume("ip:1", 3, MINUTE).await.unwrap();
        seen.push((status.remaining, status.is_exceeded()));
    }
    assert_eq!(seen, vec![(2, false), (1, false), (0, false), (0, true)]);
}

#[tokio::test]
async fn test_new_window_after_expiry() {
    let harness = CacheHarness::new(fixtures::users(1));
    let limiter = harness.rate_limiter(fixtures::tight_rate_limit());
    for _ in 0..4 {
        limiter.consume("ip:1", 3, MINUTE).await.unwrap();
    }

    harness.clock.advance(MINUTE);

    let status = limiter.consume("ip:1", 3, MINUTE).await.unwrap();
    assert_eq!(status.remaining, 2);
    assert_eq!(status.reset_in_secs, 60);
    assert!(!status.is_exceeded());
}

#[tokio::test]
async fn test_reset_countdown_within_window() {
    let harness = CacheHarness::new(fixtures::users(1));
    let limiter = harness.rate_limiter(fixtures::tight_rate_limit());

    limiter.consume("ip:1", 3, MINUTE).await.unwrap();
    harness.clock.advance(Duration::from_secs(25));
    let status = limiter.consume("ip:1", 3, MINUTE).await.unwrap();

    assert_eq!(status.remaining, 1);
    assert_eq!(status.reset_in_secs, 35);
    assert_eq!(
        harness.store.ttl_of("ip:1$c"),
        Some(Duration::from_secs(35))
    );
}

#[tokio::test]
async fn test_prefixes_are_independent() {
    let harness = CacheHarness::new(fixtures::users(1));
    let limiter = harness.rate_limiter(fixtures::tight_rate_limit());
    let alice = rate_limit_key("topics", "10.0.0.1");
    let bob = rate_limit_key("topics", "10.0.0.2");

    for _ in 0..4 {
        limiter.consume(&alice, 3, MINUTE).await.unwrap();
    }
    let status = limiter.consume(&bob, 3, MINUTE).await.unwrap();
    assert_eq!(status.remaining, 2);
    assert!(limiter.consume(&alice, 3, MINUTE).await.unwrap().is_exceeded());
}

#[tokio::test]
async fn test_default_limit_from_config() {
    let harness = CacheHarness::new(fixtures::users(1));
    let limiter = harness.rate_limiter(fixtures::tight_rate_limit());

    for _ in 0..3 {
        assert!(!limiter.consume_default("ip:9").await.unwrap().is_exceeded());
    }
    let blocked = limiter.consume_default("ip:9").await.unwrap();
    assert!(blocked.is_exceeded());
    assert_eq!(blocked.retry_after_secs(), Some(60));
}

#[tokio::test]
async fn test_limiter_and_cache_share_a_store() {
    let harness = CacheHarness::new(fixtures::users(2));
    let limiter = harness.rate_limiter(fixtures::tight_rate_limit());

    harness.cache.get_by_ids(&[1, 2]).await.unwrap();
    limiter.consume("ip:1", 3, MINUTE).await.unwrap();

    assert_eq!(harness.store.len(), 4);
    assert!(harness.store.get("db:get:zq_user:1").await.unwrap().is_some());
    assert!(harness.store.get("ip:1$c").await.unwrap().is_some());
}

#[tokio::test]
async fn test_limiter_on_lmdb_store() {
    let dir = tempfile::tempdir().unwrap();
    let clock = fixtures::manual_clock();
    let store = Arc::new(LmdbCacheStore::with_clock(dir.path(), 16, clock.clone()).unwrap());
    let limiter =
        RateLimiter::with_clock(store.clone(), clock.clone(), fixtures::tight_rate_limit());

    let mut remaining = Vec::new();
    for _ in 0..4 {
        remaining.push(limiter.consume("ip:1", 3, MINUTE).await.unwrap().remaining);
    }
    assert_eq!(remaining, vec![2, 1, 0, 0]);

    clock.advance(MINUTE);
    assert_eq!(limiter.consume("ip:1", 3, MINUTE).await.unwrap().remaining, 2);
    assert_eq!(store.get("ip:1$r").await.unwrap(), Some(b"1700000120".to_vec()));
}
