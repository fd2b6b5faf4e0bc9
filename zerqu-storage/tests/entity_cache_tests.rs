//! Integration tests for the entity cache
//!
//! Tests verify:
//! - Batch lookups keep the caller's order and hit the repository once
//! - Mutation hooks keep get and count entries fresh
//! - Filter entries live for their TTL and are never invalidated
//! - A store outage degrades to repository reads

use std::sync::atomic::Ordering;
use std::time::Duration;

use zerqu_core::{CacheConfig, CafeMember, Filter, MemberRole, User};
use zerqu_storage::{CacheKeyCodec, CacheStore};
use zerqu_test_utils::assertions::*;
use zerqu_test_utils::fixtures::{self, CacheHarness};
use zerqu_test_utils::init_test_tracing;

// ============================================================================
// BATCH LOOKUPS
// ============================================================================

#[tokio::test]
async fn test_get_by_ids_keeps_caller_order() {
    init_test_tracing();
    let harness = CacheHarness::new(fixtures::users(3));

    let found = harness.cache.get_by_ids(&[3, 1, 2]).await.unwrap();
    let ids: Vec<i64> = found.iter().map(|u| u.id).collect();
    assert_eq!(ids, vec![3, 1, 2]);
}

#[tokio::test]
async fn test_get_by_ids_fetches_only_misses_in_one_round_trip() {
    let harness = CacheHarness::new(fixtures::users(5));
    harness.cache.get_by_id(&2).await.unwrap();
    harness.cache.get_by_id(&4).await.unwrap();
    let before = harness.counting.calls().get.load(Ordering::SeqCst);

    let found = harness.cache.get_by_ids(&[1, 2, 3, 4, 5]).await.unwrap();
    assert_eq!(found.len(), 5);

    let calls = harness.counting.calls();
    assert_eq!(calls.get_many.load(Ordering::SeqCst), 1);
    assert_eq!(calls.get.load(Ordering::SeqCst), before);
    assert_eq!(
        harness.counting.get_many_batches(),
        vec![vec!["1".to_string(), "3".to_string(), "5".to_string()]]
    );

    // Everything is cached now; a second batch never reaches the repository.
    harness.cache.get_by_ids(&[5, 4, 3, 2, 1]).await.unwrap();
    assert_eq!(calls.get_many.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_get_by_ids_drops_unknown_ids() {
    let harness = CacheHarness::new(fixtures::users(2));

    let found = harness.cache.get_by_ids(&[2, 99, 1]).await.unwrap();
    let ids: Vec<i64> = found.iter().map(|u| u.id).collect();
    assert_eq!(ids, vec![2, 1]);

    let gaps = harness.cache.get_many_with_gaps(&[2, 99, 1]).await.unwrap();
    assert!(gaps[1].is_none());
    assert!(harness.store.get("db:get:zq_user:99").await.unwrap().is_none());
}

#[tokio::test]
async fn test_get_dict_keys_by_stringified_id() {
    let harness = CacheHarness::new(fixtures::users(2));

    let dict = harness.cache.get_dict(&[1, 7]).await.unwrap();
    assert_eq!(dict.len(), 2);
    assert_eq!(dict["1"], Some(fixtures::user(1, "user1")));
    assert_eq!(dict["7"], None);
}

#[tokio::test]
async fn test_composite_key_batches_are_rejected() {
    let harness = CacheHarness::new(vec![fixtures::member(1, 2, MemberRole::Member)]);

    let result = harness.cache.get_by_ids(&[(1, 2)]).await;
    assert_unsupported_key(&result, "zq_cafe_member");

    // Single lookups still work and use the joined suffix.
    let member: Option<CafeMember> = harness.cache.get_by_id(&(1, 2)).await.unwrap();
    assert!(member.is_some());
    assert!(harness
        .store
        .get("db:get:zq_cafe_member:1-2")
        .await
        .unwrap()
        .is_some());
}

// ============================================================================
// MUTATION HOOKS
// ============================================================================

#[tokio::test]
async fn test_update_refreshes_cached_entity() {
    let harness = CacheHarness::new(fixtures::users(1));
    harness.cache.get_by_id(&1).await.unwrap();

    let mut renamed = fixtures::user(1, "user1");
    renamed.description = Some("updated".to_string());
    harness.repository.update(renamed.clone()).await.unwrap();

    let cached = harness.store.get("db:get:zq_user:1").await.unwrap();
    assert_cached_entity(cached.as_deref(), &renamed);

    let reads_before = harness.counting.calls().get.load(Ordering::SeqCst);
    let found = harness.cache.get_by_id(&1).await.unwrap();
    assert_eq!(found, Some(renamed));
    assert_eq!(harness.counting.calls().get.load(Ordering::SeqCst), reads_before);
}

#[tokio::test]
async fn test_insert_bumps_warm_count() {
    let harness = CacheHarness::new(fixtures::users(3));
    assert_eq!(harness.cache.count().await.unwrap(), 3);

    harness
        .repository
        .insert(fixtures::user(4, "user4"))
        .await
        .unwrap();

    assert_eq!(harness.cache.count().await.unwrap(), 4);
    assert_eq!(harness.counting.calls().count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_insert_on_cold_count_starts_at_one() {
    let harness = CacheHarness::new(fixtures::users(3));

    harness
        .repository
        .insert(fixtures::user(4, "user4"))
        .await
        .unwrap();

    let cached = harness.store.get("db:count:zq_user:").await.unwrap();
    assert_cached_count(cached.as_deref(), 1);
    assert_eq!(
        harness.store.ttl_of("db:count:zq_user:"),
        Some(Duration::from_secs(86400))
    );
}

#[tokio::test]
async fn test_delete_forces_count_recompute() {
    let harness = CacheHarness::new(fixtures::users(3));
    assert_eq!(harness.cache.count().await.unwrap(), 3);
    harness.cache.get_by_id(&2).await.unwrap();

    harness.repository.delete(&2).await.unwrap();

    assert!(harness.store.get("db:get:zq_user:2").await.unwrap().is_none());
    assert!(harness.store.get("db:count:zq_user:").await.unwrap().is_none());
    assert_eq!(harness.cache.count().await.unwrap(), 2);
    assert_eq!(harness.counting.calls().count.load(Ordering::SeqCst), 2);
    assert_eq!(harness.cache.get_by_id(&2).await.unwrap(), None);
}

#[tokio::test]
async fn test_failed_mutations_leave_cache_alone() {
    let harness = CacheHarness::new(fixtures::users(1));
    assert_eq!(harness.cache.count().await.unwrap(), 1);

    let duplicate = harness.repository.insert(fixtures::user(1, "again")).await;
    assert_storage_error(&duplicate);
    let missing = harness.repository.delete(&42).await;
    assert_not_found(&missing, "zq_user");

    assert_eq!(harness.cache.count().await.unwrap(), 1);
}

// ============================================================================
// FILTER ENTRIES
// ============================================================================

#[tokio::test]
async fn test_filter_first_entry_expires_after_ttl() {
    let harness = CacheHarness::new(fixtures::users(2));
    let filter = Filter::new().eq("username", "user2");

    let found = harness.cache.filter_first(&filter).await.unwrap();
    assert_eq!(found.map(|u| u.id), Some(2));

    let key = "db:ff:zq_user:username$user2";
    assert_eq!(harness.store.ttl_of(key), Some(Duration::from_secs(300)));

    harness.clock.advance(Duration::from_secs(299));
    assert!(harness.store.get(key).await.unwrap().is_some());

    harness.clock.advance(Duration::from_secs(1));
    assert!(harness.store.get(key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_filter_entries_are_not_invalidated_by_updates() {
    let harness = CacheHarness::new(fixtures::users(2));
    let filter = Filter::new().eq("username", "user2");
    harness.cache.filter_first(&filter).await.unwrap();

    let mut changed = fixtures::user(2, "user2");
    changed.reputation = 50;
    harness.repository.update(changed.clone()).await.unwrap();

    // Still the stale row until the entry expires.
    let stale = harness.cache.filter_first(&filter).await.unwrap();
    assert_eq!(stale.map(|u| u.reputation), Some(0));

    harness.clock.advance(Duration::from_secs(300));
    let fresh = harness.cache.filter_first(&filter).await.unwrap();
    assert_eq!(fresh, Some(changed));
}

#[tokio::test]
async fn test_sorted_filters_share_an_entry() {
    let harness = CacheHarness::new(fixtures::users(3));
    let forward = Filter::new().eq("reputation", 0i64).eq("username", "user1");
    let reverse = Filter::new().eq("username", "user1").eq("reputation", 0i64);

    // Keys follow the caller's predicate order.
    assert_eq!(harness.cache.filter_count(&reverse).await.unwrap(), 1);
    assert_eq!(harness.cache.filter_count(&forward).await.unwrap(), 1);
    assert_eq!(
        harness.counting.calls().filter_count.load(Ordering::SeqCst),
        2
    );

    assert_eq!(harness.cache.filter_count(&reverse.sorted()).await.unwrap(), 1);
    assert_eq!(
        harness.counting.calls().filter_count.load(Ordering::SeqCst),
        2
    );
    assert!(harness
        .store
        .get("db:fc:zq_user:username$user1-reputation$0")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_empty_filter_count_is_count() {
    let harness = CacheHarness::new(fixtures::users(4));

    assert_eq!(harness.cache.filter_count(&Filter::new()).await.unwrap(), 4);
    let calls = harness.counting.calls();
    assert_eq!(calls.count.load(Ordering::SeqCst), 1);
    assert_eq!(calls.filter_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_null_predicate_key() {
    let harness = CacheHarness::new(fixtures::users(2));
    let filter = Filter::new().eq("description", None::<String>);

    assert_eq!(harness.cache.filter_count(&filter).await.unwrap(), 2);
    assert!(harness
        .store
        .get("db:fc:zq_user:description$~null")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_null_and_none_text_are_separate_entries() {
    let mut users = fixtures::users(3);
    users[0].description = Some("None".to_string());
    let harness = CacheHarness::new(users);

    let null = Filter::new().eq("description", None::<String>);
    let text = Filter::new().eq("description", "None");

    assert_eq!(harness.cache.filter_count(&null).await.unwrap(), 2);
    assert_eq!(harness.cache.filter_count(&text).await.unwrap(), 1);
    // Both warm: each is served from its own entry.
    assert_eq!(harness.cache.filter_count(&null).await.unwrap(), 2);
    assert_eq!(harness.cache.filter_count(&text).await.unwrap(), 1);
    assert_eq!(
        harness.counting.calls().filter_count.load(Ordering::SeqCst),
        2
    );

    let first = harness.cache.filter_first(&text).await.unwrap();
    assert_eq!(first.map(|u| u.id), Some(1));
    let first_null = harness.cache.filter_first(&null).await.unwrap();
    assert_eq!(first_null.map(|u| u.id), Some(2));
}

// ============================================================================
// CONFIGURATION AND FAILURE
// ============================================================================

#[tokio::test]
async fn test_custom_prefix_and_ttl() {
    let config = CacheConfig::default()
        .with_key_prefix("zq")
        .with_get_ttl(Duration::from_secs(60));
    let harness = CacheHarness::<User>::with_config(fixtures::users(1), config);

    harness.cache.get_by_id(&1).await.unwrap();
    assert_eq!(
        harness.store.ttl_of("zq:get:zq_user:1"),
        Some(Duration::from_secs(60))
    );
    assert_eq!(harness.cache.codec(), &CacheKeyCodec::new("zq"));
}

#[tokio::test]
async fn test_store_outage_serves_from_repository() {
    init_test_tracing();
    let harness = CacheHarness::new(fixtures::users(3));
    harness.store.set_available(false);

    assert_eq!(harness.cache.get_by_id(&1).await.unwrap().map(|u| u.id), Some(1));
    assert_eq!(harness.cache.get_by_ids(&[3, 2]).await.unwrap().len(), 2);
    assert_eq!(harness.cache.count().await.unwrap(), 3);

    // Hooks swallow the outage.
    harness
        .repository
        .insert(fixtures::user(4, "user4"))
        .await
        .unwrap();
    harness.repository.delete(&1).await.unwrap();

    harness.store.set_available(true);
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn test_repository_errors_propagate() {
    let harness = CacheHarness::new(fixtures::users(1));
    harness.counting.set_failing(true);

    assert_storage_error(&harness.cache.get_by_id(&1).await);
    assert_storage_error(&harness.cache.count().await);

    // Cached entries still answer without the repository.
    harness.counting.set_failing(false);
    harness.cache.get_by_id(&1).await.unwrap();
    harness.counting.set_failing(true);
    assert_ok(&harness.cache.get_by_id(&1).await);
}
