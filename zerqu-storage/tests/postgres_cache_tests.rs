#![cfg(feature = "db-tests")]
//! Database-backed tests for the entity cache over PostgreSQL.
//!
//! Requires a reachable database configured through the `ZERQU_DB_*`
//! environment variables. Run with `--features db-tests`.

use std::sync::Arc;

use chrono::Utc;
use zerqu_core::{CacheConfig, Filter, User};
use zerqu_storage::{
    CacheStore, DbConfig, EntityCache, EntityRepository, InMemoryCacheStore, Mutation,
    PgRepository,
};
use zerqu_test_utils::assertions::*;
use zerqu_test_utils::{fixtures, init_test_tracing};

const USER_DDL: &str = "
CREATE TABLE IF NOT EXISTS zq_user (
    id bigint PRIMARY KEY,
    username text NOT NULL,
    email text NOT NULL,
    description text,
    reputation bigint NOT NULL DEFAULT 0,
    created_at timestamptz NOT NULL
)";

type PgUserCache = EntityCache<User, PgRepository<User>, InMemoryCacheStore>;

/// Repository and cache wired with hooks, after making sure the table exists.
async fn setup() -> (Arc<PgRepository<User>>, Arc<PgUserCache>, Arc<InMemoryCacheStore>) {
    init_test_tracing();
    let config = DbConfig::from_env();
    let pool = config.create_pool().expect("Failed to create pool");
    pool.get()
        .await
        .expect("Failed to connect")
        .batch_execute(USER_DDL)
        .await
        .expect("Failed to create zq_user");

    let repo = Arc::new(PgRepository::new(pool));
    let store = Arc::new(InMemoryCacheStore::new());
    let cache = Arc::new(EntityCache::new(repo.clone(), store.clone(), CacheConfig::default()));
    repo.hooks().register(cache.clone());
    (repo, cache, store)
}

/// Ids unlikely to collide with other runs.
fn unique_ids(n: i64) -> Vec<i64> {
    let base = Utc::now().timestamp_micros();
    (0..n).map(|i| base + i).collect()
}

#[tokio::test]
async fn test_insert_then_cached_reads() {
    let (repo, cache, store) = setup().await;
    let ids = unique_ids(3);
    for id in &ids {
        let user = fixtures::user(*id, &format!("pg{}", id));
        repo.execute_mutation(Mutation::Insert(user)).await.unwrap();
    }

    let request = vec![ids[2], ids[0], ids[1]];
    let found = cache.get_by_ids(&request).await.unwrap();
    let order: Vec<i64> = found.iter().map(|u| u.id).collect();
    assert_eq!(order, request);

    let key = cache.codec().get_key::<User>(&ids[0]);
    assert!(store.get(&key).await.unwrap().is_some());

    let filter = Filter::new().eq("username", format!("pg{}", ids[1]));
    assert_eq!(cache.filter_count(&filter).await.unwrap(), 1);
    let first = cache.filter_first(&filter).await.unwrap();
    assert_eq!(first.map(|u| u.id), Some(ids[1]));

    for id in ids {
        repo.execute_mutation(Mutation::Delete(id)).await.unwrap();
    }
}

#[tokio::test]
async fn test_update_and_delete_through_hooks() {
    let (repo, cache, store) = setup().await;
    let id = unique_ids(1)[0];
    let user = fixtures::user(id, &format!("pg{}", id));
    repo.execute_mutation(Mutation::Insert(user.clone())).await.unwrap();
    cache.get_by_id(&id).await.unwrap();

    let mut changed = user.clone();
    changed.reputation = 7;
    let stored = repo.execute_mutation(Mutation::Update(changed.clone())).await.unwrap();
    assert_eq!(stored.reputation, 7);

    let key = cache.codec().get_key::<User>(&id);
    let cached = store.get(&key).await.unwrap();
    assert_cached_entity(cached.as_deref(), &stored);

    repo.execute_mutation(Mutation::Delete(id)).await.unwrap();
    assert!(store.get(&key).await.unwrap().is_none());
    assert_eq!(cache.get_by_id(&id).await.unwrap(), None);

    let missing = repo.execute_mutation(Mutation::Delete(id)).await;
    assert_not_found(&missing, "zq_user");
}

#[tokio::test]
async fn test_duplicate_insert_fails() {
    let (repo, _cache, _store) = setup().await;
    let id = unique_ids(1)[0];
    let user = fixtures::user(id, &format!("pg{}", id));
    repo.execute_mutation(Mutation::Insert(user.clone())).await.unwrap();

    let duplicate = repo.execute_mutation(Mutation::Insert(user)).await;
    assert_storage_error(&duplicate);
    assert_eq!(
        EntityRepository::<User>::filter_count(&*repo, &Filter::new().eq("id", id))
            .await
            .unwrap(),
        1
    );

    repo.execute_mutation(Mutation::Delete(id)).await.unwrap();
}
