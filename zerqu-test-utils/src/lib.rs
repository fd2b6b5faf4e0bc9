//! zerqu Test Utilities
//!
//! Shared testing infrastructure for the zerqu workspace:
//! - Proptest generators for the forum records and filters
//! - Fixtures for common scenarios, including a fully wired cache
//! - A call-counting repository wrapper
//! - Assertions for zerqu-specific error shapes

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use zerqu_core::*;

// Re-export storage types commonly used in tests
pub use zerqu_storage::{
    CacheStore, EntityCache, EntityRepository, InMemoryCacheStore, ManualClock, MemoryRepository,
    RateLimiter,
};

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `warn`. Safe to call from every test.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// COUNTING REPOSITORY
// ============================================================================

/// Per-operation call counts recorded by [`CountingRepository`].
#[derive(Debug, Default)]
pub struct CallCounts {
    pub get: AtomicUsize,
    pub get_many: AtomicUsize,
    pub filter_first: AtomicUsize,
    pub filter_all: AtomicUsize,
    pub count: AtomicUsize,
    pub filter_count: AtomicUsize,
}

impl CallCounts {
    /// Total calls across every operation.
    pub fn total(&self) -> usize {
        [
            &self.get,
            &self.get_many,
            &self.filter_first,
            &self.filter_all,
            &self.count,
            &self.filter_count,
        ]
        .iter()
        .map(|counter| counter.load(Ordering::SeqCst))
        .sum()
    }
}

/// Wraps a repository and records how it is called.
///
/// Every batch passed to `get_many` is kept (as cache suffixes) so tests can
/// check exactly which ids reached the backing store. Setting the wrapper to
/// failing makes every query return `StorageError::QueryFailed`.
pub struct CountingRepository<R> {
    inner: Arc<R>,
    calls: CallCounts,
    batches: Mutex<Vec<Vec<String>>>,
    failing: AtomicBool,
}

impl<R> CountingRepository<R> {
    pub fn new(inner: Arc<R>) -> Self {
        Self {
            inner,
            calls: CallCounts::default(),
            batches: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &Arc<R> {
        &self.inner
    }

    pub fn calls(&self) -> &CallCounts {
        &self.calls
    }

    /// Id batches seen by `get_many`, oldest first.
    pub fn get_many_batches(&self) -> Vec<Vec<String>> {
        self.batches
            .lock()
            .map(|batches| batches.clone())
            .unwrap_or_default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn record(&self, counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn check<T: Entity>(&self) -> ZerquResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::QueryFailed {
                entity_type: T::TABLE,
                reason: "injected failure".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl<T, R> EntityRepository<T> for CountingRepository<R>
where
    T: Entity,
    R: EntityRepository<T>,
{
    async fn get(&self, id: &T::Id) -> ZerquResult<Option<T>> {
        self.record(&self.calls.get);
        self.check::<T>()?;
        self.inner.get(id).await
    }

    async fn get_many(&self, ids: &[T::Id]) -> ZerquResult<Vec<T>> {
        self.record(&self.calls.get_many);
        let batch: Vec<String> = ids.iter().map(<T::Id as PrimaryKey>::cache_suffix).collect();
        if let Ok(mut batches) = self.batches.lock() {
            batches.push(batch);
        }
        self.check::<T>()?;
        self.inner.get_many(ids).await
    }

    async fn filter_first(&self, filter: &Filter) -> ZerquResult<Option<T>> {
        self.record(&self.calls.filter_first);
        self.check::<T>()?;
        self.inner.filter_first(filter).await
    }

    async fn filter_all(&self, filter: &Filter) -> ZerquResult<Vec<T>> {
        self.record(&self.calls.filter_all);
        self.check::<T>()?;
        self.inner.filter_all(filter).await
    }

    async fn count(&self) -> ZerquResult<i64> {
        self.record(&self.calls.count);
        self.check::<T>()?;
        self.inner.count().await
    }

    async fn filter_count(&self, filter: &Filter) -> ZerquResult<i64> {
        self.record(&self.calls.filter_count);
        self.check::<T>()?;
        self.inner.filter_count(filter).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating zerqu entity types.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    // === Scalars ===

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    /// Generate a positive row id.
    pub fn arb_row_id() -> impl Strategy<Value = RowId> {
        1i64..1_000_000
    }

    /// Generate a Timestamp (DateTime<Utc>).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        // Generate timestamps within a reasonable range (2020-2030)
        (1577836800i64..1893456000i64)
            .prop_map(|secs| DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now))
    }

    pub fn arb_username() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{2,15}"
    }

    // === Enum Generators ===

    pub fn arb_cafe_status() -> impl Strategy<Value = CafeStatus> {
        prop_oneof![
            Just(CafeStatus::Closed),
            Just(CafeStatus::Active),
            Just(CafeStatus::Verified),
            Just(CafeStatus::Official),
        ]
    }

    pub fn arb_cafe_permission() -> impl Strategy<Value = CafePermission> {
        prop_oneof![
            Just(CafePermission::Public),
            Just(CafePermission::Subscriber),
            Just(CafePermission::Member),
        ]
    }

    pub fn arb_member_role() -> impl Strategy<Value = MemberRole> {
        prop_oneof![
            Just(MemberRole::Visitor),
            Just(MemberRole::Subscriber),
            Just(MemberRole::Member),
            Just(MemberRole::Admin),
        ]
    }

    /// Generate a scalar filter value.
    pub fn arb_field_value() -> impl Strategy<Value = FieldValue> {
        prop_oneof![
            any::<i64>().prop_map(FieldValue::Int),
            any::<bool>().prop_map(FieldValue::Bool),
            "[a-zA-Z0-9]{0,12}".prop_map(FieldValue::Text),
            Just(FieldValue::Null),
        ]
    }

    /// Generate a filter with arbitrary field names, in arbitrary order.
    pub fn arb_filter() -> impl Strategy<Value = Filter> {
        prop::collection::vec(("[a-z_]{1,10}", arb_field_value()), 0..4)
            .prop_map(|pairs| pairs.into_iter().collect())
    }

    /// Generate a filter over `zq_user` columns with distinct fields.
    pub fn arb_user_filter() -> impl Strategy<Value = Filter> {
        (
            prop::option::of(arb_username()),
            prop::option::of(0i64..1000),
            prop::option::of(prop::option::of("[a-z ]{1,20}")),
        )
            .prop_map(|(username, reputation, description)| {
                let mut filter = Filter::new();
                if let Some(username) = username {
                    filter = filter.eq("username", username);
                }
                if let Some(reputation) = reputation {
                    filter = filter.eq("reputation", reputation);
                }
                if let Some(description) = description {
                    filter = filter.eq("description", description);
                }
                filter
            })
    }

    // === Record Generators ===

    /// Generate a User struct.
    pub fn arb_user() -> impl Strategy<Value = User> {
        (
            arb_row_id(),
            arb_username(),
            prop::option::of("[a-zA-Z0-9 ]{1,80}"),
            0i64..10_000,
            arb_timestamp(),
        )
            .prop_map(|(id, username, description, reputation, created_at)| User {
                id,
                email: format!("{}@example.com", username),
                username,
                description,
                reputation,
                created_at,
            })
    }

    /// Generate users with pairwise distinct ids.
    pub fn arb_users(max: usize) -> impl Strategy<Value = Vec<User>> {
        prop::collection::btree_map(arb_row_id(), arb_user(), 0..=max).prop_map(|users| {
            users
                .into_iter()
                .map(|(id, user)| User { id, ..user })
                .collect()
        })
    }

    /// Generate a Cafe struct.
    pub fn arb_cafe() -> impl Strategy<Value = Cafe> {
        (
            arb_row_id(),
            "[a-z]{3,12}",
            arb_cafe_permission(),
            arb_cafe_status(),
            arb_row_id(),
            arb_timestamp(),
        )
            .prop_map(|(id, slug, permission, status, user_id, created_at)| Cafe {
                id,
                name: slug.to_uppercase(),
                content: format!("About {}", slug),
                slug,
                permission,
                status,
                user_id,
                created_at,
                updated_at: created_at,
            })
    }

    /// Generate a Topic struct.
    pub fn arb_topic() -> impl Strategy<Value = Topic> {
        (
            arb_row_id(),
            arb_row_id(),
            arb_row_id(),
            "[a-zA-Z0-9 ]{1,60}",
            "[a-zA-Z0-9 .]{0,200}",
            arb_timestamp(),
        )
            .prop_map(|(id, cafe_id, user_id, title, content, created_at)| Topic {
                id,
                cafe_id,
                user_id,
                title,
                content,
                created_at,
                updated_at: created_at,
            })
    }

    /// Generate a CafeMember struct.
    pub fn arb_cafe_member() -> impl Strategy<Value = CafeMember> {
        (arb_row_id(), arb_row_id(), arb_member_role(), arb_timestamp()).prop_map(
            |(cafe_id, user_id, role, created_at)| CafeMember {
                cafe_id,
                user_id,
                role,
                created_at,
            },
        )
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use std::time::Duration;

    /// Fixed start instant for manual clocks (2023-11-14T22:13:20Z).
    pub const EPOCH_SECS: i64 = 1_700_000_000;

    pub fn epoch() -> Timestamp {
        DateTime::from_timestamp(EPOCH_SECS, 0).unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// A manual clock parked at [`EPOCH_SECS`].
    pub fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::starting_at(epoch()))
    }

    /// Create a test User.
    pub fn user(id: RowId, username: &str) -> User {
        User {
            id,
            username: username.to_string(),
            email: format!("{}@example.com", username),
            description: None,
            reputation: 0,
            created_at: epoch(),
        }
    }

    /// Users `1..=n` named `user1`, `user2`, ...
    pub fn users(n: RowId) -> Vec<User> {
        (1..=n).map(|id| user(id, &format!("user{}", id))).collect()
    }

    /// Create a test Cafe owned by `user_id`.
    pub fn cafe(id: RowId, slug: &str, user_id: RowId) -> Cafe {
        Cafe {
            id,
            name: slug.to_uppercase(),
            slug: slug.to_string(),
            content: String::new(),
            permission: CafePermission::Public,
            status: CafeStatus::Active,
            user_id,
            created_at: epoch(),
            updated_at: epoch(),
        }
    }

    /// Create a test Topic.
    pub fn topic(id: RowId, cafe_id: RowId, user_id: RowId) -> Topic {
        Topic {
            id,
            cafe_id,
            user_id,
            title: format!("Topic {}", id),
            content: "Hello".to_string(),
            created_at: epoch(),
            updated_at: epoch(),
        }
    }

    /// Create a test CafeMember.
    pub fn member(cafe_id: RowId, user_id: RowId, role: MemberRole) -> CafeMember {
        CafeMember {
            cafe_id,
            user_id,
            role,
            created_at: epoch(),
        }
    }

    /// Rate limit settings matching the usual test window: 3 per minute.
    pub fn tight_rate_limit() -> RateLimitConfig {
        RateLimitConfig::default()
            .with_limit(3)
            .with_window(Duration::from_secs(60))
    }

    /// The cache type wired by [`CacheHarness`].
    pub type HarnessCache<T> =
        EntityCache<T, CountingRepository<MemoryRepository<T>>, InMemoryCacheStore>;

    /// An entity cache wired to an in-memory repository and store, both
    /// driven by one manual clock, with mutation hooks registered.
    pub struct CacheHarness<T: Entity> {
        pub clock: Arc<ManualClock>,
        pub store: Arc<InMemoryCacheStore>,
        pub repository: Arc<MemoryRepository<T>>,
        pub counting: Arc<CountingRepository<MemoryRepository<T>>>,
        pub cache: Arc<HarnessCache<T>>,
    }

    impl<T: Entity> CacheHarness<T> {
        pub fn new(rows: Vec<T>) -> Self {
            Self::with_config(rows, CacheConfig::default())
        }

        pub fn with_config(rows: Vec<T>, config: CacheConfig) -> Self {
            let clock = manual_clock();
            let store = Arc::new(InMemoryCacheStore::with_clock(clock.clone()));
            let repository = Arc::new(MemoryRepository::with_rows(rows));
            let counting = Arc::new(CountingRepository::new(repository.clone()));
            let cache = Arc::new(EntityCache::new(counting.clone(), store.clone(), config));
            repository.hooks().register(cache.clone());
            Self {
                clock,
                store,
                repository,
                counting,
                cache,
            }
        }

        /// A rate limiter sharing this harness's store and clock.
        pub fn rate_limiter(&self, config: RateLimitConfig) -> RateLimiter<InMemoryCacheStore> {
            RateLimiter::with_clock(self.store.clone(), self.clock.clone(), config)
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for zerqu-specific results.

    use super::*;

    /// Assert that a ZerquResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &ZerquResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a ZerquResult is Err.
    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &ZerquResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    /// Assert that a ZerquResult failed because the cache store was unreachable.
    #[track_caller]
    pub fn assert_store_unavailable<T: std::fmt::Debug>(result: &ZerquResult<T>) {
        match result {
            Err(err) if err.is_store_unavailable() => {}
            other => panic!("Expected StoreUnavailable, got: {:?}", other),
        }
    }

    /// Assert an UnsupportedKey error for the given table.
    #[track_caller]
    pub fn assert_unsupported_key<T: std::fmt::Debug>(result: &ZerquResult<T>, table: &str) {
        match result {
            Err(ZerquError::Cache(CacheError::UnsupportedKey { entity_type, .. })) => {
                assert_eq!(*entity_type, table, "Wrong table in UnsupportedKey error");
            }
            other => panic!("Expected UnsupportedKey for {}, got: {:?}", table, other),
        }
    }

    /// Assert a NotFound storage error for the given table.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &ZerquResult<T>, table: &str) {
        match result {
            Err(ZerquError::Storage(StorageError::NotFound { entity_type, .. })) => {
                assert_eq!(*entity_type, table, "Wrong table in NotFound error");
            }
            other => panic!("Expected NotFound for {}, got: {:?}", table, other),
        }
    }

    /// Assert a Storage error of any kind.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &ZerquResult<T>) {
        match result {
            Err(ZerquError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that `bytes` is the cached JSON encoding of `expected`.
    #[track_caller]
    pub fn assert_cached_entity<T: Entity + PartialEq + std::fmt::Debug>(
        bytes: Option<&[u8]>,
        expected: &T,
    ) {
        let bytes = bytes.unwrap_or_else(|| panic!("Expected cached {}, found nothing", T::TABLE));
        let decoded: T = serde_json::from_slice(bytes)
            .unwrap_or_else(|err| panic!("Cached {} does not decode: {}", T::TABLE, err));
        assert_eq!(&decoded, expected);
    }

    /// Assert that `bytes` is a cached counter holding `expected`.
    #[track_caller]
    pub fn assert_cached_count(bytes: Option<&[u8]>, expected: i64) {
        let value = bytes.and_then(zerqu_storage::cache::decode_counter);
        assert_eq!(value, Some(expected), "Unexpected cached count");
    }
}
