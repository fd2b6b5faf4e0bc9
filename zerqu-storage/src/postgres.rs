//! PostgreSQL repository.
//!
//! Rows travel as JSON: reads select `row_to_json(t.*)` and decode with serde,
//! writes bind the serialized entity as one `json` parameter and expand it
//! with `json_populate_record`. Entity types describe their columns through
//! [`PgEntity`]; every identifier that reaches SQL text is validated first.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;
use uuid::Uuid;
use zerqu_core::{
    CacheError, Cafe, CafeMember, CafePermission, CafeStatus, ConfigError, Entity, FieldValue,
    Filter, MemberRole, PrimaryKey, StorageError, Topic, User, ZerquError, ZerquResult,
};

use crate::cache::hooks::HookRegistry;
use crate::repository::EntityRepository;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("Invalid identifier regex"));

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait for a free connection before failing
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "zerqu".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Read `ZERQU_DB_HOST`, `ZERQU_DB_PORT`, `ZERQU_DB_NAME`, `ZERQU_DB_USER`,
    /// `ZERQU_DB_PASSWORD`, `ZERQU_DB_POOL_SIZE` and `ZERQU_DB_TIMEOUT`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("ZERQU_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("ZERQU_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("ZERQU_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("ZERQU_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("ZERQU_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("ZERQU_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: std::env::var("ZERQU_DB_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ZerquResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls).map_err(|e| {
            ZerquError::Config(ConfigError::InvalidValue {
                field: "db".to_string(),
                value: format!("{}:{}/{}", self.host, self.port, self.dbname),
                reason: format!("failed to create pool: {}", e),
            })
        })
    }
}

// ============================================================================
// SQL PARAMETERS
// ============================================================================

/// Owned SQL parameter with the cast it is bound under.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Long(i64),
    Text(String),
    Bool(bool),
    Uuid(Uuid),
    Json(JsonValue),
    LongArray(Vec<i64>),
    TextArray(Vec<String>),
    UuidArray(Vec<Uuid>),
}

impl SqlParam {
    /// Convert to a reference usable with tokio_postgres.
    pub fn as_to_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            SqlParam::Long(v) => v,
            SqlParam::Text(v) => v,
            SqlParam::Bool(v) => v,
            SqlParam::Uuid(v) => v,
            SqlParam::Json(v) => v,
            SqlParam::LongArray(v) => v,
            SqlParam::TextArray(v) => v,
            SqlParam::UuidArray(v) => v,
        }
    }

    /// Postgres type the placeholder is cast to.
    pub fn cast(&self) -> &'static str {
        match self {
            SqlParam::Long(_) => "bigint",
            SqlParam::Text(_) => "text",
            SqlParam::Bool(_) => "boolean",
            SqlParam::Uuid(_) => "uuid",
            SqlParam::Json(_) => "json",
            SqlParam::LongArray(_) => "bigint[]",
            SqlParam::TextArray(_) => "text[]",
            SqlParam::UuidArray(_) => "uuid[]",
        }
    }
}

/// Primary key types that can be bound as SQL parameters.
pub trait PgKey: PrimaryKey {
    /// One parameter per key column, in column order.
    fn sql_params(&self) -> Vec<SqlParam>;

    /// A single array parameter for `= ANY(...)`, or `None` for composite keys.
    fn sql_array(ids: &[Self]) -> Option<SqlParam>;
}

macro_rules! impl_pg_key_int {
    ($($ty:ty),*) => {
        $(
            impl PgKey for $ty {
                fn sql_params(&self) -> Vec<SqlParam> {
                    vec![SqlParam::Long(i64::from(*self))]
                }

                fn sql_array(ids: &[Self]) -> Option<SqlParam> {
                    Some(SqlParam::LongArray(ids.iter().map(|id| i64::from(*id)).collect()))
                }
            }
        )*
    };
}

impl_pg_key_int!(i32, i64, u32);

impl PgKey for String {
    fn sql_params(&self) -> Vec<SqlParam> {
        vec![SqlParam::Text(self.clone())]
    }

    fn sql_array(ids: &[Self]) -> Option<SqlParam> {
        Some(SqlParam::TextArray(ids.to_vec()))
    }
}

impl PgKey for Uuid {
    fn sql_params(&self) -> Vec<SqlParam> {
        vec![SqlParam::Uuid(*self)]
    }

    fn sql_array(ids: &[Self]) -> Option<SqlParam> {
        Some(SqlParam::UuidArray(ids.to_vec()))
    }
}

impl<A: PgKey, B: PgKey> PgKey for (A, B) {
    fn sql_params(&self) -> Vec<SqlParam> {
        let mut params = self.0.sql_params();
        params.extend(self.1.sql_params());
        params
    }

    fn sql_array(_ids: &[Self]) -> Option<SqlParam> {
        None
    }
}

fn field_param(value: &FieldValue) -> Option<SqlParam> {
    match value {
        FieldValue::Int(v) => Some(SqlParam::Long(*v)),
        FieldValue::Text(v) => Some(SqlParam::Text(v.clone())),
        FieldValue::Bool(v) => Some(SqlParam::Bool(*v)),
        FieldValue::Null => None,
    }
}

// ============================================================================
// ENTITY MAPPING
// ============================================================================

/// An entity stored in a PostgreSQL table of the same name.
pub trait PgEntity: Entity {
    /// Every column, in table order.
    const COLUMNS: &'static [&'static str];

    /// Row as JSON, shaped like the table.
    fn to_row(&self) -> Result<JsonValue, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Decode a `row_to_json` value.
    fn from_row(row: JsonValue) -> Result<Self, serde_json::Error> {
        serde_json::from_value(row)
    }
}

/// Rewrite one column of a JSON row in place.
fn recode_column(
    row: &mut JsonValue,
    column: &str,
    f: impl FnOnce(&JsonValue) -> Option<JsonValue>,
) -> Result<(), serde_json::Error> {
    use serde::de::Error;
    let slot = row
        .get_mut(column)
        .ok_or_else(|| serde_json::Error::custom(format!("missing column {}", column)))?;
    *slot = f(slot).ok_or_else(|| {
        serde_json::Error::custom(format!("unrecognised value in column {}", column))
    })?;
    Ok(())
}

fn enum_to_code<E: serde::de::DeserializeOwned>(
    value: &JsonValue,
    code: fn(E) -> i64,
) -> Option<JsonValue> {
    let parsed: E = serde_json::from_value(value.clone()).ok()?;
    Some(JsonValue::from(code(parsed)))
}

fn code_to_enum<E: serde::Serialize>(
    value: &JsonValue,
    from_code: fn(i64) -> Option<E>,
) -> Option<JsonValue> {
    let parsed = from_code(value.as_i64()?)?;
    serde_json::to_value(parsed).ok()
}

impl PgEntity for User {
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "username",
        "email",
        "description",
        "reputation",
        "created_at",
    ];
}

impl PgEntity for Topic {
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "cafe_id",
        "user_id",
        "title",
        "content",
        "created_at",
        "updated_at",
    ];
}

impl PgEntity for Cafe {
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "name",
        "slug",
        "content",
        "permission",
        "status",
        "user_id",
        "created_at",
        "updated_at",
    ];

    fn to_row(&self) -> Result<JsonValue, serde_json::Error> {
        let mut row = serde_json::to_value(self)?;
        recode_column(&mut row, "permission", |v| enum_to_code(v, CafePermission::code))?;
        recode_column(&mut row, "status", |v| enum_to_code(v, CafeStatus::code))?;
        Ok(row)
    }

    fn from_row(mut row: JsonValue) -> Result<Self, serde_json::Error> {
        recode_column(&mut row, "permission", |v| code_to_enum(v, CafePermission::from_code))?;
        recode_column(&mut row, "status", |v| code_to_enum(v, CafeStatus::from_code))?;
        serde_json::from_value(row)
    }
}

impl PgEntity for CafeMember {
    const COLUMNS: &'static [&'static str] = &["cafe_id", "user_id", "role", "created_at"];

    fn to_row(&self) -> Result<JsonValue, serde_json::Error> {
        let mut row = serde_json::to_value(self)?;
        recode_column(&mut row, "role", |v| enum_to_code(v, MemberRole::code))?;
        Ok(row)
    }

    fn from_row(mut row: JsonValue) -> Result<Self, serde_json::Error> {
        recode_column(&mut row, "role", |v| code_to_enum(v, MemberRole::from_code))?;
        serde_json::from_value(row)
    }
}

// ============================================================================
// QUERY BUILDING
// ============================================================================

/// A statement and its parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Statement {
    fn bind(&mut self, param: SqlParam) -> String {
        let placeholder = format!("${}::{}", self.params.len() + 1, param.cast());
        self.params.push(param);
        placeholder
    }

    fn param_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.iter().map(SqlParam::as_to_sql).collect()
    }
}

fn check_identifier(entity_type: &'static str, ident: &str) -> ZerquResult<()> {
    if IDENTIFIER.is_match(ident) {
        Ok(())
    } else {
        Err(StorageError::QueryFailed {
            entity_type,
            reason: format!("invalid identifier {:?}", ident),
        }
        .into())
    }
}

/// Builds statements for one entity type.
struct QueryBuilder<T: PgEntity> {
    _entity: std::marker::PhantomData<fn() -> T>,
}

impl<T: PgEntity> QueryBuilder<T>
where
    T::Id: PgKey,
{
    fn validate() -> ZerquResult<()> {
        check_identifier(T::TABLE, T::TABLE)?;
        for column in T::PRIMARY_KEY.iter().chain(T::COLUMNS) {
            check_identifier(T::TABLE, column)?;
        }
        Ok(())
    }

    fn key_clause(stmt: &mut Statement, id: &T::Id) -> String {
        T::PRIMARY_KEY
            .iter()
            .zip(id.sql_params())
            .map(|(column, param)| format!("t.{} = {}", column, stmt.bind(param)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn filter_clause(stmt: &mut Statement, filter: &Filter) -> ZerquResult<String> {
        if filter.is_empty() {
            return Ok("TRUE".to_string());
        }
        let mut parts = Vec::with_capacity(filter.len());
        for (field, value) in filter.iter() {
            check_identifier(T::TABLE, field)?;
            parts.push(match field_param(value) {
                Some(param) => format!("t.{} = {}", field, stmt.bind(param)),
                None => format!("t.{} IS NULL", field),
            });
        }
        Ok(parts.join(" AND "))
    }

    fn order_by() -> String {
        T::PRIMARY_KEY
            .iter()
            .map(|column| format!("t.{}", column))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn select_by_key(id: &T::Id) -> ZerquResult<Statement> {
        Self::validate()?;
        let mut stmt = Statement::default();
        let clause = Self::key_clause(&mut stmt, id);
        stmt.sql = format!("SELECT row_to_json(t.*) FROM {} AS t WHERE {}", T::TABLE, clause);
        Ok(stmt)
    }

    fn select_by_keys(ids: &[T::Id]) -> ZerquResult<Statement> {
        Self::validate()?;
        let array = <T::Id as PgKey>::sql_array(ids).ok_or(CacheError::UnsupportedKey {
            entity_type: T::TABLE,
            operation: "get_many",
        })?;
        let mut stmt = Statement::default();
        let placeholder = stmt.bind(array);
        stmt.sql = format!(
            "SELECT row_to_json(t.*) FROM {} AS t WHERE t.{} = ANY({})",
            T::TABLE,
            T::PRIMARY_KEY[0],
            placeholder
        );
        Ok(stmt)
    }

    fn select_filtered(filter: &Filter, limit_one: bool) -> ZerquResult<Statement> {
        Self::validate()?;
        let mut stmt = Statement::default();
        let clause = Self::filter_clause(&mut stmt, filter)?;
        stmt.sql = format!(
            "SELECT row_to_json(t.*) FROM {} AS t WHERE {} ORDER BY {}{}",
            T::TABLE,
            clause,
            Self::order_by(),
            if limit_one { " LIMIT 1" } else { "" }
        );
        Ok(stmt)
    }

    fn count_filtered(filter: &Filter) -> ZerquResult<Statement> {
        Self::validate()?;
        let mut stmt = Statement::default();
        let clause = Self::filter_clause(&mut stmt, filter)?;
        stmt.sql = format!("SELECT count(*) FROM {} AS t WHERE {}", T::TABLE, clause);
        Ok(stmt)
    }

    fn insert(entity: &T) -> ZerquResult<Statement> {
        Self::validate()?;
        let mut stmt = Statement::default();
        let row = stmt.bind(SqlParam::Json(Self::encode(entity)?));
        let columns = T::COLUMNS.join(", ");
        stmt.sql = format!(
            "INSERT INTO {table} AS t ({columns}) SELECT {columns} FROM json_populate_record(NULL::{table}, {row}) RETURNING row_to_json(t.*)",
            table = T::TABLE,
            columns = columns,
            row = row
        );
        Ok(stmt)
    }

    fn update(entity: &T) -> ZerquResult<Statement> {
        Self::validate()?;
        let mut stmt = Statement::default();
        let row = stmt.bind(SqlParam::Json(Self::encode(entity)?));
        let clause = Self::key_clause(&mut stmt, &entity.primary_key());
        let columns = T::COLUMNS.join(", ");
        stmt.sql = format!(
            "UPDATE {table} AS t SET ({columns}) = (SELECT {columns} FROM json_populate_record(NULL::{table}, {row})) WHERE {clause} RETURNING row_to_json(t.*)",
            table = T::TABLE,
            columns = columns,
            row = row,
            clause = clause
        );
        Ok(stmt)
    }

    fn delete(id: &T::Id) -> ZerquResult<Statement> {
        Self::validate()?;
        let mut stmt = Statement::default();
        let clause = Self::key_clause(&mut stmt, id);
        stmt.sql = format!(
            "DELETE FROM {} AS t WHERE {} RETURNING row_to_json(t.*)",
            T::TABLE,
            clause
        );
        Ok(stmt)
    }

    fn encode(entity: &T) -> ZerquResult<JsonValue> {
        entity.to_row().map_err(|e| {
            StorageError::InsertFailed {
                entity_type: T::TABLE,
                reason: format!("failed to encode row: {}", e),
            }
            .into()
        })
    }
}

// ============================================================================
// REPOSITORY
// ============================================================================

/// A committed write.
#[derive(Debug, Clone)]
pub enum Mutation<T: Entity> {
    Insert(T),
    Update(T),
    Delete(T::Id),
}

/// Repository over a deadpool-postgres pool.
pub struct PgRepository<T: PgEntity> {
    pool: Pool,
    hooks: HookRegistry<T>,
}

impl<T: PgEntity> PgRepository<T>
where
    T::Id: PgKey,
{
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            hooks: HookRegistry::new(),
        }
    }

    /// Create a repository from configuration.
    pub fn from_config(config: &DbConfig) -> ZerquResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// The hooks fired after each committed mutation.
    pub fn hooks(&self) -> &HookRegistry<T> {
        &self.hooks
    }

    /// Run one write and notify the hooks once it has committed.
    ///
    /// Returns the row as stored. Updating or deleting a missing row fails
    /// with `StorageError::NotFound`.
    pub async fn execute_mutation(&self, mutation: Mutation<T>) -> ZerquResult<T> {
        let (stmt, kind) = match &mutation {
            Mutation::Insert(entity) => (QueryBuilder::<T>::insert(entity)?, "insert"),
            Mutation::Update(entity) => (QueryBuilder::<T>::update(entity)?, "update"),
            Mutation::Delete(id) => (QueryBuilder::<T>::delete(id)?, "delete"),
        };

        let row = self.query_opt(&stmt).await.map_err(|e| {
            let reason = match e {
                ZerquError::Storage(StorageError::QueryFailed { reason, .. }) => reason,
                other => return other,
            };
            match &mutation {
                Mutation::Insert(_) => ZerquError::Storage(StorageError::InsertFailed {
                    entity_type: T::TABLE,
                    reason,
                }),
                Mutation::Update(entity) => ZerquError::Storage(StorageError::UpdateFailed {
                    entity_type: T::TABLE,
                    id: entity.primary_key().cache_suffix(),
                    reason,
                }),
                Mutation::Delete(_) => ZerquError::Storage(StorageError::QueryFailed {
                    entity_type: T::TABLE,
                    reason,
                }),
            }
        })?;

        let stored = match row {
            Some(stored) => stored,
            None => {
                let id = match &mutation {
                    Mutation::Insert(entity) | Mutation::Update(entity) => {
                        entity.primary_key().cache_suffix()
                    }
                    Mutation::Delete(id) => id.cache_suffix(),
                };
                return Err(StorageError::NotFound {
                    entity_type: T::TABLE,
                    id,
                }
                .into());
            }
        };

        tracing::debug!(table = T::TABLE, operation = kind, "mutation committed");
        match mutation {
            Mutation::Insert(_) => self.hooks.fire_inserted(&stored).await,
            Mutation::Update(_) => self.hooks.fire_updated(&stored).await,
            Mutation::Delete(_) => self.hooks.fire_deleted(&stored).await,
        }
        Ok(stored)
    }

    async fn conn(&self) -> ZerquResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            StorageError::QueryFailed {
                entity_type: T::TABLE,
                reason: format!("connection pool: {}", e),
            }
            .into()
        })
    }

    fn query_err(e: tokio_postgres::Error) -> ZerquError {
        StorageError::QueryFailed {
            entity_type: T::TABLE,
            reason: e.to_string(),
        }
        .into()
    }

    fn decode(row: &tokio_postgres::Row) -> ZerquResult<T> {
        let json: JsonValue = row.try_get(0).map_err(Self::query_err)?;
        T::from_row(json).map_err(|e| {
            StorageError::QueryFailed {
                entity_type: T::TABLE,
                reason: format!("failed to decode row: {}", e),
            }
            .into()
        })
    }

    async fn query_opt(&self, stmt: &Statement) -> ZerquResult<Option<T>> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(stmt.sql.as_str(), &stmt.param_refs())
            .await
            .map_err(Self::query_err)?;
        row.as_ref().map(Self::decode).transpose()
    }

    async fn query_all(&self, stmt: &Statement) -> ZerquResult<Vec<T>> {
        let conn = self.conn().await?;
        let rows = conn
            .query(stmt.sql.as_str(), &stmt.param_refs())
            .await
            .map_err(Self::query_err)?;
        rows.iter().map(Self::decode).collect()
    }

    async fn query_count(&self, stmt: &Statement) -> ZerquResult<i64> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(stmt.sql.as_str(), &stmt.param_refs())
            .await
            .map_err(Self::query_err)?;
        row.try_get(0).map_err(Self::query_err)
    }
}

impl<T: PgEntity> std::fmt::Debug for PgRepository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgRepository")
            .field("table", &T::TABLE)
            .field("pool_size", &self.pool.status().size)
            .finish()
    }
}

#[async_trait]
impl<T: PgEntity> EntityRepository<T> for PgRepository<T>
where
    T::Id: PgKey,
{
    async fn get(&self, id: &T::Id) -> ZerquResult<Option<T>> {
        let stmt = QueryBuilder::<T>::select_by_key(id)?;
        self.query_opt(&stmt).await
    }

    async fn get_many(&self, ids: &[T::Id]) -> ZerquResult<Vec<T>> {
        let stmt = QueryBuilder::<T>::select_by_keys(ids)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.query_all(&stmt).await
    }

    async fn filter_first(&self, filter: &Filter) -> ZerquResult<Option<T>> {
        let stmt = QueryBuilder::<T>::select_filtered(filter, true)?;
        self.query_opt(&stmt).await
    }

    async fn filter_all(&self, filter: &Filter) -> ZerquResult<Vec<T>> {
        let stmt = QueryBuilder::<T>::select_filtered(filter, false)?;
        self.query_all(&stmt).await
    }

    async fn count(&self) -> ZerquResult<i64> {
        let stmt = QueryBuilder::<T>::count_filtered(&Filter::new())?;
        self.query_count(&stmt).await
    }

    async fn filter_count(&self, filter: &Filter) -> ZerquResult<i64> {
        let stmt = QueryBuilder::<T>::count_filtered(filter)?;
        self.query_count(&stmt).await
    }
}
