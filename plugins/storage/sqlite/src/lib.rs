//! SQLite-backed record store.
//!
//! One `SqliteDatabase` owns the connection pool and the schema; each
//! entity gets a `SqliteStore<E>` view over its table. Queries are built
//! from `Entity::TABLE` / `Entity::FIELDS` and run on the blocking pool.

mod error;
pub mod migrations;

use std::marker::PhantomData;
use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Row, params_from_iter};
use serde::Serialize;
use serde_json::{Map, Value};

use service_api::{Entity, FieldType, RecordStore, StoreFuture};

pub use error::SqliteStoreError;

// ═══════════════════════════════════════════════════════════════
//  SqliteDatabase
// ═══════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct SqliteDatabase {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteDatabase {
    /// Open (or create) a database file and apply pending migrations.
    pub fn open(path: impl AsRef<Path>, pool_size: u32) -> Result<Self, SqliteStoreError> {
        let manager = SqliteConnectionManager::file(path.as_ref());
        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;
        Self::from_pool(pool)
    }

    /// Private in-memory database.
    ///
    /// Every connection to `:memory:` is a separate database, so the pool
    /// is capped at a single connection.
    pub fn in_memory() -> Result<Self, SqliteStoreError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        Self::from_pool(pool)
    }

    pub fn from_pool(pool: Pool<SqliteConnectionManager>) -> Result<Self, SqliteStoreError> {
        let version = migrations::migrate(&pool)?;
        tracing::debug!(schema_version = version, "sqlite database ready");
        Ok(Self { pool })
    }

    /// Store view over the table of `E`.
    pub fn store<E: Entity>(&self) -> SqliteStore<E> {
        SqliteStore { pool: self.pool.clone(), _entity: PhantomData }
    }
}

// ═══════════════════════════════════════════════════════════════
//  SqliteStore
// ═══════════════════════════════════════════════════════════════

pub struct SqliteStore<E: Entity> {
    pool: Pool<SqliteConnectionManager>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> SqliteStore<E> {
    async fn with_conn<T, F>(&self, f: F) -> Result<T, SqliteStoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, SqliteStoreError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await?
    }
}

fn column_list<E: Entity>() -> String {
    E::FIELDS.iter().map(|f| f.name).collect::<Vec<_>>().join(", ")
}

fn select_sql<E: Entity>() -> String {
    format!("SELECT id, {} FROM {}", column_list::<E>(), E::TABLE)
}

/// Column values of `value` in `E::FIELDS` order.
fn encode<E: Entity, T: Serialize>(value: &T) -> Result<Vec<SqlValue>, SqliteStoreError> {
    let json = serde_json::to_value(value).map_err(SqliteStoreError::Decode)?;
    E::FIELDS
        .iter()
        .map(|field| {
            let v = json.get(field.name);
            match field.ty {
                FieldType::Int => v
                    .and_then(Value::as_i64)
                    .map(SqlValue::Integer)
                    .ok_or(SqliteStoreError::Encode { field: field.name, expected: "integer" }),
                FieldType::String => v
                    .and_then(Value::as_str)
                    .map(|s| SqlValue::Text(s.to_string()))
                    .ok_or(SqliteStoreError::Encode { field: field.name, expected: "string" }),
            }
        })
        .collect()
}

fn decode_row<E: Entity>(row: &Row<'_>) -> rusqlite::Result<Map<String, Value>> {
    let mut map = Map::new();
    map.insert("id".into(), Value::from(row.get::<_, i64>(0)?));
    for (i, field) in E::FIELDS.iter().enumerate() {
        let value = match field.ty {
            FieldType::Int => Value::from(row.get::<_, i64>(i + 1)?),
            FieldType::String => Value::from(row.get::<_, String>(i + 1)?),
        };
        map.insert(field.name.into(), value);
    }
    Ok(map)
}

fn into_entity<E: Entity>(map: Map<String, Value>) -> Result<E, SqliteStoreError> {
    serde_json::from_value(Value::Object(map)).map_err(SqliteStoreError::Decode)
}

fn find_row<E: Entity>(conn: &Connection, id: i64) -> Result<Option<E>, SqliteStoreError> {
    let sql = format!("{} WHERE id = ?1", select_sql::<E>());
    conn.query_row(&sql, [id], decode_row::<E>)
        .optional()?
        .map(into_entity::<E>)
        .transpose()
}

impl<E: Entity> RecordStore<E> for SqliteStore<E> {
    fn find_many(&self) -> StoreFuture<'_, Vec<E>> {
        Box::pin(async move {
            let records = self
                .with_conn(|conn| {
                    let sql = format!("{} ORDER BY id", select_sql::<E>());
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt
                        .query_map([], decode_row::<E>)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows.into_iter().map(into_entity::<E>).collect()
                })
                .await?;
            Ok(records)
        })
    }

    fn find_unique(&self, id: i64) -> StoreFuture<'_, Option<E>> {
        Box::pin(async move { Ok(self.with_conn(move |conn| find_row::<E>(conn, id)).await?) })
    }

    fn create(&self, draft: E::Draft) -> StoreFuture<'_, E> {
        Box::pin(async move {
            let values = encode::<E, _>(&draft)?;
            let record = self
                .with_conn(move |conn| {
                    let placeholders = (1..=values.len())
                        .map(|i| format!("?{i}"))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let sql = format!(
                        "INSERT INTO {} ({}) VALUES ({placeholders})",
                        E::TABLE,
                        column_list::<E>(),
                    );
                    conn.execute(&sql, params_from_iter(values.iter()))?;
                    Ok(E::from_draft(conn.last_insert_rowid(), draft))
                })
                .await?;
            tracing::trace!(table = E::TABLE, id = record.id(), "inserted");
            Ok(record)
        })
    }

    fn update(&self, id: i64, patch: E::Patch) -> StoreFuture<'_, E> {
        Box::pin(async move {
            let record = self
                .with_conn(move |conn| {
                    let tx = conn.transaction()?;
                    let mut record = find_row::<E>(&tx, id)?
                        .ok_or(SqliteStoreError::NotFound { entity: E::TYPE_NAME, id })?;
                    record.apply(patch);

                    let values = encode::<E, _>(&record)?;
                    let assignments = E::FIELDS
                        .iter()
                        .enumerate()
                        .map(|(i, f)| format!("{} = ?{}", f.name, i + 1))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let sql = format!(
                        "UPDATE {} SET {assignments} WHERE id = ?{}",
                        E::TABLE,
                        values.len() + 1,
                    );
                    let params = values.into_iter().chain(std::iter::once(SqlValue::Integer(id)));
                    tx.execute(&sql, params_from_iter(params))?;
                    tx.commit()?;
                    Ok(record)
                })
                .await?;
            Ok(record)
        })
    }

    fn delete(&self, id: i64) -> StoreFuture<'_, E> {
        Box::pin(async move {
            let record = self
                .with_conn(move |conn| {
                    let tx = conn.transaction()?;
                    let record = find_row::<E>(&tx, id)?
                        .ok_or(SqliteStoreError::NotFound { entity: E::TYPE_NAME, id })?;
                    tx.execute(&format!("DELETE FROM {} WHERE id = ?1", E::TABLE), [id])?;
                    tx.commit()?;
                    Ok(record)
                })
                .await?;
            Ok(record)
        })
    }
}
