//! Versioned schema migrations for the record tables.
//!
//! Each migration runs in its own transaction and is recorded in
//! `schema_version`; already applied versions are skipped.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

use crate::SqliteStoreError;

pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up_sql: &'static str,
}

pub fn get_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "posts and users tables",
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                content TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT NOT NULL,
                age INTEGER NOT NULL
            );
        "#,
    }]
}

fn current_version(conn: &rusqlite::Connection) -> Result<i32, SqliteStoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;
    let version: Option<i32> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(version.unwrap_or(0))
}

/// Apply all pending migrations. Returns the resulting schema version.
pub fn migrate(pool: &Pool<SqliteConnectionManager>) -> Result<i32, SqliteStoreError> {
    let mut conn = pool.get()?;
    let current = current_version(&conn)?;

    let mut version = current;
    for migration in get_migrations().into_iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.up_sql)
            .map_err(|source| SqliteStoreError::Migration { version: migration.version, source })?;
        tx.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            params![migration.version, service_api::now_ms()],
        )?;
        tx.commit()?;
        tracing::info!(version = migration.version, description = migration.description, "applied migration");
        version = migration.version;
    }
    Ok(version)
}
