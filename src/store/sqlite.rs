//! Embedded dialect: SQLite via rusqlite.
//!
//! A single connection behind a mutex, opened in WAL mode so one writer can
//! proceed alongside readers. Timestamps are stored as UTC text in a format
//! whose lexicographic order matches chronological order.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use super::{
    CacheStore, SQL_DELETE_BATCH, SQL_GET, SQL_MAX_ID, SQL_PUT, StoreError, StoreFuture,
    rewrite_placeholders,
};

/// Timestamp column format. `strftime`-compatible and ordering-safe.
const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn fmt_utc(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS embeddings (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    input_hash        TEXT NOT NULL,
    model             TEXT NOT NULL,
    dimension         INTEGER NOT NULL DEFAULT 0,
    content           TEXT NOT NULL,
    created_at        TEXT NOT NULL,
    last_accessed_at  TEXT NOT NULL,
    UNIQUE (input_hash, model, dimension)
);
CREATE INDEX IF NOT EXISTS idx_embeddings_lookup
    ON embeddings (input_hash, model, dimension);
"#;

/// Thread-safe handle wrapping one SQLite connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at the given path (or `file:` URI) with
    /// WAL mode enabled.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // WAL permits a writer concurrently with readers.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (`:memory:` DSN, tests).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Execute a closure with access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, rusqlite::Error>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self.conn.lock().expect("database mutex poisoned");
        f(&conn)
    }

    fn get_sync(&self, hash: &str, model: &str, dimension: u32) -> Result<Option<String>, StoreError> {
        let now = fmt_utc(Utc::now());
        let result = self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&rewrite_placeholders(SQL_GET))?;
            let content = stmt.query_row(
                params![now, hash, model, i64::from(dimension)],
                |row| row.get::<_, String>(0),
            );
            match content {
                Ok(c) => Ok(Some(c)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e),
            }
        })?;
        Ok(result)
    }

    fn put_sync(
        &self,
        hash: &str,
        model: &str,
        dimension: u32,
        content: &str,
    ) -> Result<(), StoreError> {
        let now = fmt_utc(Utc::now());
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&rewrite_placeholders(SQL_PUT))?;
            stmt.execute(params![
                hash,
                model,
                i64::from(dimension),
                content,
                now,
                now
            ])?;
            Ok(())
        })?;
        Ok(())
    }

    fn delete_batch_sync(
        &self,
        threshold: DateTime<Utc>,
        from_id: i64,
        to_id: i64,
    ) -> Result<u64, StoreError> {
        let threshold = fmt_utc(threshold);
        let deleted = self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&rewrite_placeholders(SQL_DELETE_BATCH))?;
            stmt.execute(params![from_id, to_id, threshold])
        })?;
        Ok(deleted as u64)
    }

    fn max_id_sync(&self) -> Result<i64, StoreError> {
        let id = self.with_conn(|conn| {
            conn.query_row(SQL_MAX_ID, [], |row| row.get::<_, i64>(0))
        })?;
        Ok(id)
    }

    fn migrate_sync(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| conn.execute_batch(SCHEMA))?;
        Ok(())
    }
}

impl CacheStore for SqliteStore {
    fn get<'a>(
        &'a self,
        hash: &'a str,
        model: &'a str,
        dimension: u32,
    ) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move { self.get_sync(hash, model, dimension) })
    }

    fn put<'a>(
        &'a self,
        hash: &'a str,
        model: &'a str,
        dimension: u32,
        content: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.put_sync(hash, model, dimension, content) })
    }

    fn delete_batch(
        &self,
        threshold: DateTime<Utc>,
        from_id: i64,
        to_id: i64,
    ) -> StoreFuture<'_, u64> {
        Box::pin(async move { self.delete_batch_sync(threshold, from_id, to_id) })
    }

    fn max_id(&self) -> StoreFuture<'_, i64> {
        Box::pin(async move { self.max_id_sync() })
    }

    fn migrate(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.migrate_sync() })
    }
}
