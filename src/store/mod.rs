//! Cache persistence over two SQL dialects.
//!
//! One table, `embeddings`, keyed by the unique `(input_hash, model,
//! dimension)` triple. Statements are authored once with numeric `$N`
//! placeholders and rewritten to the dialect's form at preparation time. The
//! embedded dialect (rusqlite) serves filesystem paths, `:memory:`, and
//! `file:` URIs; the server dialect (sqlx/PostgreSQL) serves `postgres://`
//! DSNs.

pub mod postgres;
pub mod sqlite;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

/// Errors from the persistence layer. A missing row is never an error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),
}

/// Boxed future returned by [`CacheStore`] methods, so the trait stays
/// dyn-compatible without the `async_trait` macro.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Operations the request pipeline and the GC runner need from a backend.
///
/// All mutations are single-statement SQL; concurrency control is left
/// entirely to the backing engine.
pub trait CacheStore: Send + Sync {
    /// Look up the cached content for a key, bumping `last_accessed_at` in
    /// the same statement. `None` when no row exists.
    fn get<'a>(
        &'a self,
        hash: &'a str,
        model: &'a str,
        dimension: u32,
    ) -> StoreFuture<'a, Option<String>>;

    /// Upsert a vector under its key. On conflict the content is replaced and
    /// `last_accessed_at` bumped; `created_at` is preserved. Idempotent.
    fn put<'a>(
        &'a self,
        hash: &'a str,
        model: &'a str,
        dimension: u32,
        content: &'a str,
    ) -> StoreFuture<'a, ()>;

    /// Delete rows with `from_id <= id < to_id` whose `last_accessed_at` is
    /// older than `threshold`. Returns the number of rows deleted. One GC
    /// batch; the range walk lives in [`crate::gc`].
    fn delete_batch(
        &self,
        threshold: DateTime<Utc>,
        from_id: i64,
        to_id: i64,
    ) -> StoreFuture<'_, u64>;

    /// Current maximum row id, or 0 when the table is empty.
    fn max_id(&self) -> StoreFuture<'_, i64>;

    /// Create the table and index if absent. Safe to run repeatedly.
    fn migrate(&self) -> StoreFuture<'_, ()>;
}

// ---------------------------------------------------------------------------
// Shared SQL
// ---------------------------------------------------------------------------

pub(crate) const SQL_GET: &str = "UPDATE embeddings \
     SET last_accessed_at = $1 \
     WHERE input_hash = $2 AND model = $3 AND dimension = $4 \
     RETURNING content";

pub(crate) const SQL_PUT: &str = "INSERT INTO embeddings \
     (input_hash, model, dimension, content, created_at, last_accessed_at) \
     VALUES ($1, $2, $3, $4, $5, $6) \
     ON CONFLICT (input_hash, model, dimension) DO UPDATE SET \
       content = excluded.content, \
       last_accessed_at = excluded.last_accessed_at";

pub(crate) const SQL_DELETE_BATCH: &str = "DELETE FROM embeddings \
     WHERE id >= $1 AND id < $2 AND last_accessed_at < $3";

pub(crate) const SQL_MAX_ID: &str = "SELECT COALESCE(MAX(id), 0) FROM embeddings";

/// Rewrite `$N` placeholders to SQLite's `?N` form.
///
/// `$` never appears in our statements outside a placeholder, so a plain
/// character substitution is sufficient.
pub(crate) fn rewrite_placeholders(sql: &str) -> String {
    sql.replace('$', "?")
}

// ---------------------------------------------------------------------------
// DSN dispatch
// ---------------------------------------------------------------------------

/// The SQL dialect a DSN selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// `postgres://` and `postgresql://` URLs select the server dialect;
    /// everything else (path, `:memory:`, `file:` URI) is the embedded one.
    pub fn of(dsn: &str) -> Self {
        if dsn.starts_with("postgres://") || dsn.starts_with("postgresql://") {
            Self::Postgres
        } else {
            Self::Sqlite
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }
}

/// Open the store selected by the DSN. Does not run migrations.
pub async fn open(dsn: &str) -> Result<Arc<dyn CacheStore>, StoreError> {
    match Dialect::of(dsn) {
        Dialect::Postgres => Ok(Arc::new(PostgresStore::connect(dsn).await?)),
        Dialect::Sqlite => {
            let store = if dsn == ":memory:" {
                SqliteStore::open_in_memory()?
            } else {
                SqliteStore::open(dsn)?
            };
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_placeholders() {
        assert_eq!(
            rewrite_placeholders("SELECT a FROM t WHERE x = $1 AND y = $2"),
            "SELECT a FROM t WHERE x = ?1 AND y = ?2"
        );
        assert_eq!(rewrite_placeholders(SQL_MAX_ID), SQL_MAX_ID);
    }

    #[test]
    fn test_dialect_dispatch() {
        assert_eq!(Dialect::of("postgres://user@host/db"), Dialect::Postgres);
        assert_eq!(Dialect::of("postgresql://host/db"), Dialect::Postgres);
        assert_eq!(Dialect::of("cachembed.db"), Dialect::Sqlite);
        assert_eq!(Dialect::of(":memory:"), Dialect::Sqlite);
        assert_eq!(Dialect::of("file:cachembed.db?mode=rwc"), Dialect::Sqlite);
        assert_eq!(Dialect::of("/var/lib/cachembed/cache.db"), Dialect::Sqlite);
    }
}
