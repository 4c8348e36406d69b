//! Server dialect: PostgreSQL via sqlx.
//!
//! Shares the numeric-placeholder statements from the parent module verbatim
//! (PostgreSQL is the dialect they are authored in). Timestamps are
//! `timestamptz`, bound as `chrono::DateTime<Utc>`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::{
    CacheStore, SQL_DELETE_BATCH, SQL_GET, SQL_MAX_ID, SQL_PUT, StoreError, StoreFuture,
};

const MAX_CONNECTIONS: u32 = 10;

const SCHEMA_TABLE: &str = "CREATE TABLE IF NOT EXISTS embeddings (
    id                BIGSERIAL PRIMARY KEY,
    input_hash        TEXT NOT NULL,
    model             TEXT NOT NULL,
    dimension         INTEGER NOT NULL DEFAULT 0,
    content           TEXT NOT NULL,
    created_at        TIMESTAMPTZ NOT NULL,
    last_accessed_at  TIMESTAMPTZ NOT NULL,
    UNIQUE (input_hash, model, dimension)
)";

const SCHEMA_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_embeddings_lookup
    ON embeddings (input_hash, model, dimension)";

/// Pooled PostgreSQL store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to the server named by a `postgres://` DSN.
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(dsn)
            .await?;
        Ok(Self { pool })
    }
}

impl CacheStore for PostgresStore {
    fn get<'a>(
        &'a self,
        hash: &'a str,
        model: &'a str,
        dimension: u32,
    ) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let content = sqlx::query_scalar::<_, String>(SQL_GET)
                .bind(Utc::now())
                .bind(hash)
                .bind(model)
                .bind(dimension as i32)
                .fetch_optional(&self.pool)
                .await?;
            Ok(content)
        })
    }

    fn put<'a>(
        &'a self,
        hash: &'a str,
        model: &'a str,
        dimension: u32,
        content: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let now = Utc::now();
            sqlx::query(SQL_PUT)
                .bind(hash)
                .bind(model)
                .bind(dimension as i32)
                .bind(content)
                .bind(now)
                .bind(now)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }

    fn delete_batch(
        &self,
        threshold: DateTime<Utc>,
        from_id: i64,
        to_id: i64,
    ) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let result = sqlx::query(SQL_DELETE_BATCH)
                .bind(from_id)
                .bind(to_id)
                .bind(threshold)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        })
    }

    fn max_id(&self) -> StoreFuture<'_, i64> {
        Box::pin(async move {
            let id = sqlx::query_scalar::<_, i64>(SQL_MAX_ID)
                .fetch_one(&self.pool)
                .await?;
            Ok(id)
        })
    }

    fn migrate(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(SCHEMA_TABLE).execute(&self.pool).await?;
            sqlx::query(SCHEMA_INDEX).execute(&self.pool).await?;
            Ok(())
        })
    }
}
