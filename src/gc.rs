//! Garbage collection: batched, id-range-scoped deletion of stale entries.
//!
//! Each batch deletes rows inside a fixed-size id range whose
//! `last_accessed_at` is older than the threshold, so the per-batch working
//! set stays predictable on a live table and operators can pace deletion with
//! an inter-batch sleep. Replaying a range is a no-op, which makes an
//! interrupted run restartable.

use std::time::Duration;

use chrono::Utc;

use crate::store::{CacheStore, StoreError};

pub const DEFAULT_BATCH_SIZE: i64 = 1000;

/// Parameters of one GC run.
#[derive(Debug, Clone)]
pub struct GcOptions {
    /// Entries whose last access is older than this are deleted.
    pub before: Duration,
    /// First row id considered (inclusive).
    pub start_id: i64,
    /// Row id bound (exclusive). `None` means `max_id() + 1` at run time.
    pub end_id: Option<i64>,
    /// Rows of id-space covered per DELETE statement.
    pub batch_size: i64,
    /// Pause between batches.
    pub sleep: Duration,
}

impl GcOptions {
    pub fn new(before: Duration) -> Self {
        Self {
            before,
            start_id: 1,
            end_id: None,
            batch_size: DEFAULT_BATCH_SIZE,
            sleep: Duration::ZERO,
        }
    }
}

/// Walk `[start_id, end_id)` in `batch_size` id-ranges, deleting stale rows.
/// Returns the total number of rows deleted.
pub async fn run(store: &dyn CacheStore, opts: &GcOptions) -> Result<u64, StoreError> {
    // Saturate absurd ages instead of overflowing the timestamp math.
    let age = chrono::Duration::from_std(opts.before)
        .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
    let threshold = Utc::now() - age;

    let end_id = match opts.end_id {
        Some(end) => end,
        None => store.max_id().await? + 1,
    };

    tracing::info!(
        start_id = opts.start_id,
        end_id,
        batch_size = opts.batch_size,
        threshold = %threshold,
        "Starting GC"
    );

    let mut cursor = opts.start_id;
    let mut total: u64 = 0;

    while cursor < end_id {
        let batch_end = (cursor + opts.batch_size).min(end_id);
        let batch_deleted = store.delete_batch(threshold, cursor, batch_end).await?;
        total += batch_deleted;

        tracing::info!(
            batch_deleted,
            total_deleted = total,
            threshold = %threshold,
            from_id = cursor,
            to_id = batch_end,
            "GC batch complete"
        );

        if !opts.sleep.is_zero() && batch_end < end_id {
            tokio::time::sleep(opts.sleep).await;
        }
        cursor = batch_end;
    }

    Ok(total)
}

/// Parse a duration written as `Nh`, `Nm`, `Ns`, or `Nd` (days = N x 24h).
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let (value, unit) = s.split_at(s.len().saturating_sub(1));
    let n: u64 = value
        .parse()
        .map_err(|_| format!("invalid duration {s:?}: expected <N>h, <N>m, <N>s, or <N>d"))?;
    let secs = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        "d" => n * 86400,
        _ => {
            return Err(format!(
                "invalid duration {s:?}: unknown unit {unit:?}, expected h, m, s, or d"
            ));
        }
    };
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use rusqlite::params;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("2d").unwrap(), Duration::from_secs(172_800));
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_malformed() {
        for bad in ["", "h", "10", "10x", "-5m", "1.5h", "m30", "30 m"] {
            assert!(parse_duration(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    /// Build a store with `n` rows (ids 1..=n), all freshly accessed.
    async fn seeded_store(n: usize) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.migrate().await.unwrap();
        for i in 0..n {
            store.put(&format!("h{i}"), "m", 0, "c").await.unwrap();
        }
        store
    }

    /// Push `last_accessed_at` for ids in `[from, to]` one hour into the past.
    fn backdate_ids(store: &SqliteStore, from: i64, to: i64) {
        let ts = (Utc::now() - chrono::Duration::hours(1))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE embeddings SET last_accessed_at = ?1 WHERE id >= ?2 AND id <= ?3",
                    params![ts, from, to],
                )
            })
            .unwrap();
    }

    fn row_count(store: &SqliteStore) -> i64 {
        store
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM embeddings", [], |r| r.get(0)))
            .unwrap()
    }

    fn surviving_ids(store: &SqliteStore) -> Vec<i64> {
        store
            .with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT id FROM embeddings ORDER BY id")?;
                let ids = stmt.query_map([], |r| r.get(0))?.collect::<Result<Vec<i64>, _>>()?;
                Ok(ids)
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_gc_range_scoping() {
        // Ten rows; the first five are an hour stale.
        let store = seeded_store(10).await;
        backdate_ids(&store, 1, 5);

        let mut opts = GcOptions::new(Duration::from_secs(1800));
        opts.start_id = 1;
        opts.end_id = Some(4);

        let deleted = run(&store, &opts).await.unwrap();
        assert_eq!(deleted, 3);

        // Rows 4 and 5 are stale but outside [1, 4); they survive.
        assert_eq!(surviving_ids(&store), vec![4, 5, 6, 7, 8, 9, 10]);
    }

    #[tokio::test]
    async fn test_gc_defaults_to_full_table() {
        let store = seeded_store(7).await;
        backdate_ids(&store, 1, 7);

        let opts = GcOptions::new(Duration::from_secs(1800));
        let deleted = run(&store, &opts).await.unwrap();
        assert_eq!(deleted, 7);
        assert_eq!(row_count(&store), 0);
    }

    #[tokio::test]
    async fn test_gc_spares_fresh_rows() {
        let store = seeded_store(5).await;
        backdate_ids(&store, 2, 3);

        let opts = GcOptions::new(Duration::from_secs(1800));
        let deleted = run(&store, &opts).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(surviving_ids(&store), vec![1, 4, 5]);
    }

    #[tokio::test]
    async fn test_gc_small_batches_cover_whole_range() {
        let store = seeded_store(10).await;
        backdate_ids(&store, 1, 10);

        let mut opts = GcOptions::new(Duration::from_secs(1800));
        opts.batch_size = 3;

        let deleted = run(&store, &opts).await.unwrap();
        assert_eq!(deleted, 10);
    }

    #[tokio::test]
    async fn test_gc_is_restartable() {
        let store = seeded_store(6).await;
        backdate_ids(&store, 1, 6);

        let opts = GcOptions::new(Duration::from_secs(1800));
        assert_eq!(run(&store, &opts).await.unwrap(), 6);
        // Replaying the same range deletes nothing further.
        assert_eq!(run(&store, &opts).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_gc_empty_table() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.migrate().await.unwrap();

        let opts = GcOptions::new(Duration::from_secs(60));
        assert_eq!(run(&store, &opts).await.unwrap(), 0);
    }
}
