//! SQLite cache backend.

use rusqlite::{params, OptionalExtension};

use crate::core::{CacheEntry, CacheStore, PipelineResult};
use crate::infra::store::SqliteStore;

/// Cache rows in `pipeline_cache`, unique on `(key, group)`.
#[derive(Clone)]
pub struct SqliteCacheStore {
    store: SqliteStore,
}

impl SqliteCacheStore {
    /// Create a cache backend over a shared store.
    pub const fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    /// Number of physical rows, expired or not.
    pub fn row_count(&self) -> PipelineResult<usize> {
        self.store.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM pipeline_cache", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| usize::try_from(n).unwrap_or(0))
        })
    }
}

impl CacheStore for SqliteCacheStore {
    fn fetch(&self, key: &str, group: &str) -> PipelineResult<Option<CacheEntry>> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT cache_key, cache_group, value, created_at, expires_at
                 FROM pipeline_cache WHERE cache_key = ?1 AND cache_group = ?2",
                params![key, group],
                |row| {
                    Ok(CacheEntry {
                        key: row.get(0)?,
                        group: row.get(1)?,
                        value: row.get(2)?,
                        created_at_ms: row.get(3)?,
                        expires_at_ms: row.get(4)?,
                    })
                },
            )
            .optional()
        })
    }

    fn upsert(&self, entry: &CacheEntry) -> PipelineResult<()> {
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pipeline_cache (cache_key, cache_group, value, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(cache_key, cache_group) DO UPDATE SET
                     value = excluded.value,
                     created_at = excluded.created_at,
                     expires_at = excluded.expires_at",
                params![
                    entry.key,
                    entry.group,
                    entry.value,
                    entry.created_at_ms,
                    entry.expires_at_ms
                ],
            )?;
            Ok(())
        })
    }

    fn remove(&self, key: &str, group: &str) -> PipelineResult<bool> {
        self.store.with_conn(|conn| {
            conn.execute(
                "DELETE FROM pipeline_cache WHERE cache_key = ?1 AND cache_group = ?2",
                params![key, group],
            )
            .map(|n| n > 0)
        })
    }

    fn remove_group(&self, group: &str) -> PipelineResult<usize> {
        self.store.with_conn(|conn| {
            conn.execute(
                "DELETE FROM pipeline_cache WHERE cache_group = ?1",
                params![group],
            )
        })
    }

    fn remove_expired(&self, now_ms: i64) -> PipelineResult<usize> {
        self.store.with_conn(|conn| {
            conn.execute(
                "DELETE FROM pipeline_cache WHERE expires_at <= ?1",
                params![now_ms],
            )
        })
    }
}
