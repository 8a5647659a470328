//! SQLite queue backend.

use rusqlite::types::Type;
use rusqlite::{params, Row};

use crate::core::{NewQueueItem, PipelineResult, QueueBackend, QueueItem, QueueStatus};
use crate::infra::store::{count_to_u64, SqliteStore};

/// Queue backed by the `pipeline_queue` table.
#[derive(Clone)]
pub struct SqliteQueue {
    store: SqliteStore,
}

impl SqliteQueue {
    /// Create a queue over a shared store.
    pub const fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<QueueItem> {
        let status: String = row.get(5)?;
        let status = status
            .parse::<QueueStatus>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
        Ok(QueueItem {
            id: row.get(0)?,
            category: row.get(1)?,
            subcategory: row.get(2)?,
            payload: row.get(3)?,
            created_at_ms: row.get(4)?,
            status,
        })
    }
}

impl QueueBackend for SqliteQueue {
    fn insert(&self, item: &NewQueueItem) -> PipelineResult<i64> {
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pipeline_queue (category, subcategory, payload, created_at, status)
                 VALUES (?1, ?2, ?3, ?4, 'pending')",
                params![item.category, item.subcategory, item.payload, item.created_at_ms],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn fetch_after(
        &self,
        cursor: i64,
        limit: usize,
        status: QueueStatus,
    ) -> PipelineResult<Vec<QueueItem>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, category, subcategory, payload, created_at, status
                 FROM pipeline_queue
                 WHERE status = ?1 AND id > ?2
                 ORDER BY id ASC
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![status.as_str(), cursor, limit], Self::map_row)?;
            let items = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(items)
        })
    }

    fn update_status_batch(
        &self,
        ids: &[i64],
        status: QueueStatus,
        now_ms: i64,
    ) -> PipelineResult<usize> {
        self.store.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut updated = 0;
            {
                let mut stmt = tx.prepare_cached(
                    "UPDATE pipeline_queue SET status = ?1, processed_at = ?2
                     WHERE id = ?3 AND status = 'pending'",
                )?;
                for id in ids {
                    updated += stmt.execute(params![status.as_str(), now_ms, id])?;
                }
            }
            tx.commit()?;
            Ok(updated)
        })
    }

    fn update_status(&self, id: i64, status: QueueStatus, now_ms: i64) -> PipelineResult<bool> {
        self.store.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE pipeline_queue SET status = ?1, processed_at = ?2
                 WHERE id = ?3 AND status = 'pending'",
                params![status.as_str(), now_ms, id],
            )?;
            Ok(changed > 0)
        })
    }

    fn delete_older_than(&self, status: QueueStatus, cutoff_ms: i64) -> PipelineResult<usize> {
        self.store.with_conn(|conn| {
            conn.execute(
                "DELETE FROM pipeline_queue WHERE status = ?1 AND created_at < ?2",
                params![status.as_str(), cutoff_ms],
            )
        })
    }

    fn count(&self, status: QueueStatus) -> PipelineResult<u64> {
        self.store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM pipeline_queue WHERE status = ?1",
                    params![status.as_str()],
                    |row| row.get::<_, i64>(0),
                )
            })
            .map(count_to_u64)
    }
}
