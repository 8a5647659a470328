//! SQLite event storage.

use rusqlite::params;

use crate::core::{EventSink, NewEvent, PipelineResult, StoredEvent};
use crate::infra::store::{count_to_u64, SqliteStore};

/// Event storage backed by `pipeline_events`.
#[derive(Clone)]
pub struct SqliteEventSink {
    store: SqliteStore,
}

impl SqliteEventSink {
    /// Create a sink over a shared store.
    pub const fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    /// Most recent events, newest first, optionally for one category.
    pub fn recent(&self, category: Option<&str>, limit: usize) -> PipelineResult<Vec<StoredEvent>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, queue_id, category, subcategory, payload, captured_at, processed_at
                 FROM pipeline_events
                 WHERE ?1 IS NULL OR category = ?1
                 ORDER BY id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![category, limit], |row| {
                let raw: String = row.get(4)?;
                let payload = serde_json::from_str(&raw).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        4,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;
                Ok(StoredEvent {
                    id: row.get(0)?,
                    queue_id: row.get(1)?,
                    category: row.get(2)?,
                    subcategory: row.get(3)?,
                    payload,
                    captured_at_ms: row.get(5)?,
                    processed_at_ms: row.get(6)?,
                })
            })?;
            let events = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(events)
        })
    }

    /// Number of stored events.
    pub fn count(&self) -> PipelineResult<u64> {
        self.store
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM pipeline_events", [], |row| {
                    row.get::<_, i64>(0)
                })
            })
            .map(count_to_u64)
    }
}

impl EventSink for SqliteEventSink {
    fn insert_event(&self, event: &NewEvent) -> PipelineResult<bool> {
        let payload = serde_json::to_string(&event.payload)?;
        self.store.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO pipeline_events
                     (queue_id, category, subcategory, payload, captured_at, processed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.queue_id,
                    event.category,
                    event.subcategory,
                    payload,
                    event.captured_at_ms,
                    event.processed_at_ms
                ],
            )?;
            Ok(inserted > 0)
        })
    }
}
