//! Shared SQLite store.
//!
//! Queue items, task runs, per-task cursors, cache entries and stored events
//! all live in one database so the pipeline only needs a single writable file.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::core::{PipelineError, PipelineResult};

const MIGRATIONS: &[&str] = &[
    r"
CREATE TABLE IF NOT EXISTS pipeline_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category TEXT NOT NULL,
    subcategory TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    processed_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_pipeline_queue_status_id ON pipeline_queue (status, id);
CREATE INDEX IF NOT EXISTS idx_pipeline_queue_status_created ON pipeline_queue (status, created_at);
",
    r"
CREATE TABLE IF NOT EXISTS pipeline_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue_id INTEGER NOT NULL UNIQUE,
    category TEXT NOT NULL,
    subcategory TEXT NOT NULL,
    payload TEXT NOT NULL,
    captured_at INTEGER NOT NULL,
    processed_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pipeline_events_category ON pipeline_events (category, captured_at);
",
    r"
CREATE TABLE IF NOT EXISTS pipeline_task_runs (
    run_id TEXT PRIMARY KEY,
    task_name TEXT NOT NULL,
    tier TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    status TEXT NOT NULL,
    error_message TEXT
);
CREATE INDEX IF NOT EXISTS idx_pipeline_task_runs_task ON pipeline_task_runs (task_name, status, start_time);
CREATE TABLE IF NOT EXISTS pipeline_task_state (
    task_name TEXT PRIMARY KEY,
    last_queue_id INTEGER NOT NULL,
    processed_count INTEGER NOT NULL,
    failed_count INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
",
    r"
CREATE TABLE IF NOT EXISTS pipeline_cache (
    cache_key TEXT NOT NULL,
    cache_group TEXT NOT NULL,
    value TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    PRIMARY KEY (cache_key, cache_group)
);
CREATE INDEX IF NOT EXISTS idx_pipeline_cache_expires ON pipeline_cache (expires_at);
",
];

/// Handle to the shared SQLite connection. Cloning shares the connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    schema_version: i32,
}

impl SqliteStore {
    /// Open (or create) a database file and apply pending migrations.
    pub fn open(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> PipelineResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> PipelineResult<Self> {
        let schema_version = Self::migrate(&mut conn)?;
        tracing::debug!(schema_version, "pipeline store ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            schema_version,
        })
    }

    fn migrate(conn: &mut Connection) -> PipelineResult<i32> {
        let current: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        let target = i32::try_from(MIGRATIONS.len())
            .map_err(|_| PipelineError::Storage("too many migrations".into()))?;
        if current > target {
            return Err(PipelineError::Storage(format!(
                "database schema version {current} is newer than supported {target}"
            )));
        }

        let tx = conn.transaction()?;
        for (index, sql) in MIGRATIONS.iter().enumerate().skip(usize::try_from(current).unwrap_or(0)) {
            tracing::info!(version = index + 1, "applying pipeline migration");
            tx.execute_batch(sql)?;
        }
        tx.execute_batch(&format!("PRAGMA user_version = {target}"))?;
        tx.commit()?;
        Ok(target)
    }

    /// Migration statements, in order.
    pub fn migrations() -> &'static [&'static str] {
        MIGRATIONS
    }

    /// Schema version read when the store was opened.
    pub const fn schema_version(&self) -> i32 {
        self.schema_version
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<T, F>(&self, f: F) -> PipelineResult<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T>,
    {
        let mut conn = self.conn.lock();
        f(&mut conn).map_err(PipelineError::from)
    }
}

/// Convert a row count to `usize`/`u64`-friendly form.
pub(crate) fn count_to_u64(count: i64) -> u64 {
    u64::try_from(count).unwrap_or(0)
}
