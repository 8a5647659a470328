//! SQLite run ledger.

use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};

use crate::core::{
    PipelineResult, ProcessingState, RunLedger, RunLock, RunStatus, TaskRun, Tier,
    STALE_RUN_MESSAGE,
};
use crate::infra::store::{count_to_u64, SqliteStore};

const RUN_COLUMNS: &str =
    "run_id, task_name, tier, start_time, end_time, status, error_message";

/// Ledger backed by `pipeline_task_runs` and `pipeline_task_state`.
#[derive(Clone)]
pub struct SqliteLedger {
    store: SqliteStore,
}

impl SqliteLedger {
    /// Create a ledger over a shared store.
    pub const fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    fn map_run(row: &Row<'_>) -> rusqlite::Result<TaskRun> {
        let tier: String = row.get(2)?;
        let status: String = row.get(5)?;
        Ok(TaskRun {
            run_id: row.get(0)?,
            task_name: row.get(1)?,
            tier: tier
                .parse::<Tier>()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?,
            start_time_ms: row.get(3)?,
            end_time_ms: row.get(4)?,
            status: status
                .parse::<RunStatus>()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
            error_message: row.get(6)?,
        })
    }

    fn map_state(row: &Row<'_>) -> rusqlite::Result<ProcessingState> {
        Ok(ProcessingState {
            last_queue_id: row.get(0)?,
            processed_count: count_to_u64(row.get(1)?),
            failed_count: count_to_u64(row.get(2)?),
        })
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl RunLedger for SqliteLedger {
    fn begin_run(
        &self,
        task: &str,
        tier: Tier,
        now_ms: i64,
        staleness_ms: i64,
    ) -> PipelineResult<RunLock> {
        self.store.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let running = {
                let mut stmt = tx.prepare_cached(&format!(
                    "SELECT {RUN_COLUMNS} FROM pipeline_task_runs
                     WHERE task_name = ?1 AND status = 'running'
                     ORDER BY start_time DESC"
                ))?;
                let rows = stmt.query_map(params![task], Self::map_run)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };

            if let Some(live) = running.iter().find(|r| r.holds_lock(now_ms, staleness_ms)) {
                let live = live.clone();
                tx.commit()?;
                return Ok(RunLock::Held(live));
            }

            let mut reaped = 0;
            for stale in &running {
                reaped += tx.execute(
                    "UPDATE pipeline_task_runs
                     SET status = 'failed', end_time = ?1, error_message = ?2
                     WHERE run_id = ?3 AND status = 'running'",
                    params![now_ms, STALE_RUN_MESSAGE, stale.run_id],
                )?;
            }

            let run = TaskRun::start(task, tier, now_ms);
            tx.execute(
                "INSERT INTO pipeline_task_runs (run_id, task_name, tier, start_time, status)
                 VALUES (?1, ?2, ?3, ?4, 'running')",
                params![run.run_id, run.task_name, tier.as_str(), now_ms],
            )?;
            tx.commit()?;
            Ok(RunLock::Acquired { run, reaped })
        })
    }

    fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<&str>,
        now_ms: i64,
    ) -> PipelineResult<()> {
        let changed = self.store.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE pipeline_task_runs SET status = ?1, end_time = ?2, error_message = ?3
                 WHERE run_id = ?4 AND status = 'running'",
                params![status.as_str(), now_ms, error, run_id],
            )?;
            Ok(changed)
        })?;
        if changed == 0 {
            tracing::warn!(run_id, status = %status, "run was no longer running; history left as is");
        }
        Ok(())
    }

    fn load_state(&self, task: &str) -> PipelineResult<Option<ProcessingState>> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT last_queue_id, processed_count, failed_count
                 FROM pipeline_task_state WHERE task_name = ?1",
                params![task],
                Self::map_state,
            )
            .optional()
        })
    }

    fn save_state(&self, task: &str, state: &ProcessingState, now_ms: i64) -> PipelineResult<()> {
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pipeline_task_state
                     (task_name, last_queue_id, processed_count, failed_count, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(task_name) DO UPDATE SET
                     last_queue_id = max(pipeline_task_state.last_queue_id, excluded.last_queue_id),
                     processed_count = excluded.processed_count,
                     failed_count = excluded.failed_count,
                     updated_at = excluded.updated_at",
                params![
                    task,
                    state.last_queue_id,
                    to_i64(state.processed_count),
                    to_i64(state.failed_count),
                    now_ms
                ],
            )?;
            Ok(())
        })
    }

    fn clear_state(&self, task: &str) -> PipelineResult<()> {
        self.store.with_conn(|conn| {
            conn.execute(
                "DELETE FROM pipeline_task_state WHERE task_name = ?1",
                params![task],
            )?;
            Ok(())
        })
    }

    fn states(&self) -> PipelineResult<Vec<(String, ProcessingState)>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT task_name, last_queue_id, processed_count, failed_count
                 FROM pipeline_task_state ORDER BY task_name",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    ProcessingState {
                        last_queue_id: row.get(1)?,
                        processed_count: count_to_u64(row.get(2)?),
                        failed_count: count_to_u64(row.get(3)?),
                    },
                ))
            })?;
            let states = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(states)
        })
    }

    fn recent_runs(&self, task: Option<&str>, limit: usize) -> PipelineResult<Vec<TaskRun>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {RUN_COLUMNS} FROM pipeline_task_runs
                 WHERE ?1 IS NULL OR task_name = ?1
                 ORDER BY start_time DESC, rowid DESC
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![task, limit], Self::map_run)?;
            let runs = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(runs)
        })
    }

    fn prune_runs(&self, cutoff_ms: i64) -> PipelineResult<usize> {
        self.store.with_conn(|conn| {
            conn.execute(
                "DELETE FROM pipeline_task_runs WHERE status != 'running' AND start_time < ?1",
                params![cutoff_ms],
            )
        })
    }
}
