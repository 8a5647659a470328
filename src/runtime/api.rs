//! API-facing status models.

use serde::{Deserialize, Serialize};

use crate::builders::Pipeline;
use crate::core::{PipelineResult, ProcessingState, QueueStats, RunLedger, TaskInfo, TaskRun};

/// Runs included in a status report.
const RECENT_RUNS: usize = 20;

/// Saved cursor of a suspended task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCursor {
    /// Task name.
    pub task: String,
    /// Saved state.
    pub state: ProcessingState,
}

/// Snapshot of the pipeline for dashboards and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatus {
    /// Queue counts by status.
    pub queue: QueueStats,
    /// Events in permanent storage.
    pub stored_events: u64,
    /// Registered tasks.
    pub tasks: Vec<TaskInfo>,
    /// Most recent runs, newest first.
    pub recent_runs: Vec<TaskRun>,
    /// Cursors of suspended tasks.
    pub cursors: Vec<TaskCursor>,
    /// Store schema version.
    pub schema_version: i32,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
    /// Failure detail when unhealthy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Collect a status snapshot.
pub fn pipeline_status(pipeline: &Pipeline) -> PipelineResult<PipelineStatus> {
    let ledger = pipeline.ledger();
    Ok(PipelineStatus {
        queue: pipeline.queue().stats()?,
        stored_events: pipeline.events().count()?,
        tasks: pipeline.scheduler().tasks(),
        recent_runs: ledger.recent_runs(None, RECENT_RUNS)?,
        cursors: ledger
            .states()?
            .into_iter()
            .map(|(task, state)| TaskCursor { task, state })
            .collect(),
        schema_version: pipeline.store().schema_version(),
    })
}

/// Report whether the store answers queries.
pub fn health(pipeline: &Pipeline) -> Health {
    match pipeline.queue().stats() {
        Ok(_) => Health {
            ok: true,
            detail: None,
        },
        Err(e) => Health {
            ok: false,
            detail: Some(e.to_string()),
        },
    }
}
