//! Task run history, run locks and resumption cursors.
//!
//! A `Running` row younger than the staleness window is the mutual-exclusion
//! lock for its task. There is no heartbeat: a run that dies without closing
//! its row keeps the lock until the window expires, after which the next tick
//! reaps it as failed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::{PipelineError, PipelineResult, Tier};

/// Error message recorded on runs reaped after the staleness window.
pub const STALE_RUN_MESSAGE: &str = "stale run superseded";

/// Status of a task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Holding the task lock.
    Running,
    /// Finished normally, including suspension.
    Completed,
    /// Task body failed or the run was reaped.
    Failed,
}

impl RunStatus {
    /// Stable lowercase name used in storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(PipelineError::InvalidInput(format!(
                "unknown run status `{other}`"
            ))),
        }
    }
}

/// One invocation of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRun {
    /// Unique run identifier.
    pub run_id: String,
    /// Task name.
    pub task_name: String,
    /// Budget tier the run executed under.
    pub tier: Tier,
    /// Start time, ms since epoch.
    pub start_time_ms: i64,
    /// End time, ms since epoch, once closed.
    pub end_time_ms: Option<i64>,
    /// Current status.
    pub status: RunStatus,
    /// Failure description.
    pub error_message: Option<String>,
}

impl TaskRun {
    /// A fresh `Running` row.
    pub fn start(task_name: &str, tier: Tier, now_ms: i64) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            task_name: task_name.to_string(),
            tier,
            start_time_ms: now_ms,
            end_time_ms: None,
            status: RunStatus::Running,
            error_message: None,
        }
    }

    /// Whether this row still holds the task lock at `now_ms`.
    pub const fn holds_lock(&self, now_ms: i64, staleness_ms: i64) -> bool {
        matches!(self.status, RunStatus::Running)
            && now_ms.saturating_sub(self.start_time_ms) < staleness_ms
    }
}

/// Resumption cursor persisted between invocations of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingState {
    /// Highest queue id already consumed.
    pub last_queue_id: i64,
    /// Items stored so far in this logical run.
    pub processed_count: u64,
    /// Items failed so far in this logical run.
    pub failed_count: u64,
}

/// Outcome of trying to take a task lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunLock {
    /// A new `Running` row was opened.
    Acquired {
        /// The new run.
        run: TaskRun,
        /// Stale `Running` rows closed as failed.
        reaped: usize,
    },
    /// Another run still holds the lock.
    Held(TaskRun),
}

/// Persistence for run history and resumption cursors.
pub trait RunLedger: Send + Sync {
    /// Open a `Running` row for `task` unless a live one exists.
    ///
    /// Check and insert happen atomically with respect to other callers of
    /// the same ledger. `Running` rows older than `staleness_ms` are closed as
    /// failed and do not block.
    fn begin_run(
        &self,
        task: &str,
        tier: Tier,
        now_ms: i64,
        staleness_ms: i64,
    ) -> PipelineResult<RunLock>;

    /// Close a run that is still `Running`.
    ///
    /// A run already closed elsewhere, e.g. reaped as stale, keeps its row.
    fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<&str>,
        now_ms: i64,
    ) -> PipelineResult<()>;

    /// Persisted cursor for `task`.
    fn load_state(&self, task: &str) -> PipelineResult<Option<ProcessingState>>;

    /// Persist a cursor. `last_queue_id` never moves backwards.
    fn save_state(&self, task: &str, state: &ProcessingState, now_ms: i64) -> PipelineResult<()>;

    /// Drop the cursor for `task`.
    fn clear_state(&self, task: &str) -> PipelineResult<()>;

    /// Every persisted cursor.
    fn states(&self) -> PipelineResult<Vec<(String, ProcessingState)>>;

    /// Most recent runs, newest first, optionally for one task.
    fn recent_runs(&self, task: Option<&str>, limit: usize) -> PipelineResult<Vec<TaskRun>>;

    /// Delete closed runs that started before `cutoff_ms`.
    fn prune_runs(&self, cutoff_ms: i64) -> PipelineResult<usize>;
}
