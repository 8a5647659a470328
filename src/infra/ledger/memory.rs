//! In-memory run ledger for tests and embedding.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::core::{
    PipelineResult, ProcessingState, RunLedger, RunLock, RunStatus, TaskRun, Tier,
    STALE_RUN_MESSAGE,
};

#[derive(Default)]
struct Inner {
    runs: Vec<TaskRun>,
    states: BTreeMap<String, ProcessingState>,
}

/// Ledger kept in process memory.
#[derive(Default)]
pub struct InMemoryLedger {
    inner: Mutex<Inner>,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a run row as-is, e.g. to simulate a crashed run.
    pub fn insert_run(&self, run: TaskRun) {
        self.inner.lock().runs.push(run);
    }
}

impl RunLedger for InMemoryLedger {
    fn begin_run(
        &self,
        task: &str,
        tier: Tier,
        now_ms: i64,
        staleness_ms: i64,
    ) -> PipelineResult<RunLock> {
        let mut inner = self.inner.lock();
        if let Some(live) = inner
            .runs
            .iter()
            .find(|r| r.task_name == task && r.holds_lock(now_ms, staleness_ms))
        {
            return Ok(RunLock::Held(live.clone()));
        }

        let mut reaped = 0;
        for stale in inner
            .runs
            .iter_mut()
            .filter(|r| r.task_name == task && r.status == RunStatus::Running)
        {
            stale.status = RunStatus::Failed;
            stale.end_time_ms = Some(now_ms);
            stale.error_message = Some(STALE_RUN_MESSAGE.to_string());
            reaped += 1;
        }

        let run = TaskRun::start(task, tier, now_ms);
        inner.runs.push(run.clone());
        Ok(RunLock::Acquired { run, reaped })
    }

    fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<&str>,
        now_ms: i64,
    ) -> PipelineResult<()> {
        let mut inner = self.inner.lock();
        match inner
            .runs
            .iter_mut()
            .find(|r| r.run_id == run_id && r.status == RunStatus::Running)
        {
            Some(run) => {
                run.status = status;
                run.end_time_ms = Some(now_ms);
                run.error_message = error.map(str::to_string);
            }
            None => {
                tracing::warn!(run_id, status = %status, "run was no longer running; history left as is");
            }
        }
        Ok(())
    }

    fn load_state(&self, task: &str) -> PipelineResult<Option<ProcessingState>> {
        Ok(self.inner.lock().states.get(task).copied())
    }

    fn save_state(&self, task: &str, state: &ProcessingState, _now_ms: i64) -> PipelineResult<()> {
        let mut inner = self.inner.lock();
        let entry = inner.states.entry(task.to_string()).or_default();
        let last_queue_id = entry.last_queue_id.max(state.last_queue_id);
        *entry = ProcessingState {
            last_queue_id,
            ..*state
        };
        Ok(())
    }

    fn clear_state(&self, task: &str) -> PipelineResult<()> {
        self.inner.lock().states.remove(task);
        Ok(())
    }

    fn states(&self) -> PipelineResult<Vec<(String, ProcessingState)>> {
        Ok(self
            .inner
            .lock()
            .states
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect())
    }

    fn recent_runs(&self, task: Option<&str>, limit: usize) -> PipelineResult<Vec<TaskRun>> {
        let inner = self.inner.lock();
        let mut runs: Vec<TaskRun> = inner
            .runs
            .iter()
            .rev()
            .filter(|r| task.is_none_or(|t| r.task_name == t))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.start_time_ms.cmp(&a.start_time_ms));
        runs.truncate(limit);
        Ok(runs)
    }

    fn prune_runs(&self, cutoff_ms: i64) -> PipelineResult<usize> {
        let mut inner = self.inner.lock();
        let before = inner.runs.len();
        inner
            .runs
            .retain(|r| r.status == RunStatus::Running || r.start_time_ms >= cutoff_ms);
        Ok(before - inner.runs.len())
    }
}
