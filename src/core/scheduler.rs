//! Task scheduler.
//!
//! Holds a typed registry of named, tiered tasks and runs one of them per
//! external tick. Each tick takes the task lock through the [`RunLedger`],
//! hands the task body any persisted cursor, and records how the run ended.
//! A suspended body has its cursor saved and a near-term re-tick requested; a
//! failing or panicking body is recorded as `Failed` and never propagates to
//! the tick source.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::{
    AppResult, ProcessResult, ProcessingState, RunLedger, RunLock, RunStatus, TickTrigger, Tier,
};
use crate::util::clock::{duration_ms, SharedClock};

/// How a task body finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Work is done; any persisted cursor is discarded.
    Drained(ProcessingState),
    /// Budget exhausted; persist the cursor and run again soon.
    Suspended(ProcessingState),
}

impl TaskOutcome {
    /// Outcome for tasks that keep no cursor.
    pub fn done() -> Self {
        Self::Drained(ProcessingState::default())
    }
}

impl From<ProcessResult> for TaskOutcome {
    fn from(result: ProcessResult) -> Self {
        match result {
            ProcessResult::Drained(state) => Self::Drained(state),
            ProcessResult::Suspended(state) => Self::Suspended(state),
        }
    }
}

/// What a task body sees when it runs.
#[derive(Debug, Clone)]
pub struct TaskContext<'a> {
    /// Task name.
    pub task: &'a str,
    /// Budget tier of the task.
    pub tier: Tier,
    /// Identifier of the open run.
    pub run_id: &'a str,
    /// Cursor saved by the previous suspended run, if any.
    pub resume: Option<ProcessingState>,
}

/// Work performed by a task.
pub trait TaskBody: Send + Sync {
    /// Run once. Errors and panics are recorded on the run.
    fn run(&self, ctx: &TaskContext<'_>) -> AppResult<TaskOutcome>;
}

impl<F> TaskBody for F
where
    F: Fn(&TaskContext<'_>) -> AppResult<TaskOutcome> + Send + Sync,
{
    fn run(&self, ctx: &TaskContext<'_>) -> AppResult<TaskOutcome> {
        self(ctx)
    }
}

/// A registered task.
#[derive(Clone)]
pub struct TaskDefinition {
    /// Unique name.
    pub name: String,
    /// Budget tier.
    pub tier: Tier,
    /// Interval at which the external source should tick it.
    pub interval: Duration,
    /// Work to perform.
    pub body: Arc<dyn TaskBody>,
}

/// Serializable view of a registered task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Task name.
    pub name: String,
    /// Budget tier.
    pub tier: Tier,
    /// Tick interval in seconds.
    pub interval_secs: u64,
}

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Age after which a `Running` row no longer holds the lock.
    pub lock_staleness: Duration,
    /// Delay of the re-tick requested after a suspension.
    pub continuation_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lock_staleness: Duration::from_secs(3_600),
            continuation_delay: Duration::from_secs(60),
        }
    }
}

/// What happened on a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickReport {
    /// No task by that name.
    UnknownTask,
    /// A live run holds the lock; nothing was done.
    LockHeld {
        /// The run holding the lock.
        run_id: String,
    },
    /// The run ledger could not be used; nothing was done.
    LedgerUnavailable(String),
    /// The body finished its work.
    Drained {
        /// Run identifier.
        run_id: String,
        /// Final counters.
        state: ProcessingState,
    },
    /// The body suspended; a re-tick was requested.
    Suspended {
        /// Run identifier.
        run_id: String,
        /// Persisted cursor.
        state: ProcessingState,
    },
    /// The body failed or panicked.
    Failed {
        /// Run identifier.
        run_id: String,
        /// Recorded error message.
        error: String,
    },
}

/// Registry and runner for periodic tasks.
pub struct TaskScheduler {
    tasks: RwLock<HashMap<String, Arc<TaskDefinition>>>,
    ledger: Arc<dyn RunLedger>,
    trigger: Arc<dyn TickTrigger>,
    clock: SharedClock,
    config: SchedulerConfig,
}

impl TaskScheduler {
    /// Create a scheduler with no tasks.
    pub fn new(
        ledger: Arc<dyn RunLedger>,
        trigger: Arc<dyn TickTrigger>,
        clock: SharedClock,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            ledger,
            trigger,
            clock,
            config,
        }
    }

    /// Register a task, replacing any previous definition with the same name.
    pub fn register_task(
        &self,
        name: impl Into<String>,
        tier: Tier,
        interval: Duration,
        body: Arc<dyn TaskBody>,
    ) {
        let name = name.into();
        let definition = Arc::new(TaskDefinition {
            name: name.clone(),
            tier,
            interval,
            body,
        });
        if self.tasks.write().insert(name.clone(), definition).is_some() {
            tracing::debug!(task = %name, "task definition replaced");
        } else {
            tracing::debug!(task = %name, tier = %tier, "task registered");
        }
    }

    /// Definition of a task.
    pub fn task(&self, name: &str) -> Option<Arc<TaskDefinition>> {
        self.tasks.read().get(name).cloned()
    }

    /// Registered tasks, sorted by name.
    pub fn tasks(&self) -> Vec<TaskInfo> {
        let mut tasks: Vec<TaskInfo> = self
            .tasks
            .read()
            .values()
            .map(|t| TaskInfo {
                name: t.name.clone(),
                tier: t.tier,
                interval_secs: t.interval.as_secs(),
            })
            .collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        tasks
    }

    /// Run ledger used for locks and history.
    pub fn ledger(&self) -> &Arc<dyn RunLedger> {
        &self.ledger
    }

    /// Scheduler configuration.
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Handle one external tick for `name`. Never panics or returns an error.
    pub fn on_tick(&self, name: &str) -> TickReport {
        let Some(task) = self.task(name) else {
            tracing::warn!(task = name, "tick for unknown task");
            return TickReport::UnknownTask;
        };

        let now = self.clock.now_ms();
        let staleness = duration_ms(self.config.lock_staleness);
        let run = match self.ledger.begin_run(name, task.tier, now, staleness) {
            Ok(RunLock::Acquired { run, reaped }) => {
                if reaped > 0 {
                    tracing::warn!(task = name, reaped, "reaped stale runs");
                }
                run
            }
            Ok(RunLock::Held(live)) => {
                tracing::debug!(task = name, run_id = %live.run_id, "task already running; skipping tick");
                return TickReport::LockHeld {
                    run_id: live.run_id,
                };
            }
            Err(e) => {
                tracing::error!(task = name, error = %e, "could not open task run");
                return TickReport::LedgerUnavailable(e.to_string());
            }
        };
        let run_id = run.run_id;

        let resume = match self.ledger.load_state(name) {
            Ok(state) => state,
            Err(e) => {
                let error = format!("could not load task state: {e}");
                self.close(name, &run_id, RunStatus::Failed, Some(&error));
                return TickReport::Failed { run_id, error };
            }
        };

        let ctx = TaskContext {
            task: name,
            tier: task.tier,
            run_id: &run_id,
            resume,
        };
        tracing::info!(task = name, run_id = %run_id, resumed = resume.is_some(), "task run started");

        let outcome = catch_unwind(AssertUnwindSafe(|| task.body.run(&ctx)));

        match outcome {
            Ok(Ok(TaskOutcome::Suspended(state))) => {
                if let Err(e) = self.ledger.save_state(name, &state, self.clock.now_ms()) {
                    tracing::error!(task = name, error = %e, "could not persist task state");
                }
                self.close(name, &run_id, RunStatus::Completed, None);
                self.trigger.request_tick(name, self.config.continuation_delay);
                tracing::info!(
                    task = name,
                    run_id = %run_id,
                    last_queue_id = state.last_queue_id,
                    processed = state.processed_count,
                    "task suspended; continuation requested"
                );
                TickReport::Suspended { run_id, state }
            }
            Ok(Ok(TaskOutcome::Drained(state))) => {
                if let Err(e) = self.ledger.clear_state(name) {
                    tracing::error!(task = name, error = %e, "could not clear task state");
                }
                self.close(name, &run_id, RunStatus::Completed, None);
                tracing::info!(
                    task = name,
                    run_id = %run_id,
                    processed = state.processed_count,
                    failed = state.failed_count,
                    "task completed"
                );
                TickReport::Drained { run_id, state }
            }
            Ok(Err(e)) => {
                let error = format!("{e:#}");
                self.close(name, &run_id, RunStatus::Failed, Some(&error));
                TickReport::Failed { run_id, error }
            }
            Err(panic) => {
                let error = panic_message(panic.as_ref());
                self.close(name, &run_id, RunStatus::Failed, Some(&error));
                TickReport::Failed { run_id, error }
            }
        }
    }

    fn close(&self, task: &str, run_id: &str, status: RunStatus, error: Option<&str>) {
        if let Some(error) = error {
            tracing::error!(task, run_id, error, "task run failed");
        }
        if let Err(e) = self
            .ledger
            .finish_run(run_id, status, error, self.clock.now_ms())
        {
            tracing::error!(task, run_id, error = %e, "could not close task run");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("task panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("task panicked: {s}")
    } else {
        "task panicked".to_string()
    }
}
