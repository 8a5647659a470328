//! Built-in task bodies.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::core::{
    AppResult, BatchProcessor, QueryCache, RunLedger, TaskBody, TaskContext, TaskOutcome,
};
use crate::util::clock::{duration_ms, SharedClock};

/// Name of the queue drain task.
pub const DRAIN_TASK: &str = "drain_queue";
/// Name of the housekeeping task.
pub const MAINTENANCE_TASK: &str = "maintenance";

/// Drains the durable queue through a [`BatchProcessor`].
pub struct DrainTask {
    processor: Arc<BatchProcessor>,
    limit: usize,
}

impl DrainTask {
    /// Drain at most `limit` items per invocation.
    pub const fn new(processor: Arc<BatchProcessor>, limit: usize) -> Self {
        Self { processor, limit }
    }
}

impl TaskBody for DrainTask {
    fn run(&self, ctx: &TaskContext<'_>) -> AppResult<TaskOutcome> {
        let result = self
            .processor
            .process(ctx.tier, self.limit, ctx.resume)
            .context("queue drain failed")?;
        Ok(result.into())
    }
}

/// Sweeps expired cache rows and prunes old run history.
pub struct MaintenanceTask {
    cache: Arc<QueryCache>,
    ledger: Arc<dyn RunLedger>,
    clock: SharedClock,
    run_history_retention: Duration,
}

impl MaintenanceTask {
    /// Housekeeping over `cache` and `ledger`, keeping run history for
    /// `run_history_retention`.
    pub fn new(
        cache: Arc<QueryCache>,
        ledger: Arc<dyn RunLedger>,
        clock: SharedClock,
        run_history_retention: Duration,
    ) -> Self {
        Self {
            cache,
            ledger,
            clock,
            run_history_retention,
        }
    }
}

impl TaskBody for MaintenanceTask {
    fn run(&self, ctx: &TaskContext<'_>) -> AppResult<TaskOutcome> {
        let swept = self
            .cache
            .sweep_expired()
            .context("cache sweep failed")?;
        let cutoff = self
            .clock
            .now_ms()
            .saturating_sub(duration_ms(self.run_history_retention));
        let pruned = self
            .ledger
            .prune_runs(cutoff)
            .context("run history prune failed")?;
        tracing::info!(task = ctx.task, swept, pruned, "maintenance finished");
        Ok(TaskOutcome::done())
    }
}
