//! Core pipeline abstractions: queue, budgets, processor, scheduler and cache.

pub mod budget;
pub mod cache;
pub mod error;
pub mod processor;
pub mod queue;
pub mod runs;
pub mod scheduler;
pub mod sink;
pub mod tasks;
pub mod trigger;

pub use budget::{
    BudgetEnforcer, BudgetVerdict, ResourceProbe, ResourceSnapshot, SystemProbe, Tier, TierBudget,
};
pub use cache::{CacheEntry, CacheStore, QueryCache};
pub use error::{AppResult, PipelineError, PipelineResult};
pub use processor::{
    BatchProcessor, ContextEnricher, Enricher, HostContext, ProcessResult, ProcessorConfig,
    ENVIRONMENT_CACHE_GROUP,
};
pub use queue::{
    encode_payload, placeholder_payload, DurableQueue, MarkReport, NewQueueItem, OverflowSignal,
    QueueBackend, QueueItem, QueueStats, QueueStatus, MAX_CATEGORY_LEN,
};
pub use runs::{ProcessingState, RunLedger, RunLock, RunStatus, TaskRun, STALE_RUN_MESSAGE};
pub use scheduler::{
    SchedulerConfig, TaskBody, TaskContext, TaskDefinition, TaskInfo, TaskOutcome, TaskScheduler,
    TickReport,
};
pub use sink::{EventSink, NewEvent, StoredEvent};
pub use tasks::{DrainTask, MaintenanceTask, DRAIN_TASK, MAINTENANCE_TASK};
pub use trigger::{NoopTrigger, RecordingTrigger, TickRequest, TickTrigger};
