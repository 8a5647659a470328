//! Builder that assembles a pipeline from configuration.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::config::PipelineConfig;
use crate::core::{
    AppResult, BatchProcessor, ContextEnricher, DrainTask, DurableQueue, Enricher,
    MaintenanceTask, OverflowSignal, PipelineResult, ProcessResult, QueryCache, ResourceProbe,
    SystemProbe, TaskScheduler, TickReport, TickRequest, TickTrigger, Tier, DRAIN_TASK,
    MAINTENANCE_TASK,
};
use crate::infra::{SqliteCacheStore, SqliteEventSink, SqliteLedger, SqliteQueue, SqliteStore};
use crate::runtime::driver::{ChannelTrigger, TickDriver};
use crate::util::clock::{system_clock, SharedClock};

/// Collects optional collaborators before building a [`Pipeline`].
pub struct PipelineBuilder {
    config: PipelineConfig,
    clock: Option<SharedClock>,
    probe: Option<Arc<dyn ResourceProbe>>,
    trigger: Option<Arc<dyn TickTrigger>>,
    enricher: Option<Arc<dyn Enricher>>,
}

impl PipelineBuilder {
    /// Start from a configuration.
    pub const fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            clock: None,
            probe: None,
            trigger: None,
            enricher: None,
        }
    }

    /// Use a specific clock instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use a specific resource probe instead of sampling the process.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Deliver tick requests to `trigger` instead of to a built-in channel.
    #[must_use]
    pub fn with_trigger(mut self, trigger: Arc<dyn TickTrigger>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Replace the default context enricher.
    #[must_use]
    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Validate the configuration, open the store and wire every component.
    ///
    /// Registers the `drain_queue` (standard tier) and `maintenance`
    /// (critical tier) tasks.
    pub fn build(self) -> PipelineResult<Pipeline> {
        let cfg = self.config;
        cfg.validate()?;

        let store = match &cfg.database_path {
            Some(path) => SqliteStore::open(path)?,
            None => SqliteStore::open_in_memory()?,
        };
        let clock = self.clock.unwrap_or_else(system_clock);
        let probe: Arc<dyn ResourceProbe> = match self.probe {
            Some(probe) => probe,
            None => Arc::new(SystemProbe::new()?),
        };
        let mut ticks: Option<Receiver<TickRequest>> = None;
        let trigger: Arc<dyn TickTrigger> = match self.trigger {
            Some(trigger) => trigger,
            None => {
                let (trigger, rx) = ChannelTrigger::new();
                ticks = Some(rx);
                Arc::new(trigger)
            }
        };

        let cache = Arc::new(QueryCache::new(
            Arc::new(SqliteCacheStore::new(store.clone())),
            clock.clone(),
            Duration::from_secs(cfg.cache_default_ttl_secs),
        ));

        let queue = Arc::new(
            DurableQueue::new(Arc::new(SqliteQueue::new(store.clone())), clock.clone())
                .with_overflow_signal(OverflowSignal::new(
                    cfg.queue_overflow_threshold,
                    DRAIN_TASK,
                    trigger.clone(),
                    Duration::from_secs(cfg.overflow_signal_cooldown_secs),
                )),
        );

        let events = Arc::new(SqliteEventSink::new(store.clone()));
        let enricher: Arc<dyn Enricher> = match self.enricher {
            Some(enricher) => enricher,
            None => Arc::new(
                ContextEnricher::new(cfg.environment.clone()).with_cache(cache.clone(), None),
            ),
        };
        let processor = Arc::new(BatchProcessor::new(
            queue.clone(),
            events.clone(),
            enricher,
            probe,
            Arc::new(cfg.enforcer()),
            clock.clone(),
            cfg.processor(),
        ));

        let ledger = Arc::new(SqliteLedger::new(store.clone()));
        let scheduler = Arc::new(TaskScheduler::new(
            ledger.clone(),
            trigger,
            clock.clone(),
            cfg.scheduler(),
        ));
        scheduler.register_task(
            DRAIN_TASK,
            Tier::Standard,
            Duration::from_secs(cfg.drain_interval_secs),
            Arc::new(DrainTask::new(processor.clone(), cfg.drain_limit)),
        );
        scheduler.register_task(
            MAINTENANCE_TASK,
            Tier::Critical,
            Duration::from_secs(cfg.maintenance_interval_secs),
            Arc::new(MaintenanceTask::new(
                cache.clone(),
                ledger.clone(),
                clock,
                Duration::from_secs(cfg.run_history_retention_secs),
            )),
        );

        tracing::info!(
            environment = %cfg.environment,
            persistent = cfg.database_path.is_some(),
            schema_version = store.schema_version(),
            "pipeline ready"
        );

        Ok(Pipeline {
            config: cfg,
            store,
            queue,
            cache,
            events,
            ledger,
            processor,
            scheduler,
            ticks,
        })
    }
}

/// A fully wired pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    store: SqliteStore,
    queue: Arc<DurableQueue>,
    cache: Arc<QueryCache>,
    events: Arc<SqliteEventSink>,
    ledger: Arc<SqliteLedger>,
    processor: Arc<BatchProcessor>,
    scheduler: Arc<TaskScheduler>,
    ticks: Option<Receiver<TickRequest>>,
}

impl Pipeline {
    /// Build a pipeline from configuration with default collaborators.
    pub fn from_config(config: PipelineConfig) -> PipelineResult<Self> {
        PipelineBuilder::new(config).build()
    }

    /// Record an observation. See [`DurableQueue::enqueue`].
    pub fn enqueue<T>(&self, payload: &T, category: &str, subcategory: &str) -> bool
    where
        T: serde::Serialize + ?Sized,
    {
        self.queue.enqueue(payload, category, subcategory)
    }

    /// Handle an external tick for `task`.
    pub fn on_tick(&self, task: &str) -> TickReport {
        self.scheduler.on_tick(task)
    }

    /// Drain the queue once outside the scheduler, ignoring any saved cursor.
    pub fn drain_now(&self, tier: Tier) -> AppResult<ProcessResult> {
        self.processor
            .process(tier, self.config.drain_limit, None)
            .map_err(anyhow::Error::from)
    }

    /// Driver for the built-in trigger channel.
    ///
    /// Returns `None` when a custom trigger was supplied or the driver was
    /// already taken.
    pub fn take_driver(&mut self) -> Option<TickDriver> {
        self.ticks
            .take()
            .map(|rx| TickDriver::new(self.scheduler.clone(), rx))
    }

    /// Active configuration.
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Shared store.
    pub const fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Capture-facing queue.
    pub const fn queue(&self) -> &Arc<DurableQueue> {
        &self.queue
    }

    /// Query cache.
    pub const fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Permanent event storage.
    pub const fn events(&self) -> &Arc<SqliteEventSink> {
        &self.events
    }

    /// Run history and cursors.
    pub const fn ledger(&self) -> &Arc<SqliteLedger> {
        &self.ledger
    }

    /// Task scheduler.
    pub const fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }
}
