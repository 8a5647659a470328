//! Resumable batch processor.
//!
//! One invocation drains pending queue items in chunks, strictly ascending by
//! id, starting after the cursor it was resumed with. Between chunks it asks
//! the [`BudgetEnforcer`] whether it may continue; when it may not, it returns
//! [`ProcessResult::Suspended`] carrying the cursor so the next invocation
//! picks up exactly where this one stopped.
//!
//! Status transitions for a chunk are applied before the budget check, so a
//! suspension never strands a half-processed chunk.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{
    BudgetEnforcer, BudgetVerdict, DurableQueue, EventSink, NewEvent, PipelineError,
    PipelineResult, ProcessingState, QueryCache, QueueItem, QueueStatus, ResourceProbe, Tier,
};
use crate::util::clock::SharedClock;

/// Cache group for environment lookups.
pub const ENVIRONMENT_CACHE_GROUP: &str = "environment";

/// Transforms a validated payload into the stored event body.
pub trait Enricher: Send + Sync {
    /// Attach context to `payload`. An error makes the processor store a
    /// minimal error record instead.
    fn enrich(&self, item: &QueueItem, payload: Map<String, Value>) -> PipelineResult<Value>;
}

/// Host facts attached to every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostContext {
    /// Host name, if known.
    pub host_name: Option<String>,
    /// Operating system description, if known.
    pub os: Option<String>,
}

impl HostContext {
    /// Look up host facts from the operating system.
    pub fn detect() -> Self {
        Self {
            host_name: sysinfo::System::host_name(),
            os: sysinfo::System::long_os_version(),
        }
    }
}

/// Default enricher: nests the payload under `data` and adds a `context`
/// object with host, process and pipeline metadata.
pub struct ContextEnricher {
    environment: String,
    cache: Option<Arc<QueryCache>>,
    context_ttl: Option<Duration>,
}

impl ContextEnricher {
    /// Enricher labelling events with `environment`.
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            cache: None,
            context_ttl: None,
        }
    }

    /// Look host facts up through `cache` instead of on every event.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<QueryCache>, ttl: Option<Duration>) -> Self {
        self.cache = Some(cache);
        self.context_ttl = ttl;
        self
    }

    fn host_context(&self) -> HostContext {
        match &self.cache {
            Some(cache) => cache.remember(
                "host_context",
                ENVIRONMENT_CACHE_GROUP,
                self.context_ttl,
                HostContext::detect,
            ),
            None => HostContext::detect(),
        }
    }
}

impl Enricher for ContextEnricher {
    fn enrich(&self, item: &QueueItem, payload: Map<String, Value>) -> PipelineResult<Value> {
        let host = self.host_context();
        let context = serde_json::json!({
            "environment": self.environment,
            "host": host.host_name,
            "os": host.os,
            "pid": std::process::id(),
            "pipeline_version": env!("CARGO_PKG_VERSION"),
            "queue_id": item.id,
        });
        Ok(serde_json::json!({
            "data": Value::Object(payload),
            "context": context,
        }))
    }
}

/// Processor tuning.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Items fetched and committed per chunk.
    pub chunk_size: usize,
    /// Age after which terminal items are purged, per status.
    pub retention: Vec<(QueueStatus, Duration)>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            chunk_size: 50,
            retention: vec![
                (QueueStatus::Processed, Duration::from_secs(7 * 86_400)),
                (QueueStatus::Failed, Duration::from_secs(30 * 86_400)),
            ],
        }
    }
}

/// Result of one processor invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    /// The queue was exhausted or the item limit was reached.
    Drained(ProcessingState),
    /// The budget ran out; resume from this state.
    Suspended(ProcessingState),
}

impl ProcessResult {
    /// Cursor and counters at the end of the invocation.
    pub const fn state(&self) -> &ProcessingState {
        match self {
            Self::Drained(state) | Self::Suspended(state) => state,
        }
    }

    /// Items stored across the logical run so far.
    pub const fn processed_count(&self) -> u64 {
        self.state().processed_count
    }

    /// Whether the run must be resumed.
    pub const fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended(_))
    }
}

#[derive(Debug)]
enum ItemOutcome {
    Stored,
    AlreadyStored,
    Rejected(String),
    StoreFailed(PipelineError),
}

impl ItemOutcome {
    const fn is_processed(&self) -> bool {
        matches!(self, Self::Stored | Self::AlreadyStored)
    }
}

/// Drains the durable queue into permanent storage under a budget.
pub struct BatchProcessor {
    queue: Arc<DurableQueue>,
    sink: Arc<dyn EventSink>,
    enricher: Arc<dyn Enricher>,
    probe: Arc<dyn ResourceProbe>,
    enforcer: Arc<BudgetEnforcer>,
    clock: SharedClock,
    config: ProcessorConfig,
}

impl BatchProcessor {
    /// Assemble a processor from its collaborators.
    pub fn new(
        queue: Arc<DurableQueue>,
        sink: Arc<dyn EventSink>,
        enricher: Arc<dyn Enricher>,
        probe: Arc<dyn ResourceProbe>,
        enforcer: Arc<BudgetEnforcer>,
        clock: SharedClock,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            queue,
            sink,
            enricher,
            probe,
            enforcer,
            clock,
            config,
        }
    }

    /// Processor configuration.
    pub const fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Drain up to `limit` items under the budget of `tier`.
    ///
    /// `resume` restores the cursor and counters of a suspended run. Errors are
    /// returned only when the queue itself cannot be read; single-item failures
    /// are counted and skipped.
    pub fn process(
        &self,
        tier: Tier,
        limit: usize,
        resume: Option<ProcessingState>,
    ) -> PipelineResult<ProcessResult> {
        let mut state = resume.unwrap_or_default();
        let processed_before = state.processed_count;

        let start = match self.probe.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "resource probe failed at start; suspending");
                return Ok(ProcessResult::Suspended(state));
            }
        };

        let chunk_size = self.config.chunk_size.max(1);
        let mut consumed: usize = 0;

        loop {
            let remaining = limit.saturating_sub(consumed);
            if remaining == 0 {
                tracing::debug!(limit, last_queue_id = state.last_queue_id, "item limit reached");
                break;
            }

            let want = chunk_size.min(remaining);
            let chunk = self.queue.dequeue_after(state.last_queue_id, want)?;
            if chunk.is_empty() {
                break;
            }

            self.process_chunk(&chunk, &mut state);
            consumed += chunk.len();

            if chunk.len() < want {
                break;
            }

            let current = match self.probe.snapshot() {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!(error = %e, "resource probe failed; suspending");
                    return Ok(ProcessResult::Suspended(state));
                }
            };
            let verdict = self
                .enforcer
                .check(tier, &start, &current, u64::try_from(consumed).unwrap_or(u64::MAX));
            if verdict != BudgetVerdict::Continue {
                tracing::info!(
                    tier = %tier,
                    ?verdict,
                    last_queue_id = state.last_queue_id,
                    processed = state.processed_count,
                    failed = state.failed_count,
                    "budget exhausted; suspending"
                );
                return Ok(ProcessResult::Suspended(state));
            }
        }

        tracing::info!(
            last_queue_id = state.last_queue_id,
            processed = state.processed_count,
            failed = state.failed_count,
            consumed,
            "queue drained"
        );
        if state.processed_count > processed_before {
            self.purge_retained();
        }
        Ok(ProcessResult::Drained(state))
    }

    fn process_chunk(&self, chunk: &[QueueItem], state: &mut ProcessingState) {
        let mut processed_ids = Vec::with_capacity(chunk.len());
        let mut failed_ids = Vec::new();
        let mut duplicates: usize = 0;

        for item in chunk {
            let outcome = self.process_item(item);
            match &outcome {
                ItemOutcome::Rejected(reason) => {
                    tracing::warn!(id = item.id, reason = %reason, "queue item rejected");
                }
                ItemOutcome::StoreFailed(e) => {
                    tracing::error!(id = item.id, error = %e, "event insert failed");
                }
                ItemOutcome::AlreadyStored => {
                    tracing::debug!(id = item.id, "event already stored");
                    duplicates += 1;
                }
                ItemOutcome::Stored => {}
            }
            if outcome.is_processed() {
                processed_ids.push(item.id);
            } else {
                failed_ids.push(item.id);
            }
            state.last_queue_id = state.last_queue_id.max(item.id);
        }

        self.mark(&processed_ids, QueueStatus::Processed);
        self.mark(&failed_ids, QueueStatus::Failed);

        // Duplicates leave the pending set but were counted by whoever stored them.
        state.processed_count += (processed_ids.len() - duplicates) as u64;
        state.failed_count += failed_ids.len() as u64;
        tracing::debug!(
            size = chunk.len(),
            processed = processed_ids.len() - duplicates,
            duplicates,
            failed = failed_ids.len(),
            last_queue_id = state.last_queue_id,
            "chunk committed"
        );
    }

    fn mark(&self, ids: &[i64], status: QueueStatus) {
        match self.queue.mark_batch(ids, status) {
            Ok(report) if !report.failed_ids.is_empty() => {
                tracing::error!(
                    status = %status,
                    failed_ids = ?report.failed_ids,
                    "some queue items could not be marked"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!(status = %status, error = %e, "mark batch failed"),
        }
    }

    fn process_item(&self, item: &QueueItem) -> ItemOutcome {
        if item.category.trim().is_empty() || item.subcategory.trim().is_empty() {
            return ItemOutcome::Rejected("missing category or subcategory".into());
        }
        let payload = match item.payload_map() {
            Ok(payload) => payload,
            Err(e) => return ItemOutcome::Rejected(e.to_string()),
        };

        let enriched = self.enricher.enrich(item, payload).unwrap_or_else(|e| {
            tracing::warn!(id = item.id, error = %e, "enrichment failed; storing error record");
            serde_json::json!({
                "_enrichment_error": e.to_string(),
                "queue_id": item.id,
            })
        });

        let event = NewEvent {
            queue_id: item.id,
            category: item.category.clone(),
            subcategory: item.subcategory.clone(),
            payload: enriched,
            captured_at_ms: item.created_at_ms,
            processed_at_ms: self.clock.now_ms(),
        };
        match self.sink.insert_event(&event) {
            Ok(true) => ItemOutcome::Stored,
            Ok(false) => ItemOutcome::AlreadyStored,
            Err(e) => ItemOutcome::StoreFailed(e),
        }
    }

    fn purge_retained(&self) {
        for (status, age) in &self.config.retention {
            if let Err(e) = self.queue.purge(*status, *age) {
                tracing::warn!(status = %status, error = %e, "retention purge failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use super::*;
    use crate::core::{QueueBackend, ResourceSnapshot, TierBudget};
    use crate::infra::queue::memory::InMemoryQueue;
    use crate::infra::sink::memory::InMemoryEventSink;
    use crate::util::clock::ManualClock;

    /// Probe whose clock jumps past every budget after `calls_before_exhausted` snapshots.
    struct StepProbe {
        base: Instant,
        calls: AtomicUsize,
        calls_before_exhausted: usize,
    }

    impl StepProbe {
        fn new(calls_before_exhausted: usize) -> Self {
            Self {
                base: Instant::now(),
                calls: AtomicUsize::new(0),
                calls_before_exhausted,
            }
        }
    }

    impl ResourceProbe for StepProbe {
        fn snapshot(&self) -> PipelineResult<ResourceSnapshot> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let offset = if n >= self.calls_before_exhausted {
                Duration::from_secs(3_600)
            } else {
                Duration::ZERO
            };
            Ok(ResourceSnapshot::new(self.base + offset, 0))
        }
    }

    struct FailingProbe;

    impl ResourceProbe for FailingProbe {
        fn snapshot(&self) -> PipelineResult<ResourceSnapshot> {
            Err(PipelineError::ResourceProbe("unavailable".into()))
        }
    }

    struct FailingEnricher;

    impl Enricher for FailingEnricher {
        fn enrich(&self, _item: &QueueItem, _payload: Map<String, Value>) -> PipelineResult<Value> {
            Err(PipelineError::Encoding("cannot encode".into()))
        }
    }

    struct Harness {
        backend: Arc<InMemoryQueue>,
        queue: Arc<DurableQueue>,
        sink: Arc<InMemoryEventSink>,
        clock: ManualClock,
    }

    impl Harness {
        fn new() -> Self {
            let clock = ManualClock::new(10_000_000);
            let backend = Arc::new(InMemoryQueue::new());
            let queue = Arc::new(DurableQueue::new(backend.clone(), Arc::new(clock.clone())));
            Self {
                backend,
                queue,
                sink: Arc::new(InMemoryEventSink::new()),
                clock,
            }
        }

        fn fill(&self, n: usize) {
            for i in 0..n {
                assert!(self.queue.enqueue(&serde_json::json!({ "n": i }), "http", "request"));
            }
        }

        fn processor(
            &self,
            chunk_size: usize,
            probe: Arc<dyn ResourceProbe>,
            enricher: Arc<dyn Enricher>,
        ) -> BatchProcessor {
            BatchProcessor::new(
                self.queue.clone(),
                self.sink.clone(),
                enricher,
                probe,
                Arc::new(BudgetEnforcer::default()),
                Arc::new(self.clock.clone()),
                ProcessorConfig {
                    chunk_size,
                    ..ProcessorConfig::default()
                },
            )
        }
    }

    fn enricher() -> Arc<dyn Enricher> {
        Arc::new(ContextEnricher::new("test"))
    }

    #[test]
    fn test_drains_everything_in_order() {
        let h = Harness::new();
        h.fill(7);
        let p = h.processor(3, Arc::new(StepProbe::new(usize::MAX)), enricher());

        let result = p.process(Tier::Standard, 100, None).unwrap();
        assert_eq!(
            result,
            ProcessResult::Drained(ProcessingState {
                last_queue_id: 7,
                processed_count: 7,
                failed_count: 0
            })
        );
        assert_eq!(h.sink.queue_ids(), (1..=7).collect::<Vec<_>>());
        assert_eq!(h.queue.count(QueueStatus::Pending).unwrap(), 0);
    }

    #[test]
    fn test_suspends_after_budget_and_resumes_exactly() {
        let h = Harness::new();
        h.fill(20);
        // Start snapshot plus one check succeed; the second check is over budget.
        let p = h.processor(3, Arc::new(StepProbe::new(2)), enricher());

        let first = p.process(Tier::Critical, 100, None).unwrap();
        assert!(first.is_suspended());
        assert_eq!(first.state().last_queue_id, 6);
        assert_eq!(h.sink.queue_ids(), (1..=6).collect::<Vec<_>>());

        let p = h.processor(3, Arc::new(StepProbe::new(usize::MAX)), enricher());
        let second = p.process(Tier::Critical, 100, Some(*first.state())).unwrap();
        assert!(!second.is_suspended());
        assert_eq!(second.state().last_queue_id, 20);
        assert_eq!(second.processed_count(), 20);
        assert_eq!(h.sink.queue_ids(), (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn test_limit_returns_drained_with_items_left() {
        let h = Harness::new();
        h.fill(10);
        let p = h.processor(4, Arc::new(StepProbe::new(usize::MAX)), enricher());

        let result = p.process(Tier::Standard, 6, None).unwrap();
        assert!(!result.is_suspended());
        assert_eq!(result.state().last_queue_id, 6);
        assert_eq!(h.queue.count(QueueStatus::Pending).unwrap(), 4);
    }

    #[test]
    fn test_poison_item_advances_cursor() {
        let h = Harness::new();
        h.fill(2);
        h.backend
            .insert(&crate::core::NewQueueItem {
                category: "http".into(),
                subcategory: "request".into(),
                payload: "[1,2]".into(),
                created_at_ms: 0,
            })
            .unwrap();
        h.fill(1);
        let p = h.processor(10, Arc::new(StepProbe::new(usize::MAX)), enricher());

        let result = p.process(Tier::Standard, 100, None).unwrap();
        assert_eq!(result.state().last_queue_id, 4);
        assert_eq!(result.state().failed_count, 1);
        assert_eq!(result.state().processed_count, 3);
        let poison = h.backend.items().into_iter().find(|i| i.id == 3).unwrap();
        assert_eq!(poison.status, QueueStatus::Failed);
    }

    #[test]
    fn test_store_failure_is_isolated() {
        let h = Harness::new();
        h.fill(3);
        h.sink.fail_on(2);
        let p = h.processor(10, Arc::new(StepProbe::new(usize::MAX)), enricher());

        let result = p.process(Tier::Standard, 100, None).unwrap();
        assert_eq!(result.state().processed_count, 2);
        assert_eq!(result.state().failed_count, 1);
        assert_eq!(h.sink.queue_ids(), vec![1, 3]);
    }

    #[test]
    fn test_enrichment_failure_stores_error_record() {
        let h = Harness::new();
        h.fill(1);
        let p = h.processor(10, Arc::new(StepProbe::new(usize::MAX)), Arc::new(FailingEnricher));

        let result = p.process(Tier::Standard, 100, None).unwrap();
        assert_eq!(result.state().processed_count, 1);
        let events = h.sink.events();
        assert!(events[0].payload.get("_enrichment_error").is_some());
    }

    #[test]
    fn test_probe_failure_suspends_without_work() {
        let h = Harness::new();
        h.fill(3);
        let p = h.processor(10, Arc::new(FailingProbe), enricher());

        let resume = ProcessingState {
            last_queue_id: 0,
            processed_count: 5,
            failed_count: 0,
        };
        let result = p.process(Tier::Standard, 100, Some(resume)).unwrap();
        assert_eq!(result, ProcessResult::Suspended(resume));
        assert!(h.sink.events().is_empty());
    }

    #[test]
    fn test_operation_ceiling_suspends() {
        let h = Harness::new();
        h.fill(9);
        let mut budgets = std::collections::HashMap::new();
        budgets.insert(Tier::Standard, TierBudget::new(60_000, u64::MAX).with_max_operations(4));
        let p = BatchProcessor::new(
            h.queue.clone(),
            h.sink.clone(),
            enricher(),
            Arc::new(StepProbe::new(usize::MAX)),
            Arc::new(BudgetEnforcer::new(budgets)),
            Arc::new(h.clock.clone()),
            ProcessorConfig {
                chunk_size: 3,
                ..ProcessorConfig::default()
            },
        );

        let result = p.process(Tier::Standard, 100, None).unwrap();
        assert!(result.is_suspended());
        assert_eq!(result.state().last_queue_id, 6);
    }

    #[test]
    fn test_drained_run_purges_old_terminal_items() {
        let h = Harness::new();
        h.fill(2);
        let p = h.processor(10, Arc::new(StepProbe::new(usize::MAX)), enricher());
        p.process(Tier::Standard, 100, None).unwrap();
        assert_eq!(h.queue.count(QueueStatus::Processed).unwrap(), 2);

        h.clock.advance(Duration::from_secs(8 * 86_400));
        h.fill(1);
        p.process(Tier::Standard, 100, None).unwrap();
        // The two old items are gone; the fresh one stays.
        assert_eq!(h.queue.count(QueueStatus::Processed).unwrap(), 1);
    }

    #[test]
    fn test_already_stored_event_is_not_counted_twice() {
        let h = Harness::new();
        h.fill(3);
        h.sink
            .insert_event(&NewEvent {
                queue_id: 2,
                category: "http".into(),
                subcategory: "request".into(),
                payload: serde_json::json!({"n": 1}),
                captured_at_ms: 0,
                processed_at_ms: 0,
            })
            .unwrap();
        let p = h.processor(10, Arc::new(StepProbe::new(usize::MAX)), enricher());

        let result = p.process(Tier::Standard, 100, None).unwrap();
        assert_eq!(result.state().processed_count, 2);
        assert_eq!(result.state().failed_count, 0);
        assert_eq!(result.state().last_queue_id, 3);
        assert_eq!(h.queue.count(QueueStatus::Pending).unwrap(), 0);
        assert_eq!(h.queue.count(QueueStatus::Processed).unwrap(), 3);
    }

    #[test]
    fn test_resumed_run_with_no_new_work_skips_purge() {
        let h = Harness::new();
        h.fill(2);
        let p = h.processor(10, Arc::new(StepProbe::new(usize::MAX)), enricher());
        let first = p.process(Tier::Standard, 100, None).unwrap();
        assert_eq!(first.processed_count(), 2);

        h.clock.advance(Duration::from_secs(8 * 86_400));
        let second = p.process(Tier::Standard, 100, Some(*first.state())).unwrap();
        assert_eq!(second, first);
        assert_eq!(h.queue.count(QueueStatus::Processed).unwrap(), 2);
    }

    #[test]
    fn test_context_enricher_nests_payload() {
        let item = QueueItem {
            id: 9,
            category: "c".into(),
            subcategory: "s".into(),
            payload: "{}".into(),
            created_at_ms: 0,
            status: QueueStatus::Pending,
        };
        let mut map = Map::new();
        map.insert("k".into(), Value::from(1));
        let value = ContextEnricher::new("staging").enrich(&item, map).unwrap();
        assert_eq!(value["data"]["k"], 1);
        assert_eq!(value["context"]["environment"], "staging");
        assert_eq!(value["context"]["queue_id"], 9);
    }
}
