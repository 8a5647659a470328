//! Durable event queue.
//!
//! [`DurableQueue`] is the capture-facing front: it validates and encodes
//! payloads, appends them to a [`QueueBackend`], and raises an out-of-band
//! drain request when the pending backlog grows past a threshold. The batch
//! processor reads through the same front with a monotonic id cursor.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{PipelineError, PipelineResult, TickTrigger};
use crate::util::clock::{duration_ms, SharedClock};

/// Longest accepted category or subcategory.
pub const MAX_CATEGORY_LEN: usize = 128;

/// Lifecycle status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting to be processed.
    Pending,
    /// Stored as an event.
    Processed,
    /// Rejected or could not be stored.
    Failed,
}

impl QueueStatus {
    /// Stable lowercase name used in storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    /// Whether the status is final.
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            other => Err(PipelineError::InvalidInput(format!(
                "unknown queue status `{other}`"
            ))),
        }
    }
}

/// A queued observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Monotonic identifier, strictly increasing in insertion order.
    pub id: i64,
    /// Event category.
    pub category: String,
    /// Event subcategory.
    pub subcategory: String,
    /// Serialized JSON object.
    pub payload: String,
    /// Enqueue time, ms since epoch.
    pub created_at_ms: i64,
    /// Current status.
    pub status: QueueStatus,
}

impl QueueItem {
    /// Decode the payload as a JSON object.
    pub fn payload_map(&self) -> PipelineResult<Map<String, Value>> {
        match serde_json::from_str::<Value>(&self.payload)? {
            Value::Object(map) => Ok(map),
            other => Err(PipelineError::Encoding(format!(
                "payload of item {} is a {}, not an object",
                self.id,
                json_kind(&other)
            ))),
        }
    }
}

/// An item ready to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQueueItem {
    /// Event category.
    pub category: String,
    /// Event subcategory.
    pub subcategory: String,
    /// Serialized JSON object.
    pub payload: String,
    /// Enqueue time, ms since epoch.
    pub created_at_ms: i64,
}

/// Counts of items per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Items waiting.
    pub pending: u64,
    /// Items stored.
    pub processed: u64,
    /// Items failed.
    pub failed: u64,
}

/// Result of a bulk status transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkReport {
    /// Items moved to the new status.
    pub updated: usize,
    /// Items already in a terminal status and left untouched.
    pub skipped: usize,
    /// Items whose update failed even after per-id fallback.
    pub failed_ids: Vec<i64>,
}

/// Storage contract for queue backends.
pub trait QueueBackend: Send + Sync {
    /// Append an item and return its id.
    fn insert(&self, item: &NewQueueItem) -> PipelineResult<i64>;
    /// Items with `id > cursor` in `status`, ascending by id.
    fn fetch_after(
        &self,
        cursor: i64,
        limit: usize,
        status: QueueStatus,
    ) -> PipelineResult<Vec<QueueItem>>;
    /// Move pending `ids` to `status` in one atomic operation; returns rows changed.
    fn update_status_batch(&self, ids: &[i64], status: QueueStatus, now_ms: i64)
        -> PipelineResult<usize>;
    /// Move one pending item to `status`; false if it was not pending.
    fn update_status(&self, id: i64, status: QueueStatus, now_ms: i64) -> PipelineResult<bool>;
    /// Delete items in `status` created before `cutoff_ms`.
    fn delete_older_than(&self, status: QueueStatus, cutoff_ms: i64) -> PipelineResult<usize>;
    /// Number of items in `status`.
    fn count(&self, status: QueueStatus) -> PipelineResult<u64>;
}

/// Out-of-band drain request raised when the backlog is too deep.
pub struct OverflowSignal {
    threshold: u64,
    task: String,
    trigger: Arc<dyn TickTrigger>,
    cooldown_ms: i64,
    last_signal_ms: AtomicI64,
}

impl OverflowSignal {
    /// Request an immediate tick of `task` when more than `threshold` items are
    /// pending, at most once per `cooldown`.
    pub fn new(
        threshold: u64,
        task: impl Into<String>,
        trigger: Arc<dyn TickTrigger>,
        cooldown: Duration,
    ) -> Self {
        Self {
            threshold,
            task: task.into(),
            trigger,
            cooldown_ms: duration_ms(cooldown),
            last_signal_ms: AtomicI64::new(i64::MIN),
        }
    }

    fn maybe_fire(&self, pending: u64, now_ms: i64) {
        if pending <= self.threshold {
            return;
        }
        let last = self.last_signal_ms.load(Ordering::Acquire);
        if last != i64::MIN && now_ms.saturating_sub(last) < self.cooldown_ms {
            return;
        }
        if self
            .last_signal_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::info!(
                task = %self.task,
                pending,
                threshold = self.threshold,
                "queue backlog over threshold; requesting immediate run"
            );
            self.trigger.request_tick(&self.task, Duration::ZERO);
        }
    }
}

/// Capture-facing durable queue.
pub struct DurableQueue {
    backend: Arc<dyn QueueBackend>,
    clock: SharedClock,
    overflow: Option<OverflowSignal>,
}

impl DurableQueue {
    /// Wrap a backend.
    pub fn new(backend: Arc<dyn QueueBackend>, clock: SharedClock) -> Self {
        Self {
            backend,
            clock,
            overflow: None,
        }
    }

    /// Attach a backlog overflow signal.
    #[must_use]
    pub fn with_overflow_signal(mut self, signal: OverflowSignal) -> Self {
        self.overflow = Some(signal);
        self
    }

    /// Append an observation. Returns false on invalid input or store failure;
    /// never panics or propagates errors.
    ///
    /// The payload must serialize to a JSON object. A payload that fails to
    /// serialize is stored as a placeholder instead of being dropped.
    pub fn enqueue<T>(&self, payload: &T, category: &str, subcategory: &str) -> bool
    where
        T: Serialize + ?Sized,
    {
        if let Err(e) = validate_label("category", category)
            .and_then(|()| validate_label("subcategory", subcategory))
        {
            tracing::warn!(category, subcategory, error = %e, "enqueue rejected");
            return false;
        }

        let encoded = match encode_payload(payload) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(category, subcategory, error = %e, "enqueue rejected");
                return false;
            }
        };

        let now = self.clock.now_ms();
        let item = NewQueueItem {
            category: category.trim().to_string(),
            subcategory: subcategory.trim().to_string(),
            payload: encoded,
            created_at_ms: now,
        };

        match self.backend.insert(&item) {
            Ok(id) => {
                tracing::trace!(id, category, subcategory, "enqueued");
            }
            Err(e) => {
                tracing::error!(category, subcategory, error = %e, "failed to persist queue item");
                return false;
            }
        }

        if let Some(signal) = &self.overflow {
            match self.backend.count(QueueStatus::Pending) {
                Ok(pending) => signal.maybe_fire(pending, now),
                Err(e) => tracing::debug!(error = %e, "pending count unavailable"),
            }
        }
        true
    }

    /// Pending items after `cursor`, ascending by id.
    pub fn dequeue_after(&self, cursor: i64, limit: usize) -> PipelineResult<Vec<QueueItem>> {
        self.dequeue_after_with_status(cursor, limit, QueueStatus::Pending)
    }

    /// Items in `status` after `cursor`, ascending by id.
    pub fn dequeue_after_with_status(
        &self,
        cursor: i64,
        limit: usize,
        status: QueueStatus,
    ) -> PipelineResult<Vec<QueueItem>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.backend.fetch_after(cursor, limit, status)
    }

    /// Move pending items to a terminal status.
    ///
    /// Tries one atomic batch update first; if that fails, retries each id on
    /// its own and reports the ids that still could not be updated.
    pub fn mark_batch(&self, ids: &[i64], status: QueueStatus) -> PipelineResult<MarkReport> {
        if !status.is_terminal() {
            return Err(PipelineError::InvalidInput(
                "queue items can only move to processed or failed".into(),
            ));
        }
        if ids.is_empty() {
            return Ok(MarkReport::default());
        }

        let now = self.clock.now_ms();
        match self.backend.update_status_batch(ids, status, now) {
            Ok(updated) => {
                return Ok(MarkReport {
                    updated,
                    skipped: ids.len().saturating_sub(updated),
                    failed_ids: Vec::new(),
                })
            }
            Err(e) => {
                tracing::warn!(
                    count = ids.len(),
                    status = %status,
                    error = %e,
                    "batch status update failed; falling back to per-item updates"
                );
            }
        }

        let mut report = MarkReport::default();
        for &id in ids {
            match self.backend.update_status(id, status, now) {
                Ok(true) => report.updated += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    tracing::error!(id, status = %status, error = %e, "status update failed");
                    report.failed_ids.push(id);
                }
            }
        }
        Ok(report)
    }

    /// Delete terminal items in `status` older than `older_than`.
    ///
    /// Pending items are never purged; asking for them deletes nothing.
    pub fn purge(&self, status: QueueStatus, older_than: Duration) -> PipelineResult<usize> {
        if !status.is_terminal() {
            tracing::warn!("refusing to purge pending queue items");
            return Ok(0);
        }
        let cutoff = self.clock.now_ms().saturating_sub(duration_ms(older_than));
        let deleted = self.backend.delete_older_than(status, cutoff)?;
        if deleted > 0 {
            tracing::info!(status = %status, deleted, "purged old queue items");
        }
        Ok(deleted)
    }

    /// Number of items in `status`.
    pub fn count(&self, status: QueueStatus) -> PipelineResult<u64> {
        self.backend.count(status)
    }

    /// Counts for every status.
    pub fn stats(&self) -> PipelineResult<QueueStats> {
        Ok(QueueStats {
            pending: self.backend.count(QueueStatus::Pending)?,
            processed: self.backend.count(QueueStatus::Processed)?,
            failed: self.backend.count(QueueStatus::Failed)?,
        })
    }
}

fn validate_label(field: &str, value: &str) -> PipelineResult<()> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::InvalidInput(format!("{field} must not be empty")));
    }
    if trimmed.len() > MAX_CATEGORY_LEN {
        return Err(PipelineError::InvalidInput(format!(
            "{field} longer than {MAX_CATEGORY_LEN} bytes"
        )));
    }
    Ok(())
}

/// Serialize a capture payload to a JSON object string.
///
/// Non-object and empty-object payloads are invalid input. Serialization
/// failures produce a placeholder object rather than an error.
pub fn encode_payload<T>(payload: &T) -> PipelineResult<String>
where
    T: Serialize + ?Sized,
{
    match serde_json::to_value(payload) {
        Ok(Value::Object(map)) if map.is_empty() => Err(PipelineError::InvalidInput(
            "payload must not be empty".into(),
        )),
        Ok(Value::Object(map)) => Ok(Value::Object(map).to_string()),
        Ok(other) => Err(PipelineError::InvalidInput(format!(
            "payload must be an object, got {}",
            json_kind(&other)
        ))),
        Err(e) => {
            tracing::warn!(error = %e, "payload could not be encoded; storing placeholder");
            Ok(placeholder_payload(&e.to_string()).to_string())
        }
    }
}

/// Placeholder stored in place of a payload that could not be encoded.
pub fn placeholder_payload(reason: &str) -> Value {
    serde_json::json!({
        "_encoding_error": "could not encode payload",
        "reason": reason,
    })
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
