//! Permanent event storage contract.

use serde::{Deserialize, Serialize};

use crate::core::PipelineResult;

/// Enriched event handed to storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Source queue item; storage keeps at most one event per queue id.
    pub queue_id: i64,
    /// Event category.
    pub category: String,
    /// Event subcategory.
    pub subcategory: String,
    /// Enriched JSON payload.
    pub payload: serde_json::Value,
    /// When the observation was captured, ms since epoch.
    pub captured_at_ms: i64,
    /// When the pipeline stored it, ms since epoch.
    pub processed_at_ms: i64,
}

/// Durable, append-only record of a processed observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Storage identifier.
    pub id: i64,
    /// Source queue item.
    pub queue_id: i64,
    /// Event category.
    pub category: String,
    /// Event subcategory.
    pub subcategory: String,
    /// Enriched JSON payload.
    pub payload: serde_json::Value,
    /// Capture time, ms since epoch.
    pub captured_at_ms: i64,
    /// Processing time, ms since epoch.
    pub processed_at_ms: i64,
}

/// Permanent event storage.
pub trait EventSink: Send + Sync {
    /// Store an event. Returns false when an event for the same queue id is
    /// already stored, which makes re-delivery harmless.
    fn insert_event(&self, event: &NewEvent) -> PipelineResult<bool>;
}
