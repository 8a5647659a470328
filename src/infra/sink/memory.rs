//! In-memory event storage for tests.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::core::{EventSink, NewEvent, PipelineError, PipelineResult};

#[derive(Default)]
struct Inner {
    events: Vec<NewEvent>,
    seen: HashSet<i64>,
    fail_queue_ids: HashSet<i64>,
}

/// Event storage kept in process memory. Can be told to reject specific
/// queue ids to simulate transient storage failures.
#[derive(Default)]
pub struct InMemoryEventSink {
    inner: Mutex<Inner>,
}

impl InMemoryEventSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make inserts for `queue_id` fail.
    pub fn fail_on(&self, queue_id: i64) {
        self.inner.lock().fail_queue_ids.insert(queue_id);
    }

    /// Stored events in insertion order.
    pub fn events(&self) -> Vec<NewEvent> {
        self.inner.lock().events.clone()
    }

    /// Queue ids of stored events in insertion order.
    pub fn queue_ids(&self) -> Vec<i64> {
        self.inner.lock().events.iter().map(|e| e.queue_id).collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn insert_event(&self, event: &NewEvent) -> PipelineResult<bool> {
        let mut inner = self.inner.lock();
        if inner.fail_queue_ids.contains(&event.queue_id) {
            return Err(PipelineError::Storage(format!(
                "simulated insert failure for queue item {}",
                event.queue_id
            )));
        }
        if !inner.seen.insert(event.queue_id) {
            return Ok(false);
        }
        inner.events.push(event.clone());
        Ok(true)
    }
}
