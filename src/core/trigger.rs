//! Seam to the external tick source.
//!
//! The scheduler never sleeps or spawns on its own. When it wants a task to
//! run again soon (after a suspension, or when the queue overflows) it asks
//! the trigger collaborator for a tick.

use std::time::Duration;

use parking_lot::Mutex;

/// A request for a future tick of a named task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickRequest {
    /// Task to tick.
    pub task: String,
    /// Delay before the tick; zero means as soon as possible.
    pub delay: Duration,
}

/// External mechanism that delivers ticks to the scheduler.
pub trait TickTrigger: Send + Sync {
    /// Ask for `task` to be ticked after `delay`. Best effort; a lost request
    /// only delays progress until the next periodic tick.
    fn request_tick(&self, task: &str, delay: Duration);
}

/// Trigger that drops every request. Periodic ticks still drive progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTrigger;

impl TickTrigger for NoopTrigger {
    fn request_tick(&self, task: &str, delay: Duration) {
        tracing::trace!(task, delay_ms = delay.as_millis(), "tick request dropped");
    }
}

/// Trigger that records requests for later inspection.
#[derive(Debug, Default)]
pub struct RecordingTrigger {
    requests: Mutex<Vec<TickRequest>>,
}

impl RecordingTrigger {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<TickRequest> {
        self.requests.lock().clone()
    }

    /// Remove and return recorded requests.
    pub fn take(&self) -> Vec<TickRequest> {
        std::mem::take(&mut *self.requests.lock())
    }
}

impl TickTrigger for RecordingTrigger {
    fn request_tick(&self, task: &str, delay: Duration) {
        self.requests.lock().push(TickRequest {
            task: task.to_string(),
            delay,
        });
    }
}
