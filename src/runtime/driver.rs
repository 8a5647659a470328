//! Thread-based tick source.
//!
//! The scheduler itself never sleeps. [`TickDriver`] owns the timing: it ticks
//! every registered task at its interval and honours the continuation and
//! overflow requests that arrive through a [`ChannelTrigger`].

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, never, select, unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::core::{TaskScheduler, TickReport, TickRequest, TickTrigger};

/// Longest the driver sleeps when nothing is due.
const MAX_IDLE: Duration = Duration::from_secs(60);

/// Trigger that forwards tick requests over a channel to a [`TickDriver`].
#[derive(Debug, Clone)]
pub struct ChannelTrigger {
    tx: Sender<TickRequest>,
}

impl ChannelTrigger {
    /// Create a trigger and the receiver the driver reads from.
    pub fn new() -> (Self, Receiver<TickRequest>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl TickTrigger for ChannelTrigger {
    fn request_tick(&self, task: &str, delay: Duration) {
        let request = TickRequest {
            task: task.to_string(),
            delay,
        };
        if self.tx.send(request).is_err() {
            debug!(task, "tick driver gone; request dropped");
        }
    }
}

/// Delivers periodic and requested ticks to a [`TaskScheduler`].
pub struct TickDriver {
    scheduler: Arc<TaskScheduler>,
    requests: Receiver<TickRequest>,
    next_periodic: HashMap<String, Instant>,
    requested: Vec<(Instant, String)>,
}

impl TickDriver {
    /// Driver for `scheduler`, reading extra requests from `requests`.
    pub fn new(scheduler: Arc<TaskScheduler>, requests: Receiver<TickRequest>) -> Self {
        Self {
            scheduler,
            requests,
            next_periodic: HashMap::new(),
            requested: Vec::new(),
        }
    }

    /// Queue a requested tick relative to `now`.
    pub fn push_request(&mut self, request: TickRequest, now: Instant) {
        let due = now + request.delay;
        if let Some(slot) = self.requested.iter_mut().find(|(_, task)| *task == request.task) {
            // Keep the earliest pending request per task.
            if due < slot.0 {
                slot.0 = due;
            }
            return;
        }
        self.requested.push((due, request.task));
    }

    /// Tick every task that is due at `now` and return what happened.
    ///
    /// Tasks not seen before are due immediately; each periodic tick schedules
    /// the next one an interval later.
    pub fn step(&mut self, now: Instant) -> Vec<(String, TickReport)> {
        let mut due: Vec<String> = Vec::new();

        for task in self.scheduler.tasks() {
            let interval = Duration::from_secs(task.interval_secs.max(1));
            let next = self.next_periodic.entry(task.name.clone()).or_insert(now);
            if *next <= now {
                *next = now + interval;
                due.push(task.name);
            }
        }

        self.requested.retain(|(at, task)| {
            if *at <= now {
                if !due.contains(task) {
                    due.push(task.clone());
                }
                false
            } else {
                true
            }
        });

        due.into_iter()
            .map(|task| {
                let report = self.scheduler.on_tick(&task);
                (task, report)
            })
            .collect()
    }

    fn next_deadline(&self, now: Instant) -> Instant {
        self.next_periodic
            .values()
            .chain(self.requested.iter().map(|(at, _)| at))
            .copied()
            .min()
            .unwrap_or(now + MAX_IDLE)
            .min(now + MAX_IDLE)
    }

    /// Run until `shutdown` receives a message or disconnects.
    pub fn run_until(mut self, shutdown: &Receiver<()>) {
        info!("tick driver started");
        loop {
            let now = Instant::now();
            for (task, report) in self.step(now) {
                if let TickReport::Failed { error, .. } = &report {
                    warn!(task = %task, error = %error, "scheduled run failed");
                }
            }

            let wait = self.next_deadline(now).saturating_duration_since(Instant::now());
            let requests = self.requests.clone();
            select! {
                recv(requests) -> msg => match msg {
                    Ok(request) => self.push_request(request, Instant::now()),
                    Err(_) => {
                        debug!("tick request channel closed; periodic ticks only");
                        self.requests = never();
                    }
                },
                recv(shutdown) -> _ => break,
                default(wait) => {}
            }
        }
        info!("tick driver stopped");
    }

    /// Run the driver on a dedicated thread.
    pub fn spawn(self) -> std::io::Result<DriverHandle> {
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let thread = thread::Builder::new()
            .name("pipeline-ticks".to_string())
            .spawn(move || self.run_until(&shutdown_rx))?;
        Ok(DriverHandle {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

/// Handle to a driver thread. Dropping it stops the driver without waiting.
pub struct DriverHandle {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DriverHandle {
    /// Stop the driver and wait for the in-flight tick to finish.
    pub fn shutdown(mut self) {
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("tick driver thread panicked");
            }
        }
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the driver's select.
        self.shutdown.take();
    }
}
