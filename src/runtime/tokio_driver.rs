//! Tokio integration for the tick driver.
//!
//! Ticks run blocking SQLite work, so the driver loop lives on the blocking
//! pool rather than on an async worker.

use crossbeam_channel::{bounded, Sender};

use crate::runtime::driver::TickDriver;

/// Handle to a driver running under tokio.
pub struct TokioDriverHandle {
    shutdown: Sender<()>,
    join: tokio::task::JoinHandle<()>,
}

impl TokioDriverHandle {
    /// Stop the driver and wait for it to exit.
    pub async fn shutdown(self) {
        drop(self.shutdown);
        if let Err(e) = self.join.await {
            tracing::warn!(error = %e, "tick driver task ended abnormally");
        }
    }
}

/// Run `driver` on the current tokio runtime's blocking pool.
///
/// Must be called from within a tokio runtime.
pub fn spawn_tokio(driver: TickDriver) -> TokioDriverHandle {
    let (shutdown, shutdown_rx) = bounded(1);
    let join = tokio::task::spawn_blocking(move || driver.run_until(&shutdown_rx));
    TokioDriverHandle { shutdown, join }
}
