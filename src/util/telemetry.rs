//! Telemetry helpers for structured logging.

/// Install a default `tracing` subscriber driven by `RUST_LOG`.
///
/// Hosts that embed the pipeline usually install their own subscriber; this
/// is a no-op when one is already set.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .try_init();
}
