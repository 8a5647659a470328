//! # Site Pipeline
//!
//! A crash-safe, resumable event pipeline for monitoring agents that run under
//! hard per-invocation time and memory limits.
//!
//! Observations are captured cheaply into a durable queue and drained later,
//! in bounded chunks, into permanent event storage. Every long-running task
//! runs under a tiered resource budget; when the budget is spent the task
//! suspends, persists its cursor and asks for a continuation tick, so no item
//! is lost or stored twice across interruptions.
//!
//! ## Key Features
//!
//! - **Durable Queue**: Append-only, crash-safe capture with strictly increasing ids
//! - **Budget Enforcement**: Critical, standard, intensive and report tiers with time, memory and operation ceilings
//! - **Resumable Processing**: Chunked drains that suspend at chunk boundaries and resume from a persisted cursor
//! - **Task Scheduling**: Named tasks with per-task locks, run history and stale-lock recovery
//! - **Query Cache**: Key/group TTL cache over the same store
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use site_pipeline::builders::Pipeline;
//! use site_pipeline::config::PipelineConfig;
//! use site_pipeline::core::DRAIN_TASK;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = PipelineConfig::default();
//! config.database_path = Some("pipeline.db".into());
//! let mut pipeline = Pipeline::from_config(config)?;
//!
//! pipeline.enqueue(&serde_json::json!({"url": "/checkout", "ms": 812}), "performance", "slow_page");
//! pipeline.on_tick(DRAIN_TASK);
//!
//! // Or let a background driver deliver periodic and continuation ticks.
//! if let Some(driver) = pipeline.take_driver() {
//!     let handle = driver.spawn()?;
//!     handle.shutdown();
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core pipeline abstractions: queue, budgets, processor, scheduler and cache.
pub mod core;
/// Configuration models for the pipeline, its tiers and its tasks.
pub mod config;
/// Builders that assemble a pipeline from configuration.
pub mod builders;
/// Infrastructure adapters for the durable store and in-memory backends.
pub mod infra;
/// Tick drivers and the status API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
