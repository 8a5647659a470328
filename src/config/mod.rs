//! Configuration models for the pipeline, its tiers and its tasks.

pub mod pipeline;

pub use pipeline::PipelineConfig;
