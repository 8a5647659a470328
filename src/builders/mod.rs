//! Builders that assemble a pipeline from configuration.

pub mod pipeline_builder;

pub use pipeline_builder::{Pipeline, PipelineBuilder};
