//! Tick drivers and the status API surface.

pub mod api;
pub mod driver;
#[cfg(feature = "tokio-runtime")]
pub mod tokio_driver;

pub use api::{health, pipeline_status, Health, PipelineStatus, TaskCursor};
pub use driver::{ChannelTrigger, DriverHandle, TickDriver};
#[cfg(feature = "tokio-runtime")]
pub use tokio_driver::{spawn_tokio, TokioDriverHandle};
