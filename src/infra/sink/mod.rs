//! Event storage backends.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryEventSink;
pub use sqlite::SqliteEventSink;
