//! Queue backends.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryQueue;
pub use sqlite::SqliteQueue;
