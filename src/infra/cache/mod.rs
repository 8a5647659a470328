//! Cache backends.

pub mod sqlite;

pub use sqlite::SqliteCacheStore;
