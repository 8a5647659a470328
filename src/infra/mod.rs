//! Infrastructure adapters for queues, run ledgers, event storage and the shared store.

pub mod cache;
pub mod ledger;
pub mod queue;
pub mod sink;
pub mod store;

pub use cache::SqliteCacheStore;
pub use ledger::{InMemoryLedger, SqliteLedger};
pub use queue::{InMemoryQueue, SqliteQueue};
pub use sink::{InMemoryEventSink, SqliteEventSink};
pub use store::SqliteStore;
