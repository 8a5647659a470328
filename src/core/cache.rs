//! Key/group TTL cache over the durable store.
//!
//! Expired rows are logically absent: [`QueryCache::get`] treats them as a
//! miss whether or not a sweep has removed them yet. Sweeping only bounds
//! storage growth.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::core::PipelineResult;
use crate::util::clock::{duration_ms, SharedClock};

/// A stored cache row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Key, unique within its group.
    pub key: String,
    /// Group namespace.
    pub group: String,
    /// Serialized JSON value.
    pub value: String,
    /// Write time, ms since epoch.
    pub created_at_ms: i64,
    /// Expiry time, ms since epoch.
    pub expires_at_ms: i64,
}

impl CacheEntry {
    /// Whether the entry is expired at `now_ms`.
    pub const fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms <= now_ms
    }
}

/// Storage contract for cache backends.
pub trait CacheStore: Send + Sync {
    /// Row for `(key, group)`, expired or not.
    fn fetch(&self, key: &str, group: &str) -> PipelineResult<Option<CacheEntry>>;
    /// Insert or overwrite the row for `(entry.key, entry.group)`.
    fn upsert(&self, entry: &CacheEntry) -> PipelineResult<()>;
    /// Delete one row; true if it existed.
    fn remove(&self, key: &str, group: &str) -> PipelineResult<bool>;
    /// Delete every row in a group.
    fn remove_group(&self, group: &str) -> PipelineResult<usize>;
    /// Delete rows with `expires_at <= now_ms`.
    fn remove_expired(&self, now_ms: i64) -> PipelineResult<usize>;
}

/// TTL cache used to avoid repeating expensive lookups.
pub struct QueryCache {
    store: Arc<dyn CacheStore>,
    clock: SharedClock,
    default_ttl: Duration,
}

impl QueryCache {
    /// Create a cache with a default TTL for `set` calls without one.
    pub fn new(store: Arc<dyn CacheStore>, clock: SharedClock, default_ttl: Duration) -> Self {
        Self {
            store,
            clock,
            default_ttl,
        }
    }

    /// TTL applied when `set` is called without one.
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Cached value, or `None` when absent, expired or unreadable.
    pub fn get(&self, key: &str, group: &str) -> Option<Value> {
        let entry = match self.store.fetch(key, group) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, group, error = %e, "cache read failed");
                return None;
            }
        };
        if entry.is_expired(self.clock.now_ms()) {
            return None;
        }
        match serde_json::from_str(&entry.value) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, group, error = %e, "cached value is not valid JSON");
                None
            }
        }
    }

    /// Cached value decoded as `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str, group: &str) -> Option<T> {
        self.get(key, group)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Store a value. `ttl` of `None` uses the default; a zero TTL is rejected.
    pub fn set<T>(&self, key: &str, group: &str, value: &T, ttl: Option<Duration>) -> bool
    where
        T: Serialize + ?Sized,
    {
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl.is_zero() || key.is_empty() {
            tracing::warn!(key, group, "cache set rejected: empty key or zero ttl");
            return false;
        }
        let value = match serde_json::to_string(value) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, group, error = %e, "cache value could not be encoded");
                return false;
            }
        };
        let now = self.clock.now_ms();
        let entry = CacheEntry {
            key: key.to_string(),
            group: group.to_string(),
            value,
            created_at_ms: now,
            expires_at_ms: now.saturating_add(duration_ms(ttl)),
        };
        match self.store.upsert(&entry) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, group, error = %e, "cache write failed");
                false
            }
        }
    }

    /// Cached value, computing and storing it on a miss.
    pub fn remember<T, F>(&self, key: &str, group: &str, ttl: Option<Duration>, compute: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        if let Some(hit) = self.get_as::<T>(key, group) {
            return hit;
        }
        let value = compute();
        self.set(key, group, &value, ttl);
        value
    }

    /// Remove one entry.
    pub fn delete(&self, key: &str, group: &str) -> bool {
        self.store.remove(key, group).unwrap_or_else(|e| {
            tracing::warn!(key, group, error = %e, "cache delete failed");
            false
        })
    }

    /// Remove every entry in a group.
    pub fn flush_group(&self, group: &str) -> usize {
        self.store.remove_group(group).unwrap_or_else(|e| {
            tracing::warn!(group, error = %e, "cache group flush failed");
            0
        })
    }

    /// Physically remove expired entries.
    pub fn sweep_expired(&self) -> PipelineResult<usize> {
        let removed = self.store.remove_expired(self.clock.now_ms())?;
        if removed > 0 {
            tracing::debug!(removed, "swept expired cache entries");
        }
        Ok(removed)
    }
}
