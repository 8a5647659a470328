//! Tests for the TTL query cache over SQLite

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use site_pipeline::core::QueryCache;
use site_pipeline::infra::{SqliteCacheStore, SqliteStore};
use site_pipeline::util::clock::ManualClock;

fn cache() -> (QueryCache, SqliteCacheStore, ManualClock) {
    let clock = ManualClock::new(1_700_000_000_000);
    let store = SqliteCacheStore::new(SqliteStore::open_in_memory().unwrap());
    let cache = QueryCache::new(
        Arc::new(store.clone()),
        Arc::new(clock.clone()),
        Duration::from_secs(3_600),
    );
    (cache, store, clock)
}

#[test]
fn test_expired_row_is_a_miss_before_sweep() {
    let (cache, store, clock) = cache();
    assert!(cache.set("top_pages", "reports", &serde_json::json!(["/", "/blog"]), Some(Duration::from_secs(1))));
    assert_eq!(
        cache.get("top_pages", "reports"),
        Some(serde_json::json!(["/", "/blog"]))
    );

    clock.advance(Duration::from_millis(1_001));
    assert_eq!(cache.get("top_pages", "reports"), None);
    assert_eq!(store.row_count().unwrap(), 1);

    assert_eq!(cache.sweep_expired().unwrap(), 1);
    assert_eq!(store.row_count().unwrap(), 0);
}

#[test]
fn test_set_upserts_on_key_and_group() {
    let (cache, store, _clock) = cache();
    assert!(cache.set("k", "a", &1, None));
    assert!(cache.set("k", "a", &2, None));
    assert!(cache.set("k", "b", &3, None));
    assert_eq!(store.row_count().unwrap(), 2);
    assert_eq!(cache.get_as::<i32>("k", "a"), Some(2));
    assert_eq!(cache.get_as::<i32>("k", "b"), Some(3));
}

#[test]
fn test_default_ttl_applies() {
    let (cache, _store, clock) = cache();
    assert!(cache.set("k", "g", &"v", None));
    clock.advance(Duration::from_secs(3_599));
    assert!(cache.get("k", "g").is_some());
    clock.advance(Duration::from_secs(1));
    assert!(cache.get("k", "g").is_none());
}

#[test]
fn test_typed_values() {
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Summary {
        visits: u64,
        errors: u64,
    }

    let (cache, _store, _clock) = cache();
    let summary = Summary {
        visits: 120,
        errors: 3,
    };
    assert!(cache.set("daily", "summaries", &summary, None));
    assert_eq!(cache.get_as::<Summary>("daily", "summaries"), Some(summary));
    // A value of the wrong shape reads as a miss.
    assert_eq!(cache.get_as::<Vec<u8>>("daily", "summaries"), None);
}

#[test]
fn test_flush_group_leaves_other_groups() {
    let (cache, _store, _clock) = cache();
    cache.set("a", "g1", &1, None);
    cache.set("b", "g1", &2, None);
    cache.set("a", "g2", &3, None);
    assert_eq!(cache.flush_group("g1"), 2);
    assert!(cache.get("a", "g1").is_none());
    assert!(cache.get("a", "g2").is_some());
}
