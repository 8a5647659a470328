//! Tests for the durable queue over SQLite

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde::Serialize;
use site_pipeline::core::{
    DurableQueue, OverflowSignal, QueueStatus, RecordingTrigger, MAX_CATEGORY_LEN,
};
use site_pipeline::infra::{SqliteQueue, SqliteStore};
use site_pipeline::util::clock::ManualClock;

const DAY: Duration = Duration::from_secs(86_400);

fn queue(clock: &ManualClock) -> DurableQueue {
    let backend = SqliteQueue::new(SqliteStore::open_in_memory().unwrap());
    DurableQueue::new(Arc::new(backend), Arc::new(clock.clone()))
}

fn ids(queue: &DurableQueue, cursor: i64, limit: usize) -> Vec<i64> {
    queue
        .dequeue_after(cursor, limit)
        .unwrap()
        .iter()
        .map(|item| item.id)
        .collect()
}

#[test]
fn test_enqueue_validates_labels() {
    let clock = ManualClock::new(0);
    let q = queue(&clock);
    let payload = serde_json::json!({"url": "/"});
    assert!(!q.enqueue(&payload, "", "page_view"));
    assert!(!q.enqueue(&payload, "traffic", "   "));
    assert!(!q.enqueue(&payload, &"c".repeat(MAX_CATEGORY_LEN + 1), "x"));
    assert!(q.enqueue(&payload, &"c".repeat(MAX_CATEGORY_LEN), "x"));
    assert_eq!(q.count(QueueStatus::Pending).unwrap(), 1);
}

#[test]
fn test_enqueue_rejects_non_object_payload() {
    let clock = ManualClock::new(0);
    let q = queue(&clock);
    assert!(!q.enqueue(&vec![1, 2, 3], "traffic", "page_view"));
    assert!(!q.enqueue("just a string", "traffic", "page_view"));
    assert!(!q.enqueue(&serde_json::json!({}), "traffic", "page_view"));
    assert_eq!(q.count(QueueStatus::Pending).unwrap(), 0);
}

#[test]
fn test_typed_payload_is_stored_as_object() {
    #[derive(Serialize)]
    struct SlowPage<'a> {
        url: &'a str,
        duration_ms: u64,
    }

    let clock = ManualClock::new(42);
    let q = queue(&clock);
    assert!(q.enqueue(
        &SlowPage {
            url: "/checkout",
            duration_ms: 812
        },
        "performance",
        "slow_page"
    ));
    let item = &q.dequeue_after(0, 10).unwrap()[0];
    assert_eq!(item.created_at_ms, 42);
    assert_eq!(item.status, QueueStatus::Pending);
    let map = item.payload_map().unwrap();
    assert_eq!(map["url"], "/checkout");
    assert_eq!(map["duration_ms"], 812);
}

#[test]
fn test_dequeue_after_cursor() {
    let clock = ManualClock::new(0);
    let q = queue(&clock);
    for n in 0..5 {
        assert!(q.enqueue(&serde_json::json!({ "n": n }), "t", "s"));
    }
    let all = ids(&q, 0, 10);
    assert_eq!(all.len(), 5);
    assert_eq!(ids(&q, all[2], 10), all[3..].to_vec());
    assert!(q.dequeue_after(0, 0).unwrap().is_empty());
}

#[test]
fn test_mark_batch_is_guarded() {
    let clock = ManualClock::new(0);
    let q = queue(&clock);
    for n in 0..3 {
        q.enqueue(&serde_json::json!({ "n": n }), "t", "s");
    }
    let all = ids(&q, 0, 10);

    let report = q.mark_batch(&all[..2], QueueStatus::Processed).unwrap();
    assert_eq!(report.updated, 2);

    // Terminal items never move again.
    let report = q.mark_batch(&all, QueueStatus::Failed).unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.skipped, 2);

    let stats = q.stats().unwrap();
    assert_eq!((stats.pending, stats.processed, stats.failed), (0, 2, 1));

    assert!(q.mark_batch(&all, QueueStatus::Pending).is_err());
}

#[test]
fn test_purge_respects_status_and_age() {
    let clock = ManualClock::new(1_700_000_000_000);
    let q = queue(&clock);
    for n in 0..3 {
        q.enqueue(&serde_json::json!({ "old": n }), "t", "s");
    }
    let old = ids(&q, 0, 10);
    q.mark_batch(&old[..2], QueueStatus::Processed).unwrap();

    clock.advance(DAY * 6);
    q.enqueue(&serde_json::json!({ "young": 1 }), "t", "s");
    let young = ids(&q, old[2], 10)[0];
    q.mark_batch(&[young], QueueStatus::Processed).unwrap();

    clock.advance(DAY * 2);
    assert_eq!(q.purge(QueueStatus::Processed, DAY * 7).unwrap(), 2);
    assert_eq!(q.purge(QueueStatus::Pending, DAY * 7).unwrap(), 0);

    let stats = q.stats().unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.pending, 1);
}

#[test]
fn test_overflow_signal_respects_cooldown() {
    let clock = ManualClock::new(0);
    let trigger = Arc::new(RecordingTrigger::new());
    let q = queue(&clock).with_overflow_signal(OverflowSignal::new(
        2,
        "drain_queue",
        trigger.clone(),
        Duration::from_secs(60),
    ));

    for n in 0..5 {
        q.enqueue(&serde_json::json!({ "n": n }), "t", "s");
    }
    let requests = trigger.take();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].task, "drain_queue");
    assert_eq!(requests[0].delay, Duration::ZERO);

    clock.advance(Duration::from_secs(61));
    q.enqueue(&serde_json::json!({ "n": 6 }), "t", "s");
    assert_eq!(trigger.take().len(), 1);
}

#[test]
fn test_items_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");
    let clock = ManualClock::new(0);
    {
        let backend = SqliteQueue::new(SqliteStore::open(&path).unwrap());
        let q = DurableQueue::new(Arc::new(backend), Arc::new(clock.clone()));
        assert!(q.enqueue(&serde_json::json!({"k": "v"}), "t", "s"));
    }
    let backend = SqliteQueue::new(SqliteStore::open(&path).unwrap());
    let q = DurableQueue::new(Arc::new(backend), Arc::new(clock));
    assert_eq!(q.dequeue_after(0, 10).unwrap().len(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_fifo_and_cursor(values in proptest::collection::vec(any::<i32>(), 1..40), cut in 0usize..40) {
        let clock = ManualClock::new(0);
        let q = queue(&clock);
        for v in &values {
            let payload = serde_json::json!({ "v": v });
            prop_assert!(q.enqueue(&payload, "t", "s"));
        }

        let items = q.dequeue_after(0, values.len()).unwrap();
        let seen: Vec<i64> = items
            .iter()
            .map(|item| item.payload_map().unwrap()["v"].as_i64().unwrap())
            .collect();
        let expected: Vec<i64> = values.iter().map(|v| i64::from(*v)).collect();
        prop_assert_eq!(seen, expected);
        prop_assert!(items.windows(2).all(|w| w[0].id < w[1].id));

        let k = items[cut.min(items.len() - 1)].id;
        let after = q.dequeue_after(k, values.len()).unwrap();
        prop_assert!(after.iter().all(|item| item.id > k));
    }
}
