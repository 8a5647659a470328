//! Tests for the SQLite run ledger across connections

use site_pipeline::core::{
    ProcessingState, RunLedger, RunLock, RunStatus, Tier, STALE_RUN_MESSAGE,
};
use site_pipeline::infra::{SqliteLedger, SqliteStore};

const HOUR_MS: i64 = 3_600_000;

#[test]
fn test_lock_is_shared_between_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let first = SqliteLedger::new(SqliteStore::open(&path).unwrap());
    let second = SqliteLedger::new(SqliteStore::open(&path).unwrap());

    let RunLock::Acquired { run, .. } = first.begin_run("drain_queue", Tier::Standard, 0, HOUR_MS).unwrap()
    else {
        panic!("first connection should take the lock");
    };
    assert!(matches!(
        second.begin_run("drain_queue", Tier::Standard, 10, HOUR_MS).unwrap(),
        RunLock::Held(_)
    ));

    first
        .finish_run(&run.run_id, RunStatus::Completed, None, 20)
        .unwrap();
    assert!(matches!(
        second.begin_run("drain_queue", Tier::Standard, 30, HOUR_MS).unwrap(),
        RunLock::Acquired { reaped: 0, .. }
    ));
}

#[test]
fn test_superseded_run_cannot_overwrite_its_failure() {
    let ledger = SqliteLedger::new(SqliteStore::open_in_memory().unwrap());
    let RunLock::Acquired { run: slow, .. } = ledger.begin_run("drain_queue", Tier::Standard, 0, 1_000).unwrap()
    else {
        panic!("expected lock");
    };
    let RunLock::Acquired { run: fresh, reaped } = ledger.begin_run("drain_queue", Tier::Standard, 5_000, 1_000).unwrap()
    else {
        panic!("stale lock should be taken over");
    };
    assert_eq!(reaped, 1);

    ledger
        .finish_run(&slow.run_id, RunStatus::Completed, None, 6_000)
        .unwrap();
    ledger
        .finish_run(&fresh.run_id, RunStatus::Completed, None, 6_500)
        .unwrap();

    let runs = ledger.recent_runs(Some("drain_queue"), 10).unwrap();
    let slow = runs.iter().find(|r| r.run_id == slow.run_id).unwrap();
    assert_eq!(slow.status, RunStatus::Failed);
    assert_eq!(slow.error_message.as_deref(), Some(STALE_RUN_MESSAGE));
    assert_eq!(slow.end_time_ms, Some(5_000));
    let fresh = runs.iter().find(|r| r.run_id == fresh.run_id).unwrap();
    assert_eq!(fresh.status, RunStatus::Completed);
}

#[test]
fn test_cursor_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let state = ProcessingState {
        last_queue_id: 6,
        processed_count: 5,
        failed_count: 1,
    };
    {
        let ledger = SqliteLedger::new(SqliteStore::open(&path).unwrap());
        ledger.save_state("drain_queue", &state, 100).unwrap();
    }
    let ledger = SqliteLedger::new(SqliteStore::open(&path).unwrap());
    assert_eq!(ledger.load_state("drain_queue").unwrap(), Some(state));
    assert_eq!(ledger.states().unwrap(), vec![("drain_queue".to_string(), state)]);

    ledger.clear_state("drain_queue").unwrap();
    assert_eq!(ledger.load_state("drain_queue").unwrap(), None);
}

#[test]
fn test_prune_keeps_running_and_recent_runs() {
    let ledger = SqliteLedger::new(SqliteStore::open_in_memory().unwrap());
    let RunLock::Acquired { run: old, .. } = ledger.begin_run("a", Tier::Critical, 0, HOUR_MS).unwrap()
    else {
        panic!("expected lock");
    };
    ledger
        .finish_run(&old.run_id, RunStatus::Failed, Some("boom"), 5)
        .unwrap();
    ledger.begin_run("b", Tier::Critical, 10, HOUR_MS).unwrap();
    let RunLock::Acquired { run: recent, .. } = ledger.begin_run("c", Tier::Critical, 10 * HOUR_MS, HOUR_MS).unwrap()
    else {
        panic!("expected lock");
    };
    ledger
        .finish_run(&recent.run_id, RunStatus::Completed, None, 10 * HOUR_MS + 1)
        .unwrap();

    assert_eq!(ledger.prune_runs(HOUR_MS).unwrap(), 1);
    let remaining: Vec<String> = ledger
        .recent_runs(None, 10)
        .unwrap()
        .into_iter()
        .map(|r| r.task_name)
        .collect();
    assert_eq!(remaining, vec!["c".to_string(), "b".to_string()]);

    let failed = ledger.recent_runs(Some("a"), 10).unwrap();
    assert!(failed.is_empty());
}
