//! Tests for tiered budget enforcement

use std::collections::HashMap;
use std::time::{Duration, Instant};

use site_pipeline::core::{BudgetEnforcer, BudgetVerdict, ResourceSnapshot, Tier, TierBudget};

const MIB: u64 = 1024 * 1024;

#[test]
fn test_critical_continues_at_start() {
    let enforcer = BudgetEnforcer::default();
    let start = ResourceSnapshot::new(Instant::now(), 100 * MIB);
    assert!(enforcer.should_continue(Tier::Critical, &start, &start, 0));
}

#[test]
fn test_time_ceiling_with_memory_constant() {
    let enforcer = BudgetEnforcer::default();
    let t0 = Instant::now();
    let start = ResourceSnapshot::new(t0, 100 * MIB);

    let at_limit = ResourceSnapshot::new(t0 + Duration::from_millis(2_000), 100 * MIB);
    assert!(enforcer.should_continue(Tier::Critical, &start, &at_limit, 0));

    let past_limit = ResourceSnapshot::new(t0 + Duration::from_millis(2_001), 100 * MIB);
    assert_eq!(
        enforcer.check(Tier::Critical, &start, &past_limit, 0),
        BudgetVerdict::TimeExceeded {
            elapsed_ms: 2_001,
            limit_ms: 2_000
        }
    );
    // The same elapsed time is well inside the standard tier.
    assert!(enforcer.should_continue(Tier::Standard, &start, &past_limit, 0));
}

#[test]
fn test_memory_ceiling_with_time_constant() {
    let enforcer = BudgetEnforcer::default();
    let t0 = Instant::now();
    let start = ResourceSnapshot::new(t0, 100 * MIB);

    let grown = ResourceSnapshot::new(t0, 108 * MIB);
    assert!(enforcer.should_continue(Tier::Critical, &start, &grown, 0));

    let over = ResourceSnapshot::new(t0, 108 * MIB + 1);
    assert!(matches!(
        enforcer.check(Tier::Critical, &start, &over, 0),
        BudgetVerdict::MemoryExceeded { .. }
    ));
}

#[test]
fn test_shrinking_memory_never_exceeds() {
    let enforcer = BudgetEnforcer::default();
    let t0 = Instant::now();
    let start = ResourceSnapshot::new(t0, 500 * MIB);
    let shrunk = ResourceSnapshot::new(t0, 10 * MIB);
    assert!(enforcer.should_continue(Tier::Critical, &start, &shrunk, 0));
}

#[test]
fn test_operation_ceiling_override() {
    let enforcer = BudgetEnforcer::new(HashMap::from([(
        Tier::Intensive,
        TierBudget::new(60_000, 512 * MIB).with_max_operations(100),
    )]));
    let start = ResourceSnapshot::new(Instant::now(), 0);
    assert!(enforcer.should_continue(Tier::Intensive, &start, &start, 100));
    assert_eq!(
        enforcer.check(Tier::Intensive, &start, &start, 101),
        BudgetVerdict::OperationsExceeded {
            operations: 101,
            limit: 100
        }
    );
    // Tiers without an operation ceiling ignore the counter.
    assert!(enforcer.should_continue(Tier::Report, &start, &start, u64::MAX));
}

#[test]
fn test_tier_names_round_trip() {
    for tier in Tier::ALL {
        assert_eq!(tier.as_str().parse::<Tier>().unwrap(), tier);
    }
    assert!("turbo".parse::<Tier>().is_err());
}
