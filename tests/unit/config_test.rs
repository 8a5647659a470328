//! Tests for configuration loading and validation

use std::time::Duration;

use site_pipeline::config::PipelineConfig;
use site_pipeline::core::{PipelineError, QueueStatus, Tier};

#[test]
fn test_default_config_is_valid() {
    let cfg = PipelineConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.chunk_size, 50);
    assert_eq!(cfg.lock_staleness_secs, 3_600);
    assert_eq!(cfg.retention_age_per_status[&QueueStatus::Processed], 7 * 86_400);
    assert_eq!(cfg.tier_budgets[&Tier::Critical].max_elapsed_ms, 2_000);
}

#[test]
fn test_zero_chunk_size_rejected() {
    let cfg = PipelineConfig {
        chunk_size: 0,
        ..PipelineConfig::default()
    };
    assert!(matches!(cfg.validate(), Err(PipelineError::Config(_))));
}

#[test]
fn test_pending_retention_rejected() {
    let mut cfg = PipelineConfig::default();
    cfg.retention_age_per_status.insert(QueueStatus::Pending, 60);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_zero_operation_ceiling_rejected() {
    let mut cfg = PipelineConfig::default();
    if let Some(budget) = cfg.tier_budgets.get_mut(&Tier::Report) {
        budget.max_operations = Some(0);
    }
    assert!(cfg.validate().is_err());
}

#[test]
fn test_from_json_str_partial() {
    let json = r#"{
        "chunk_size": 25,
        "environment": "staging",
        "retention_age_per_status": {"processed": 3600},
        "tier_budgets": {
            "standard": {"max_elapsed_ms": 5000, "max_memory_delta_bytes": 1048576, "max_operations": 200}
        }
    }"#;
    let cfg = PipelineConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.chunk_size, 25);
    assert_eq!(cfg.environment, "staging");
    assert_eq!(cfg.drain_limit, PipelineConfig::default().drain_limit);
    assert_eq!(cfg.retention_age_per_status.len(), 1);

    let enforcer = cfg.enforcer();
    assert_eq!(enforcer.budget(Tier::Standard).max_operations, Some(200));
    // Tiers missing from the file keep their built-in budget.
    assert_eq!(enforcer.budget(Tier::Critical), Tier::Critical.default_budget());
}

#[test]
fn test_from_json_str_invalid() {
    assert!(PipelineConfig::from_json_str("{not json").is_err());
    assert!(PipelineConfig::from_json_str(r#"{"drain_limit": 0}"#).is_err());
}

#[test]
fn test_from_vars_overrides() {
    let vars = [
        ("PIPELINE_CHUNK_SIZE", "10"),
        ("PIPELINE_DATABASE_PATH", "/tmp/pipeline.db"),
        ("PIPELINE_RETENTION_FAILED_SECS", "120"),
        ("PIPELINE_TIER_CRITICAL_MAX_ELAPSED_MS", "750"),
        ("PIPELINE_TIER_INTENSIVE_MAX_OPERATIONS", "40"),
        ("PATH", "/usr/bin"),
    ];
    let cfg = PipelineConfig::from_vars(vars).unwrap();
    assert_eq!(cfg.chunk_size, 10);
    assert_eq!(cfg.database_path.as_deref(), Some(std::path::Path::new("/tmp/pipeline.db")));
    assert_eq!(cfg.retention_age_per_status[&QueueStatus::Failed], 120);
    assert_eq!(cfg.tier_budgets[&Tier::Critical].max_elapsed_ms, 750);
    assert_eq!(cfg.tier_budgets[&Tier::Intensive].max_operations, Some(40));
}

#[test]
fn test_from_vars_bad_number() {
    let err = PipelineConfig::from_vars([("PIPELINE_DRAIN_LIMIT", "lots")]).unwrap_err();
    assert!(err.to_string().contains("PIPELINE_DRAIN_LIMIT"));
}

#[test]
fn test_derived_component_settings() {
    let cfg = PipelineConfig {
        continuation_delay_secs: 15,
        ..PipelineConfig::default()
    };
    assert_eq!(cfg.scheduler().continuation_delay, Duration::from_secs(15));
    let processor = cfg.processor();
    assert_eq!(processor.chunk_size, 50);
    assert_eq!(
        processor.retention,
        vec![
            (QueueStatus::Processed, Duration::from_secs(7 * 86_400)),
            (QueueStatus::Failed, Duration::from_secs(30 * 86_400)),
        ]
    );
}
