//! Pipeline configuration.
//!
//! Loaded from JSON or from `PIPELINE_*` environment variables (a `.env` file
//! is honoured). Every field has a default, so partial configs are accepted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{
    BudgetEnforcer, PipelineError, PipelineResult, ProcessorConfig, QueueStatus,
    SchedulerConfig, Tier, TierBudget,
};

const ENV_PREFIX: &str = "PIPELINE_";

/// Root pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// SQLite database path; `None` keeps everything in memory.
    pub database_path: Option<PathBuf>,
    /// Label attached to every event's context.
    pub environment: String,
    /// Items processed per chunk.
    pub chunk_size: usize,
    /// Maximum items per drain invocation.
    pub drain_limit: usize,
    /// Pending count above which an immediate drain is requested.
    pub queue_overflow_threshold: u64,
    /// Minimum seconds between two overflow requests.
    pub overflow_signal_cooldown_secs: u64,
    /// Default cache TTL in seconds.
    pub cache_default_ttl_secs: u64,
    /// Retention per terminal status, in seconds.
    pub retention_age_per_status: HashMap<QueueStatus, u64>,
    /// Budget overrides per tier.
    pub tier_budgets: HashMap<Tier, TierBudget>,
    /// Age in seconds after which a running row stops holding its lock.
    pub lock_staleness_secs: u64,
    /// Delay in seconds of the continuation tick after a suspension.
    pub continuation_delay_secs: u64,
    /// Periodic interval of the drain task, in seconds.
    pub drain_interval_secs: u64,
    /// Periodic interval of the maintenance task, in seconds.
    pub maintenance_interval_secs: u64,
    /// Age in seconds after which closed runs are pruned.
    pub run_history_retention_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            environment: "production".to_string(),
            chunk_size: 50,
            drain_limit: 1_000,
            queue_overflow_threshold: 1_000,
            overflow_signal_cooldown_secs: 60,
            cache_default_ttl_secs: 3_600,
            retention_age_per_status: HashMap::from([
                (QueueStatus::Processed, 7 * 86_400),
                (QueueStatus::Failed, 30 * 86_400),
            ]),
            tier_budgets: Tier::ALL
                .iter()
                .map(|tier| (*tier, tier.default_budget()))
                .collect(),
            lock_staleness_secs: 3_600,
            continuation_delay_secs: 60,
            drain_interval_secs: 300,
            maintenance_interval_secs: 3_600,
            run_history_retention_secs: 30 * 86_400,
        }
    }
}

impl PipelineConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> PipelineResult<()> {
        let positive = [
            ("chunk_size", self.chunk_size as u64),
            ("drain_limit", self.drain_limit as u64),
            ("cache_default_ttl_secs", self.cache_default_ttl_secs),
            ("lock_staleness_secs", self.lock_staleness_secs),
            ("drain_interval_secs", self.drain_interval_secs),
            ("maintenance_interval_secs", self.maintenance_interval_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(PipelineError::Config(format!("{name} must be greater than 0")));
            }
        }
        if self.environment.trim().is_empty() {
            return Err(PipelineError::Config("environment must not be empty".into()));
        }
        if self.retention_age_per_status.contains_key(&QueueStatus::Pending) {
            return Err(PipelineError::Config(
                "pending items have no retention; remove the `pending` entry".into(),
            ));
        }
        for (tier, budget) in &self.tier_budgets {
            if budget.max_elapsed_ms == 0 {
                return Err(PipelineError::Config(format!(
                    "tier `{tier}` max_elapsed_ms must be greater than 0"
                )));
            }
            if budget.max_operations == Some(0) {
                return Err(PipelineError::Config(format!(
                    "tier `{tier}` max_operations must be greater than 0"
                )));
            }
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> PipelineResult<Self> {
        let cfg: Self = serde_json::from_str(input)
            .map_err(|e| PipelineError::Config(format!("parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from defaults overlaid with `PIPELINE_*` variables.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    pub fn from_env() -> PipelineResult<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(PipelineError::Config(format!(".env could not be loaded: {e}")));
            }
        }
        Self::from_vars(std::env::vars())
    }

    /// Build configuration from defaults overlaid with `PIPELINE_*` pairs.
    pub fn from_vars<I, K, V>(vars: I) -> PipelineResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut cfg = Self::default();
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            cfg.apply_var(name, value.as_ref())?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_var(&mut self, name: &str, value: &str) -> PipelineResult<()> {
        match name {
            "DATABASE_PATH" => {
                self.database_path = (!value.is_empty()).then(|| PathBuf::from(value));
            }
            "ENVIRONMENT" => self.environment = value.to_string(),
            "CHUNK_SIZE" => self.chunk_size = parse_var(name, value)?,
            "DRAIN_LIMIT" => self.drain_limit = parse_var(name, value)?,
            "QUEUE_OVERFLOW_THRESHOLD" => self.queue_overflow_threshold = parse_var(name, value)?,
            "OVERFLOW_SIGNAL_COOLDOWN_SECS" => {
                self.overflow_signal_cooldown_secs = parse_var(name, value)?;
            }
            "CACHE_DEFAULT_TTL_SECS" => self.cache_default_ttl_secs = parse_var(name, value)?,
            "LOCK_STALENESS_SECS" => self.lock_staleness_secs = parse_var(name, value)?,
            "CONTINUATION_DELAY_SECS" => self.continuation_delay_secs = parse_var(name, value)?,
            "DRAIN_INTERVAL_SECS" => self.drain_interval_secs = parse_var(name, value)?,
            "MAINTENANCE_INTERVAL_SECS" => self.maintenance_interval_secs = parse_var(name, value)?,
            "RUN_HISTORY_RETENTION_SECS" => {
                self.run_history_retention_secs = parse_var(name, value)?;
            }
            "RETENTION_PROCESSED_SECS" => {
                self.retention_age_per_status
                    .insert(QueueStatus::Processed, parse_var(name, value)?);
            }
            "RETENTION_FAILED_SECS" => {
                self.retention_age_per_status
                    .insert(QueueStatus::Failed, parse_var(name, value)?);
            }
            other => {
                if let Some((tier, field)) = other.strip_prefix("TIER_").and_then(|s| s.split_once('_')) {
                    let tier = Tier::from_str(tier)
                        .map_err(|e| PipelineError::Config(format!("{ENV_PREFIX}{name}: {e}")))?;
                    let budget = self
                        .tier_budgets
                        .entry(tier)
                        .or_insert_with(|| tier.default_budget());
                    match field {
                        "MAX_ELAPSED_MS" => budget.max_elapsed_ms = parse_var(name, value)?,
                        "MAX_MEMORY_BYTES" => {
                            budget.max_memory_delta_bytes = parse_var(name, value)?;
                        }
                        "MAX_OPERATIONS" => budget.max_operations = Some(parse_var(name, value)?),
                        _ => tracing::warn!(variable = %name, "unrecognised tier budget variable"),
                    }
                } else {
                    tracing::debug!(variable = %name, "ignoring unrecognised pipeline variable");
                }
            }
        }
        Ok(())
    }

    /// Budget enforcer for the configured tiers.
    pub fn enforcer(&self) -> BudgetEnforcer {
        BudgetEnforcer::new(self.tier_budgets.clone())
    }

    /// Processor settings.
    pub fn processor(&self) -> ProcessorConfig {
        let mut retention: Vec<(QueueStatus, Duration)> = self
            .retention_age_per_status
            .iter()
            .map(|(status, secs)| (*status, Duration::from_secs(*secs)))
            .collect();
        retention.sort_by_key(|(status, _)| *status);
        ProcessorConfig {
            chunk_size: self.chunk_size,
            retention,
        }
    }

    /// Scheduler settings.
    pub const fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            lock_staleness: Duration::from_secs(self.lock_staleness_secs),
            continuation_delay: Duration::from_secs(self.continuation_delay_secs),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> PipelineResult<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        PipelineError::Config(format!("{ENV_PREFIX}{name}=`{value}` is invalid: {e}"))
    })
}
