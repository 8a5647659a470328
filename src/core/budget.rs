//! Tiered resource-budget enforcement.
//!
//! The enforcer is a pure gate: given the tier of the running task, the
//! snapshot taken when the run started and a fresh snapshot, it answers
//! whether the run may keep consuming work. It never mutates anything and is
//! cheap enough to call at every chunk boundary.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::{PipelineError, PipelineResult};

const MIB: u64 = 1024 * 1024;

/// Resource-budget class of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Short, latency-sensitive work.
    Critical,
    /// Regular background work such as draining the queue.
    Standard,
    /// Heavy batch work.
    Intensive,
    /// Report generation.
    Report,
}

impl Tier {
    /// All tiers, cheapest first.
    pub const ALL: [Self; 4] = [Self::Critical, Self::Standard, Self::Intensive, Self::Report];

    /// Stable lowercase name used in storage and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Standard => "standard",
            Self::Intensive => "intensive",
            Self::Report => "report",
        }
    }

    /// Built-in budget for this tier.
    pub const fn default_budget(self) -> TierBudget {
        match self {
            Self::Critical => TierBudget::new(2_000, 8 * MIB),
            Self::Standard => TierBudget::new(10_000, 32 * MIB),
            Self::Intensive => TierBudget::new(25_000, 64 * MIB),
            Self::Report => TierBudget::new(45_000, 128 * MIB),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "standard" => Ok(Self::Standard),
            "intensive" => Ok(Self::Intensive),
            "report" => Ok(Self::Report),
            other => Err(PipelineError::InvalidInput(format!("unknown tier `{other}`"))),
        }
    }
}

/// Ceilings a single task invocation may consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierBudget {
    /// Maximum wall time since the run started, in milliseconds.
    pub max_elapsed_ms: u64,
    /// Maximum growth of resident memory since the run started, in bytes.
    pub max_memory_delta_bytes: u64,
    /// Optional ceiling on units of work (items) per run.
    #[serde(default)]
    pub max_operations: Option<u64>,
}

impl TierBudget {
    /// Budget with time and memory ceilings and no operation ceiling.
    pub const fn new(max_elapsed_ms: u64, max_memory_delta_bytes: u64) -> Self {
        Self {
            max_elapsed_ms,
            max_memory_delta_bytes,
            max_operations: None,
        }
    }

    /// Add an operation ceiling.
    #[must_use]
    pub const fn with_max_operations(mut self, max_operations: u64) -> Self {
        self.max_operations = Some(max_operations);
        self
    }

    /// Maximum elapsed time as a `Duration`.
    pub const fn max_elapsed(&self) -> Duration {
        Duration::from_millis(self.max_elapsed_ms)
    }
}

/// Point-in-time view of resource usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSnapshot {
    /// Monotonic instant the snapshot was taken.
    pub taken_at: Instant,
    /// Resident memory of the process in bytes.
    pub memory_bytes: u64,
}

impl ResourceSnapshot {
    /// Build a snapshot from raw values.
    pub const fn new(taken_at: Instant, memory_bytes: u64) -> Self {
        Self {
            taken_at,
            memory_bytes,
        }
    }

    /// Time elapsed between `earlier` and this snapshot.
    pub fn elapsed_since(&self, earlier: &Self) -> Duration {
        self.taken_at.saturating_duration_since(earlier.taken_at)
    }

    /// Memory growth relative to `earlier`; shrinkage counts as zero.
    pub const fn memory_delta_since(&self, earlier: &Self) -> u64 {
        self.memory_bytes.saturating_sub(earlier.memory_bytes)
    }
}

/// Samples current resource usage.
pub trait ResourceProbe: Send + Sync {
    /// Take a snapshot. An error means usage is unknown and callers must treat
    /// the budget as exhausted.
    fn snapshot(&self) -> PipelineResult<ResourceSnapshot>;
}

/// Probe reading the resident memory of the current process.
pub struct SystemProbe {
    system: Mutex<sysinfo::System>,
    pid: sysinfo::Pid,
}

impl SystemProbe {
    /// Create a probe for the current process.
    pub fn new() -> PipelineResult<Self> {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| PipelineError::ResourceProbe(format!("current pid unavailable: {e}")))?;
        Ok(Self {
            system: Mutex::new(sysinfo::System::new()),
            pid,
        })
    }
}

impl ResourceProbe for SystemProbe {
    fn snapshot(&self) -> PipelineResult<ResourceSnapshot> {
        let mut system = self.system.lock();
        if !system.refresh_process(self.pid) {
            return Err(PipelineError::ResourceProbe(format!(
                "process {} not found",
                self.pid
            )));
        }
        let memory_bytes = system
            .process(self.pid)
            .map(sysinfo::Process::memory)
            .ok_or_else(|| PipelineError::ResourceProbe("process memory unavailable".into()))?;
        Ok(ResourceSnapshot::new(Instant::now(), memory_bytes))
    }
}

/// Outcome of a budget check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetVerdict {
    /// Work may continue.
    Continue,
    /// Wall time ceiling exceeded.
    TimeExceeded {
        /// Elapsed milliseconds.
        elapsed_ms: u64,
        /// Ceiling in milliseconds.
        limit_ms: u64,
    },
    /// Memory growth ceiling exceeded.
    MemoryExceeded {
        /// Growth in bytes.
        delta_bytes: u64,
        /// Ceiling in bytes.
        limit_bytes: u64,
    },
    /// Operation ceiling exceeded.
    OperationsExceeded {
        /// Operations performed.
        operations: u64,
        /// Ceiling.
        limit: u64,
    },
}

impl BudgetVerdict {
    /// Whether work may continue.
    pub const fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

/// Tier-aware budget gate.
#[derive(Debug, Clone)]
pub struct BudgetEnforcer {
    budgets: HashMap<Tier, TierBudget>,
}

impl Default for BudgetEnforcer {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

impl BudgetEnforcer {
    /// Create an enforcer; tiers missing from `overrides` use their built-in budget.
    pub fn new(overrides: HashMap<Tier, TierBudget>) -> Self {
        let budgets = Tier::ALL
            .iter()
            .map(|tier| {
                let budget = overrides
                    .get(tier)
                    .copied()
                    .unwrap_or_else(|| tier.default_budget());
                (*tier, budget)
            })
            .collect();
        Self { budgets }
    }

    /// Budget in force for a tier.
    pub fn budget(&self, tier: Tier) -> TierBudget {
        self.budgets
            .get(&tier)
            .copied()
            .unwrap_or_else(|| tier.default_budget())
    }

    /// Compare usage since `start` against the tier budget.
    pub fn check(
        &self,
        tier: Tier,
        start: &ResourceSnapshot,
        current: &ResourceSnapshot,
        operations: u64,
    ) -> BudgetVerdict {
        let budget = self.budget(tier);

        let elapsed_ms = u64::try_from(current.elapsed_since(start).as_millis()).unwrap_or(u64::MAX);
        if elapsed_ms > budget.max_elapsed_ms {
            return BudgetVerdict::TimeExceeded {
                elapsed_ms,
                limit_ms: budget.max_elapsed_ms,
            };
        }

        let delta_bytes = current.memory_delta_since(start);
        if delta_bytes > budget.max_memory_delta_bytes {
            return BudgetVerdict::MemoryExceeded {
                delta_bytes,
                limit_bytes: budget.max_memory_delta_bytes,
            };
        }

        if let Some(limit) = budget.max_operations {
            if operations > limit {
                return BudgetVerdict::OperationsExceeded { operations, limit };
            }
        }

        BudgetVerdict::Continue
    }

    /// Whether a run that started at `start` may continue.
    pub fn should_continue(
        &self,
        tier: Tier,
        start: &ResourceSnapshot,
        current: &ResourceSnapshot,
        operations: u64,
    ) -> bool {
        self.check(tier, start, current, operations).is_continue()
    }
}
