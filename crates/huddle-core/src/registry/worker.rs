//! Worker records, the task-execution capability, and registry snapshots.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoordinationError;

/// Parameters passed alongside a delegated task.
pub type TaskParams = Map<String, Value>;

/// Result returned by a [`TaskExecutor`].
///
/// `success` and `summary` are the only fields the engine reads; anything
/// else travels in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Whether the task succeeded.
    pub success: bool,
    /// Short human-readable outcome.
    pub summary: String,
    /// Additional executor-defined fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskResult {
    /// Creates a successful result.
    pub fn success(summary: impl Into<String>) -> Self {
        Self { success: true, summary: summary.into(), extra: Map::new() }
    }

    /// Creates a failed result.
    pub fn failure(summary: impl Into<String>) -> Self {
        Self { success: false, summary: summary.into(), extra: Map::new() }
    }

    /// Adds an extension field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Task-execution capability supplied by the worker layer.
///
/// The registry only holds a weak handle; the worker layer owns the executor.
pub trait TaskExecutor: Send + Sync {
    /// Executes a task description with parameters.
    fn execute(&self, task: &str, params: &TaskParams) -> anyhow::Result<TaskResult>;
}

/// Specialization of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerType {
    /// Breaks objectives into plans.
    Planner,
    /// Carries out tasks.
    #[default]
    Executor,
    /// Checks the output of others.
    Verifier,
}

impl WorkerType {
    /// Returns the string representation of the worker type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Executor => "executor",
            Self::Verifier => "verifier",
        }
    }

    /// Base load-balancing priority for this type.
    #[must_use]
    pub fn base_priority(&self) -> f64 {
        match self {
            Self::Planner => 8.0,
            Self::Executor => 6.0,
            Self::Verifier => 7.0,
        }
    }

    /// Specialization bonus for this type.
    #[must_use]
    pub fn specialization_bonus(&self) -> f64 {
        match self {
            Self::Planner => 1.0,
            Self::Executor => 0.5,
            Self::Verifier => 1.5,
        }
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerType {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "planner" => Ok(Self::Planner),
            "executor" => Ok(Self::Executor),
            "verifier" => Ok(Self::Verifier),
            other => Err(CoordinationError::invalid_input(
                "worker_type",
                format!("unknown worker type '{}'", other),
            )),
        }
    }
}

/// Availability of a registered worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Registered and ready.
    #[default]
    Active,
    /// Working on a task.
    Busy,
    /// Registered but not accepting work.
    Inactive,
}

impl WorkerStatus {
    /// Returns the string representation of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Busy => "busy",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration metadata supplied by a worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// Display name.
    pub name: String,
    /// Role title.
    #[serde(default)]
    pub role: String,
    /// Free-text job description.
    #[serde(default)]
    pub job_description: String,
    /// Specialization.
    #[serde(default)]
    pub worker_type: WorkerType,
    /// Declared capabilities.
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

impl WorkerInfo {
    /// Creates worker info with a name and role.
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self { name: name.into(), role: role.into(), ..Self::default() }
    }

    /// Sets the job description.
    #[must_use]
    pub fn with_job_description(mut self, job_description: impl Into<String>) -> Self {
        self.job_description = job_description.into();
        self
    }

    /// Sets the worker type.
    #[must_use]
    pub fn with_type(mut self, worker_type: WorkerType) -> Self {
        self.worker_type = worker_type;
        self
    }

    /// Adds capabilities.
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities.extend(capabilities.into_iter().map(Into::into));
        self
    }
}

/// Load-balancing statistics for one worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadStats {
    /// Tasks currently assigned.
    pub current_load: usize,
    /// Capacity before the worker is skipped.
    pub max_concurrent_tasks: usize,
    /// Static priority derived from type and capabilities.
    pub priority_score: f64,
    /// Time of the last assignment.
    pub last_assigned: Option<DateTime<Utc>>,
}

impl LoadStats {
    pub(crate) fn new(worker_type: WorkerType, capability_count: usize) -> Self {
        Self {
            current_load: 0,
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            priority_score: worker_type.base_priority() + (capability_count as f64 * 0.3).min(2.0),
            last_assigned: None,
        }
    }

    /// Returns `true` if the worker has spare capacity.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.current_load < self.max_concurrent_tasks
    }

    /// Current load as a fraction of capacity.
    #[must_use]
    pub fn load_ratio(&self) -> f64 {
        if self.max_concurrent_tasks == 0 {
            return 0.0;
        }
        self.current_load as f64 / self.max_concurrent_tasks as f64
    }
}

/// Default per-worker capacity.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 3;

/// Rolling performance figures for one worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerPerformance {
    /// Assignments completed (successful or not).
    pub tasks_completed: u64,
    /// Exponential moving average of success.
    pub success_rate: f64,
    /// Exponential moving average of completion time, in seconds.
    pub average_completion_secs: f64,
    /// Last time the worker did anything.
    pub last_active: DateTime<Utc>,
    /// Static specialization score.
    pub specialization_score: f64,
}

impl WorkerPerformance {
    pub(crate) fn new(worker_type: WorkerType, capability_count: usize) -> Self {
        Self {
            tasks_completed: 0,
            success_rate: 1.0,
            average_completion_secs: 0.0,
            last_active: Utc::now(),
            specialization_score: 5.0
                + (capability_count as f64 * 0.5).min(3.0)
                + worker_type.specialization_bonus(),
        }
    }

    pub(crate) fn record_completion(&mut self, success: bool, completion_secs: f64) {
        self.tasks_completed += 1;
        self.last_active = Utc::now();
        self.success_rate = 0.9 * self.success_rate + 0.1 * if success { 1.0 } else { 0.0 };
        self.average_completion_secs = 0.9 * self.average_completion_secs + 0.1 * completion_secs;
    }
}

/// A registered worker, as held by the registry.
pub(crate) struct WorkerRecord {
    pub(crate) worker_id: String,
    pub(crate) info: WorkerInfo,
    pub(crate) status: WorkerStatus,
    pub(crate) current_task: Option<String>,
    pub(crate) registered_at: DateTime<Utc>,
    pub(crate) sequence: u64,
    pub(crate) tasks_completed: u64,
    pub(crate) collaboration_count: u64,
    pub(crate) executor: Option<Weak<dyn TaskExecutor>>,
    pub(crate) load: LoadStats,
    pub(crate) performance: WorkerPerformance,
}

impl fmt::Debug for WorkerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRecord")
            .field("worker_id", &self.worker_id)
            .field("name", &self.info.name)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl WorkerRecord {
    pub(crate) fn new(
        worker_id: &str,
        info: WorkerInfo,
        executor: Option<&Arc<dyn TaskExecutor>>,
        sequence: u64,
    ) -> Self {
        let capability_count = info.capabilities.len();
        let worker_type = info.worker_type;
        Self {
            worker_id: worker_id.to_string(),
            info,
            status: WorkerStatus::Active,
            current_task: None,
            registered_at: Utc::now(),
            sequence,
            tasks_completed: 0,
            collaboration_count: 0,
            executor: executor.map(Arc::downgrade),
            load: LoadStats::new(worker_type, capability_count),
            performance: WorkerPerformance::new(worker_type, capability_count),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.status != WorkerStatus::Inactive
    }

    pub(crate) fn has_live_executor(&self) -> bool {
        self.executor.as_ref().is_some_and(|handle| handle.strong_count() > 0)
    }

    pub(crate) fn has_capability(&self, capability: &str) -> bool {
        self.info.capabilities.iter().any(|c| c.eq_ignore_ascii_case(capability))
    }

    pub(crate) fn matches_any_keyword(&self, keywords: &[&str]) -> bool {
        let role = self.info.role.to_lowercase();
        let job = self.info.job_description.to_lowercase();
        keywords.iter().any(|keyword| {
            let keyword = keyword.to_lowercase();
            role.contains(&keyword) || job.contains(&keyword)
        })
    }

    pub(crate) fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            worker_id: self.worker_id.clone(),
            name: self.info.name.clone(),
            role: self.info.role.clone(),
            job_description: self.info.job_description.clone(),
            worker_type: self.info.worker_type,
            capabilities: self.info.capabilities.iter().cloned().collect(),
            status: self.status,
            current_task: self.current_task.clone(),
            registered_at: self.registered_at,
            tasks_completed: self.tasks_completed,
            collaboration_count: self.collaboration_count,
            has_executor: self.has_live_executor(),
            load: self.load.clone(),
            performance: self.performance.clone(),
        }
    }
}

/// Read-only view of a worker. Never exposes the executor handle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerSnapshot {
    /// Worker id.
    pub worker_id: String,
    /// Display name.
    pub name: String,
    /// Role title.
    pub role: String,
    /// Job description.
    pub job_description: String,
    /// Specialization.
    pub worker_type: WorkerType,
    /// Capabilities, sorted.
    pub capabilities: Vec<String>,
    /// Availability.
    pub status: WorkerStatus,
    /// Task in progress, if any.
    pub current_task: Option<String>,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
    /// Delegated tasks completed.
    pub tasks_completed: u64,
    /// Delegations initiated.
    pub collaboration_count: u64,
    /// Whether a live executor is attached.
    pub has_executor: bool,
    /// Load-balancing statistics.
    pub load: LoadStats,
    /// Performance figures.
    pub performance: WorkerPerformance,
}

/// Immutable record of one delegation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollaborationRecord {
    /// Delegating worker.
    pub from_worker: String,
    /// Worker that executed the task.
    pub to_worker: String,
    /// Task description.
    pub description: String,
    /// Task parameters.
    pub params: TaskParams,
    /// When the delegation completed.
    pub timestamp: DateTime<Utc>,
}
