//! Worker registry.
//!
//! Tracks registered workers, answers capability and role lookups, delegates
//! tasks between workers, and keeps the load-balancing and performance
//! figures used by error recovery.

mod suggest;
mod worker;

pub use suggest::CollaboratorSuggestion;
pub use worker::{
    CollaborationRecord, DEFAULT_MAX_CONCURRENT_TASKS, LoadStats, TaskExecutor, TaskParams,
    TaskResult, WorkerInfo, WorkerPerformance, WorkerSnapshot, WorkerStatus, WorkerType,
};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CoordinationError, Result, poisoned};
use worker::WorkerRecord;

#[derive(Debug, Default)]
struct AssignmentMetrics {
    total_tasks_assigned: u64,
    successful_assignments: u64,
    failed_assignments: u64,
}

#[derive(Debug, Default)]
struct RegistryState {
    workers: HashMap<String, WorkerRecord>,
    history: Vec<CollaborationRecord>,
    metrics: AssignmentMetrics,
    next_sequence: u64,
}

impl RegistryState {
    /// Workers in registration order.
    fn ordered(&self) -> Vec<&WorkerRecord> {
        let mut workers: Vec<&WorkerRecord> = self.workers.values().collect();
        workers.sort_by_key(|w| w.sequence);
        workers
    }
}

/// Registry of active workers.
pub struct WorkerRegistry {
    state: RwLock<RegistryState>,
    max_workers: usize,
}

impl fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("worker_count", &self.state.read().map(|s| s.workers.len()).unwrap_or(0))
            .field("max_workers", &self.max_workers)
            .finish_non_exhaustive()
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRegistry {
    /// Creates an empty registry with the default capacity (100 workers).
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(100)
    }

    /// Creates an empty registry that accepts at most `max_workers` workers.
    #[must_use]
    pub fn with_capacity(max_workers: usize) -> Self {
        Self { state: RwLock::new(RegistryState::default()), max_workers }
    }

    /// Registers a worker.
    ///
    /// Registering an id that already exists replaces the previous record.
    ///
    /// # Arguments
    /// * `worker_id` - Unique worker id
    /// * `info` - Registration metadata
    /// * `executor` - Task-execution capability; the registry keeps a weak handle
    ///
    /// # Returns
    /// The registration id (the worker id).
    pub fn register(
        &self,
        worker_id: &str,
        info: WorkerInfo,
        executor: Option<&Arc<dyn TaskExecutor>>,
    ) -> Result<String> {
        if worker_id.trim().is_empty() {
            return Err(CoordinationError::invalid_input("worker_id", "must not be empty"));
        }

        let mut state = self.state.write().map_err(poisoned)?;
        let replacing = state.workers.contains_key(worker_id);
        if !replacing && state.workers.len() >= self.max_workers {
            return Err(CoordinationError::CapacityExceeded {
                resource: "worker registry".to_string(),
                limit: self.max_workers,
            });
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        let name = info.name.clone();
        let record = WorkerRecord::new(worker_id, info, executor, sequence);
        state.workers.insert(worker_id.to_string(), record);

        if replacing {
            warn!(worker_id = %worker_id, "Worker replaced in registry");
        } else {
            info!(worker_id = %worker_id, name = %name, "Worker registered");
        }

        Ok(worker_id.to_string())
    }

    /// Removes a worker.
    ///
    /// # Returns
    /// `true` if the worker was registered, `false` otherwise.
    pub fn unregister(&self, worker_id: &str) -> Result<bool> {
        let mut state = self.state.write().map_err(poisoned)?;
        let removed = state.workers.remove(worker_id).is_some();

        if removed {
            info!(worker_id = %worker_id, "Worker unregistered");
        } else {
            debug!(worker_id = %worker_id, "Attempted to unregister unknown worker");
        }

        Ok(removed)
    }

    /// Returns a snapshot of a worker.
    pub fn get_worker(&self, worker_id: &str) -> Result<Option<WorkerSnapshot>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.workers.get(worker_id).map(WorkerRecord::snapshot))
    }

    /// Returns `true` if the worker is registered and not inactive.
    pub fn is_active(&self, worker_id: &str) -> Result<bool> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.workers.get(worker_id).is_some_and(WorkerRecord::is_active))
    }

    /// Returns snapshots of active workers in registration order.
    ///
    /// # Arguments
    /// * `exclude` - Worker id to leave out
    pub fn active_workers(&self, exclude: Option<&str>) -> Result<Vec<WorkerSnapshot>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state
            .ordered()
            .into_iter()
            .filter(|w| w.is_active() && Some(w.worker_id.as_str()) != exclude)
            .map(WorkerRecord::snapshot)
            .collect())
    }

    /// Number of registered workers.
    pub fn count(&self) -> Result<usize> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.workers.len())
    }

    /// Finds the first active worker declaring a capability.
    ///
    /// Capability names compare case-insensitively.
    pub fn find_by_capability(
        &self,
        capability: &str,
        exclude: Option<&str>,
    ) -> Result<Option<WorkerSnapshot>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state
            .ordered()
            .into_iter()
            .filter(|w| w.is_active() && Some(w.worker_id.as_str()) != exclude)
            .find(|w| w.has_capability(capability))
            .map(WorkerRecord::snapshot))
    }

    /// Finds the first active worker whose role or job description contains any keyword.
    pub fn find_by_role(
        &self,
        keywords: &[&str],
        exclude: Option<&str>,
    ) -> Result<Option<WorkerSnapshot>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state
            .ordered()
            .into_iter()
            .filter(|w| w.is_active() && Some(w.worker_id.as_str()) != exclude)
            .find(|w| w.matches_any_keyword(keywords))
            .map(WorkerRecord::snapshot))
    }

    /// Updates a worker's status and current task.
    ///
    /// # Returns
    /// `true` if the worker exists.
    pub fn update_status(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        current_task: Option<String>,
    ) -> Result<bool> {
        let mut state = self.state.write().map_err(poisoned)?;
        let Some(worker) = state.workers.get_mut(worker_id) else {
            return Ok(false);
        };
        worker.status = status;
        if current_task.is_some() {
            worker.current_task = current_task;
        }
        worker.performance.last_active = Utc::now();
        debug!(worker_id = %worker_id, status = %status, "Worker status updated");
        Ok(true)
    }

    /// Delegates a task from one worker to another.
    ///
    /// The target's executor runs on the caller's thread without holding the
    /// registry lock.
    ///
    /// # Arguments
    /// * `from` - Delegating worker
    /// * `to` - Target worker
    /// * `description` - Task description
    /// * `params` - Task parameters
    ///
    /// # Returns
    /// The executor's result.
    pub fn delegate_task(
        &self,
        from: &str,
        to: &str,
        description: &str,
        params: TaskParams,
    ) -> Result<TaskResult> {
        let executor = {
            let state = self.state.read().map_err(poisoned)?;
            let target =
                state.workers.get(to).ok_or_else(|| CoordinationError::not_found("worker", to))?;
            target.executor.as_ref().and_then(std::sync::Weak::upgrade).ok_or_else(|| {
                CoordinationError::Delegation {
                    from_worker: from.to_string(),
                    to_worker: to.to_string(),
                    reason: "worker has no live task executor".to_string(),
                }
            })?
        };

        debug!(from = %from, to = %to, task = %description, "Delegating task");

        let result = executor.execute(description, &params).map_err(|e| {
            warn!(from = %from, to = %to, error = %e, "Delegated task failed");
            CoordinationError::Delegation {
                from_worker: from.to_string(),
                to_worker: to.to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut state = self.state.write().map_err(poisoned)?;
        if let Some(sender) = state.workers.get_mut(from) {
            sender.collaboration_count += 1;
            sender.performance.last_active = Utc::now();
        }
        if let Some(target) = state.workers.get_mut(to) {
            target.tasks_completed += 1;
            target.performance.last_active = Utc::now();
        }
        state.history.push(CollaborationRecord {
            from_worker: from.to_string(),
            to_worker: to.to_string(),
            description: description.to_string(),
            params,
            timestamp: Utc::now(),
        });

        info!(from = %from, to = %to, success = result.success, "Task delegated");
        Ok(result)
    }

    /// Returns the collaboration history, oldest first.
    pub fn collaboration_history(&self) -> Result<Vec<CollaborationRecord>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.history.clone())
    }

    /// Suggests up to three collaborators for a task.
    pub fn suggest_collaborators(
        &self,
        worker_id: &str,
        task_text: &str,
    ) -> Result<Vec<CollaboratorSuggestion>> {
        let state = self.state.read().map_err(poisoned)?;
        let candidates: Vec<&WorkerRecord> = state
            .ordered()
            .into_iter()
            .filter(|w| w.is_active() && w.worker_id != worker_id)
            .collect();
        Ok(suggest::suggest(candidates.iter().copied(), task_text))
    }

    /// Returns workers of a type, highest priority first.
    ///
    /// # Arguments
    /// * `worker_type` - Type to match
    /// * `available_only` - Skip inactive workers and workers at capacity
    pub fn find_workers_by_type(
        &self,
        worker_type: WorkerType,
        available_only: bool,
    ) -> Result<Vec<WorkerSnapshot>> {
        let state = self.state.read().map_err(poisoned)?;
        let mut workers: Vec<WorkerSnapshot> = state
            .ordered()
            .into_iter()
            .filter(|w| w.info.worker_type == worker_type)
            .filter(|w| !available_only || (w.is_active() && w.load.has_capacity()))
            .map(WorkerRecord::snapshot)
            .collect();
        workers.sort_by(|a, b| b.load.priority_score.total_cmp(&a.load.priority_score));
        Ok(workers)
    }

    /// Picks the best available worker of a type and assigns it one unit of load.
    ///
    /// Score: priority + success_rate × 2 − load_ratio × 3 + capability matches × 1.5.
    /// Ties go to the earlier registration.
    pub fn load_balanced_worker(
        &self,
        worker_type: WorkerType,
        required_capabilities: &[&str],
    ) -> Result<Option<WorkerSnapshot>> {
        let mut state = self.state.write().map_err(poisoned)?;

        let mut best: Option<(f64, String)> = None;
        for worker in state.ordered() {
            if worker.info.worker_type != worker_type
                || !worker.is_active()
                || !worker.load.has_capacity()
            {
                continue;
            }
            let matches =
                required_capabilities.iter().filter(|cap| worker.has_capability(cap)).count();
            let score = (worker.load.priority_score + worker.performance.success_rate * 2.0
                - worker.load.load_ratio() * 3.0
                + matches as f64 * 1.5)
                .max(0.0);
            if best.as_ref().is_none_or(|(best_score, _)| score > *best_score) {
                best = Some((score, worker.worker_id.clone()));
            }
        }

        let Some((score, worker_id)) = best else {
            debug!(worker_type = %worker_type, "No available worker for load balancing");
            return Ok(None);
        };
        let Some(worker) = state.workers.get_mut(&worker_id) else {
            return Ok(None);
        };
        worker.load.current_load += 1;
        worker.load.last_assigned = Some(Utc::now());
        debug!(
            worker_id = %worker_id,
            load = worker.load.current_load,
            score = score,
            "Load-balanced assignment"
        );
        Ok(Some(worker.snapshot()))
    }

    /// Records completion of a load-balanced assignment.
    pub fn complete_task_assignment(
        &self,
        worker_id: &str,
        success: bool,
        completion_secs: f64,
    ) -> Result<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        if let Some(worker) = state.workers.get_mut(worker_id) {
            if worker.load.current_load > 0 {
                worker.load.current_load -= 1;
            } else {
                warn!(worker_id = %worker_id, "Attempted to decrement load below zero");
            }
            worker.performance.record_completion(success, completion_secs);
        }
        state.metrics.total_tasks_assigned += 1;
        if success {
            state.metrics.successful_assignments += 1;
        } else {
            state.metrics.failed_assignments += 1;
        }
        Ok(())
    }

    /// Returns a worker's load statistics.
    pub fn load_stats(&self, worker_id: &str) -> Result<Option<LoadStats>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.workers.get(worker_id).map(|w| w.load.clone()))
    }

    /// Returns a worker's performance figures.
    pub fn performance(&self, worker_id: &str) -> Result<Option<WorkerPerformance>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.workers.get(worker_id).map(|w| w.performance.clone()))
    }

    /// Removes workers idle for longer than `max_idle`.
    ///
    /// # Returns
    /// Ids of the removed workers.
    pub fn cleanup_inactive_workers(&self, max_idle: Duration) -> Result<Vec<String>> {
        let Some(cutoff) = chrono::Duration::from_std(max_idle)
            .ok()
            .and_then(|idle| Utc::now().checked_sub_signed(idle))
        else {
            return Ok(Vec::new());
        };
        let mut state = self.state.write().map_err(poisoned)?;
        let idle: Vec<String> = state
            .workers
            .values()
            .filter(|w| w.performance.last_active < cutoff)
            .map(|w| w.worker_id.clone())
            .collect();
        for worker_id in &idle {
            state.workers.remove(worker_id);
            info!(worker_id = %worker_id, "Removed inactive worker");
        }
        Ok(idle)
    }

    /// Returns aggregate registry statistics.
    pub fn statistics(&self) -> Result<RegistryStatistics> {
        let state = self.state.read().map_err(poisoned)?;

        let mut workers_by_type = BTreeMap::new();
        let mut workers_by_status = BTreeMap::new();
        for worker in state.workers.values() {
            *workers_by_type.entry(worker.info.worker_type.as_str().to_string()).or_insert(0) += 1;
            *workers_by_status.entry(worker.status.as_str().to_string()).or_insert(0) += 1;
        }

        let count = state.workers.len();
        let (average_success_rate, average_completion_secs) = if count == 0 {
            (1.0, 0.0)
        } else {
            let rate: f64 = state.workers.values().map(|w| w.performance.success_rate).sum();
            let secs: f64 =
                state.workers.values().map(|w| w.performance.average_completion_secs).sum();
            (rate / count as f64, secs / count as f64)
        };

        Ok(RegistryStatistics {
            total_workers: count,
            active_workers: state.workers.values().filter(|w| w.is_active()).count(),
            workers_by_type,
            workers_by_status,
            total_collaborations: state.history.len(),
            total_tasks_assigned: state.metrics.total_tasks_assigned,
            successful_assignments: state.metrics.successful_assignments,
            failed_assignments: state.metrics.failed_assignments,
            average_success_rate,
            average_completion_secs,
            total_current_load: state.workers.values().map(|w| w.load.current_load).sum(),
            workers_at_capacity: state.workers.values().filter(|w| !w.load.has_capacity()).count(),
        })
    }

    /// Removes every worker and the collaboration history.
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        let count = state.workers.len();
        *state = RegistryState::default();
        info!(workers = count, "Worker registry shut down");
        Ok(())
    }
}

/// Aggregate registry figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryStatistics {
    /// Registered workers.
    pub total_workers: usize,
    /// Workers not marked inactive.
    pub active_workers: usize,
    /// Worker count per type.
    pub workers_by_type: BTreeMap<String, usize>,
    /// Worker count per status.
    pub workers_by_status: BTreeMap<String, usize>,
    /// Delegations recorded.
    pub total_collaborations: usize,
    /// Load-balanced assignments completed.
    pub total_tasks_assigned: u64,
    /// Successful assignments.
    pub successful_assignments: u64,
    /// Failed assignments.
    pub failed_assignments: u64,
    /// Mean success rate across workers.
    pub average_success_rate: f64,
    /// Mean completion time across workers, in seconds.
    pub average_completion_secs: f64,
    /// Sum of current loads.
    pub total_current_load: usize,
    /// Workers with no spare capacity.
    pub workers_at_capacity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExecutor {
        calls: AtomicUsize,
    }

    impl TaskExecutor for CountingExecutor {
        fn execute(&self, task: &str, _params: &TaskParams) -> anyhow::Result<TaskResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TaskResult::success(format!("did {}", task)))
        }
    }

    struct FailingExecutor;

    impl TaskExecutor for FailingExecutor {
        fn execute(&self, _task: &str, _params: &TaskParams) -> anyhow::Result<TaskResult> {
            anyhow::bail!("executor crashed")
        }
    }

    fn executor() -> Arc<dyn TaskExecutor> {
        Arc::new(CountingExecutor { calls: AtomicUsize::new(0) })
    }

    fn developer() -> WorkerInfo {
        WorkerInfo::new("Dev", "Senior Developer")
            .with_job_description("writes rust services and reviews code")
            .with_capabilities(["rust", "review"])
    }

    #[test]
    fn test_register_and_count() {
        let registry = WorkerRegistry::new();
        let id = registry.register("w1", developer(), None).unwrap();
        assert_eq!(id, "w1");
        assert_eq!(registry.count().unwrap(), 1);
        let worker = registry.get_worker("w1").unwrap().unwrap();
        assert_eq!(worker.status, WorkerStatus::Active);
        assert!(!worker.has_executor);
    }

    #[test]
    fn test_register_duplicate_overwrites() {
        // Re-registration is last-writer-wins by policy, not a conflict.
        let registry = WorkerRegistry::new();
        registry.register("w1", developer(), None).unwrap();
        registry.register("w1", WorkerInfo::new("Replacement", "Tester"), None).unwrap();

        assert_eq!(registry.count().unwrap(), 1);
        assert_eq!(registry.get_worker("w1").unwrap().unwrap().name, "Replacement");
    }

    #[test]
    fn test_register_respects_capacity() {
        let registry = WorkerRegistry::with_capacity(1);
        registry.register("w1", developer(), None).unwrap();
        let err = registry.register("w2", developer(), None).unwrap_err();
        assert!(matches!(err, CoordinationError::CapacityExceeded { limit: 1, .. }));
        // Replacing an existing id is still allowed at capacity.
        assert!(registry.register("w1", developer(), None).is_ok());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = WorkerRegistry::new();
        registry.register("w1", developer(), None).unwrap();
        assert!(registry.unregister("w1").unwrap());
        assert!(!registry.unregister("w1").unwrap());
        assert!(!registry.unregister("never").unwrap());
        assert_eq!(registry.count().unwrap(), 0);
    }

    #[test]
    fn test_find_by_capability_excludes() {
        let registry = WorkerRegistry::new();
        registry.register("w1", developer(), None).unwrap();
        registry.register("w2", developer(), None).unwrap();

        let found = registry.find_by_capability("RUST", None).unwrap().unwrap();
        assert_eq!(found.worker_id, "w1");
        let found = registry.find_by_capability("rust", Some("w1")).unwrap().unwrap();
        assert_eq!(found.worker_id, "w2");
        assert!(registry.find_by_capability("cobol", None).unwrap().is_none());
    }

    #[test]
    fn test_find_by_role_matches_job_description() {
        let registry = WorkerRegistry::new();
        registry
            .register(
                "r1",
                WorkerInfo::new("Rita", "Analyst").with_job_description("Market RESEARCH"),
                None,
            )
            .unwrap();
        assert!(registry.find_by_role(&["research"], None).unwrap().is_some());
        assert!(registry.find_by_role(&["analyst"], Some("r1")).unwrap().is_none());
    }

    #[test]
    fn test_delegation_accounting() {
        let registry = WorkerRegistry::new();
        let exec = executor();
        registry.register("a", developer(), None).unwrap();
        registry.register("b", developer(), Some(&exec)).unwrap();

        let result = registry.delegate_task("a", "b", "build api", TaskParams::new()).unwrap();
        assert!(result.success);
        assert_eq!(result.summary, "did build api");

        assert_eq!(registry.get_worker("b").unwrap().unwrap().tasks_completed, 1);
        assert_eq!(registry.get_worker("a").unwrap().unwrap().collaboration_count, 1);
        let history = registry.collaboration_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_worker, "a");
        assert_eq!(history[0].to_worker, "b");
    }

    #[test]
    fn test_delegation_to_unknown_worker() {
        let registry = WorkerRegistry::new();
        let err = registry.delegate_task("a", "ghost", "x", TaskParams::new()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
        assert!(registry.collaboration_history().unwrap().is_empty());
    }

    #[test]
    fn test_delegation_without_live_executor() {
        let registry = WorkerRegistry::new();
        let exec = executor();
        registry.register("b", developer(), Some(&exec)).unwrap();
        drop(exec);

        let err = registry.delegate_task("a", "b", "x", TaskParams::new()).unwrap_err();
        assert!(matches!(err, CoordinationError::Delegation { .. }));
        assert_eq!(registry.get_worker("b").unwrap().unwrap().tasks_completed, 0);
    }

    #[test]
    fn test_delegation_execution_failure_leaves_counters() {
        let registry = WorkerRegistry::new();
        let exec: Arc<dyn TaskExecutor> = Arc::new(FailingExecutor);
        registry.register("a", developer(), None).unwrap();
        registry.register("b", developer(), Some(&exec)).unwrap();

        let err = registry.delegate_task("a", "b", "x", TaskParams::new()).unwrap_err();
        assert!(err.to_string().contains("executor crashed"));
        assert_eq!(registry.get_worker("a").unwrap().unwrap().collaboration_count, 0);
        assert!(registry.collaboration_history().unwrap().is_empty());
    }

    #[test]
    fn test_suggest_role_family() {
        let registry = WorkerRegistry::new();
        registry.register("me", developer(), None).unwrap();
        registry.register("dev", developer(), None).unwrap();
        registry
            .register("qa", WorkerInfo::new("Quinn", "QA Tester").with_job_description("tests"), None)
            .unwrap();

        let suggestions = registry.suggest_collaborators("me", "write code and test it").unwrap();
        let ids: Vec<&str> = suggestions.iter().map(|s| s.worker.worker_id.as_str()).collect();
        assert!(ids.contains(&"dev"));
        assert!(ids.contains(&"qa"));
        assert!(!ids.contains(&"me"));
        assert!(suggestions.iter().all(|s| (s.confidence - 0.8).abs() < 1e-9));
    }

    #[test]
    fn test_suggest_overlap_fallback() {
        let registry = WorkerRegistry::new();
        registry
            .register(
                "pilot",
                WorkerInfo::new("Pat", "Pilot").with_job_description("flies planes over oceans"),
                None,
            )
            .unwrap();

        let suggestions = registry.suggest_collaborators("me", "planes oceans").unwrap();
        assert_eq!(suggestions.len(), 1);
        assert!((suggestions[0].confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_suggest_returns_at_most_three() {
        let registry = WorkerRegistry::new();
        for i in 0..5 {
            registry
                .register(
                    &format!("w{}", i),
                    WorkerInfo::new("W", "Generalist").with_job_description("alpha beta gamma"),
                    None,
                )
                .unwrap();
        }
        let suggestions = registry.suggest_collaborators("me", "alpha beta").unwrap();
        assert_eq!(suggestions.len(), 3);
    }

    #[test]
    fn test_load_balanced_worker_prefers_less_loaded() {
        let registry = WorkerRegistry::new();
        registry.register("e1", developer(), None).unwrap();
        registry.register("e2", developer(), None).unwrap();

        let first = registry.load_balanced_worker(WorkerType::Executor, &[]).unwrap().unwrap();
        assert_eq!(first.worker_id, "e1");
        let second = registry.load_balanced_worker(WorkerType::Executor, &[]).unwrap().unwrap();
        assert_eq!(second.worker_id, "e2");
        assert_eq!(registry.load_stats("e1").unwrap().unwrap().current_load, 1);
    }

    #[test]
    fn test_load_balanced_worker_skips_full_workers() {
        let registry = WorkerRegistry::new();
        registry.register("e1", developer(), None).unwrap();
        for _ in 0..DEFAULT_MAX_CONCURRENT_TASKS {
            assert!(registry.load_balanced_worker(WorkerType::Executor, &[]).unwrap().is_some());
        }
        assert!(registry.load_balanced_worker(WorkerType::Executor, &[]).unwrap().is_none());
        assert!(registry.find_workers_by_type(WorkerType::Executor, true).unwrap().is_empty());
        assert_eq!(registry.find_workers_by_type(WorkerType::Executor, false).unwrap().len(), 1);
    }

    #[test]
    fn test_complete_task_assignment_updates_metrics() {
        let registry = WorkerRegistry::new();
        registry.register("e1", developer(), None).unwrap();
        registry.load_balanced_worker(WorkerType::Executor, &[]).unwrap();
        registry.complete_task_assignment("e1", false, 4.0).unwrap();

        let stats = registry.statistics().unwrap();
        assert_eq!(stats.total_tasks_assigned, 1);
        assert_eq!(stats.failed_assignments, 1);
        assert_eq!(stats.total_current_load, 0);
        let perf = registry.performance("e1").unwrap().unwrap();
        assert!((perf.success_rate - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_cleanup_inactive_workers() {
        let registry = WorkerRegistry::new();
        registry.register("w1", developer(), None).unwrap();
        assert!(registry.cleanup_inactive_workers(Duration::from_secs(60)).unwrap().is_empty());
        std::thread::sleep(Duration::from_millis(5));
        let removed = registry.cleanup_inactive_workers(Duration::ZERO).unwrap();
        assert_eq!(removed, vec!["w1".to_string()]);
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(WorkerRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for j in 0..10 {
                        registry.register(&format!("w{}-{}", i, j), developer(), None).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.count().unwrap(), 80);
    }
}
