//! Error recovery.
//!
//! Records failures, picks a recovery strategy per failure, and drives the
//! follow-up work (reconnection backoff, task reassignment, message retries,
//! resource-lock expiry) from the server's maintenance tick.

mod health;

pub use health::{ConnectionHealth, FailureRecord, FailureType, ImpactLevel, RecoveryStrategy};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

use crate::config::RecoveryConfig;
use crate::error::{Result, poisoned};
use crate::registry::{WorkerRegistry, WorkerStatus, WorkerType};
use crate::router::{Envelope, MessageRouter};

/// Window used to count a component's recent failures when picking a strategy.
const STRATEGY_WINDOW_MINS: i64 = 10;
/// A heartbeat timeout is not reported again within this window.
const HEARTBEAT_REPORT_WINDOW_MINS: i64 = 5;
const RECENT_FAILURE_WINDOW_HOURS: i64 = 1;
const MAX_FAILURE_HISTORY: usize = 10_000;

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A reconnection attempt waiting for its backoff to elapse.
#[derive(Debug, Clone)]
struct ReconnectPlan {
    failure_id: String,
    component_id: String,
    attempt: u32,
    next_attempt_at: DateTime<Utc>,
    failed_at: DateTime<Utc>,
}

/// A message that failed to route and will be routed again.
#[derive(Debug, Clone)]
struct RetryMessage {
    failure_id: String,
    from: String,
    to: String,
    envelope: Envelope,
    retry_count: u32,
    next_retry: DateTime<Utc>,
}

/// A task from a crashed worker that no replacement could take yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedTask {
    pub task_id: String,
    pub original_worker: String,
    pub worker_type: WorkerType,
    pub failure_id: String,
    pub queued_at: DateTime<Utc>,
}

/// A lock granted by conflict arbitration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceLock {
    pub resource_id: String,
    pub worker_id: String,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of [`ErrorRecoverySystem::handle_worker_crash`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrashRecovery {
    pub failure_id: String,
    pub strategy: RecoveryStrategy,
    /// `(task_id, new_worker_id)` pairs.
    pub reassigned: Vec<(String, String)>,
    /// Tasks left waiting for a replacement.
    pub queued: Vec<String>,
}

/// What one maintenance pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub messages_retried: usize,
    pub messages_abandoned: usize,
    pub reconnections_succeeded: usize,
    pub reconnections_failed: usize,
    pub locks_expired: usize,
    pub tasks_reassigned: usize,
    pub components_marked_unhealthy: usize,
}

/// Health summary reported by [`ErrorRecoverySystem::system_health`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemHealth {
    /// Healthy components as a percentage; 100 when nothing is tracked.
    pub overall_health_pct: f64,
    pub healthy_components: usize,
    pub total_components: usize,
    pub active_recoveries: usize,
    /// Failures in the last hour.
    pub recent_failures: usize,
    pub total_failures: u64,
    pub resolved_failures: usize,
    pub average_recovery_secs: f64,
    pub pending_message_retries: usize,
    pub queued_tasks: usize,
    /// Unresolved resource conflicts.
    pub open_conflicts: usize,
    pub resource_locks: usize,
    pub successful_recoveries: u64,
    pub failed_recoveries: u64,
    pub failures_by_type: BTreeMap<String, u64>,
    pub recoveries_by_strategy: BTreeMap<String, u64>,
}

#[derive(Debug, Default)]
struct RecoveryCounters {
    total_failures: u64,
    successful_recoveries: u64,
    failed_recoveries: u64,
    failures_by_type: BTreeMap<String, u64>,
    recoveries_by_strategy: BTreeMap<String, u64>,
}

#[derive(Debug, Default)]
struct RecoveryState {
    failures: Vec<FailureRecord>,
    health: HashMap<String, ConnectionHealth>,
    reconnections: Vec<ReconnectPlan>,
    retry_queue: Vec<RetryMessage>,
    queued_tasks: BTreeMap<String, QueuedTask>,
    task_assignments: HashMap<String, String>,
    resource_locks: HashMap<String, ResourceLock>,
    counters: RecoveryCounters,
}

impl RecoveryState {
    /// Appends a failure and picks its strategy from the component's recent failures.
    fn record(&mut self, mut record: FailureRecord) -> (String, RecoveryStrategy) {
        let window_start = record.occurred_at - chrono::Duration::minutes(STRATEGY_WINDOW_MINS);
        let recent = 1 + self
            .failures
            .iter()
            .filter(|f| f.component == record.component && f.occurred_at >= window_start)
            .count();
        let strategy = RecoveryStrategy::for_failure(record.failure_type, recent);
        record.recovery_strategy = Some(strategy);
        if strategy == RecoveryStrategy::Escalate {
            record.impact_level = ImpactLevel::High;
        }

        let failure_id = record.failure_id.clone();
        let counters = &mut self.counters;
        counters.total_failures += 1;
        *counters.failures_by_type.entry(record.failure_type.as_str().to_string()).or_insert(0) +=
            1;
        *counters.recoveries_by_strategy.entry(strategy.as_str().to_string()).or_insert(0) += 1;

        self.failures.push(record);
        if self.failures.len() > MAX_FAILURE_HISTORY {
            let excess = self.failures.len() - MAX_FAILURE_HISTORY;
            self.failures.drain(..excess);
        }
        (failure_id, strategy)
    }

    fn mark_unhealthy(&mut self, component: &str) {
        self.health
            .entry(component.to_string())
            .or_insert_with(|| ConnectionHealth::new(component))
            .record_failure();
    }

    fn failure_mut(&mut self, failure_id: &str) -> Option<&mut FailureRecord> {
        self.failures.iter_mut().find(|f| f.failure_id == failure_id)
    }

    fn resolve(&mut self, failure_id: &str, attempts: u32) {
        if let Some(record) = self.failure_mut(failure_id) {
            record.resolve();
            record.recovery_attempts = attempts;
        }
        self.counters.successful_recoveries += 1;
    }

    fn heartbeat_since(&self, component: &str, since: DateTime<Utc>) -> bool {
        self.health.get(component).is_some_and(|h| h.last_heartbeat > since)
    }
}

/// Detects failures and drives recovery for a server's components.
pub struct ErrorRecoverySystem {
    config: RecoveryConfig,
    registry: Arc<WorkerRegistry>,
    router: Arc<MessageRouter>,
    state: Mutex<RecoveryState>,
}

impl fmt::Debug for ErrorRecoverySystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorRecoverySystem").field("config", &self.config).finish_non_exhaustive()
    }
}

impl ErrorRecoverySystem {
    pub fn new(
        config: RecoveryConfig,
        registry: Arc<WorkerRegistry>,
        router: Arc<MessageRouter>,
    ) -> Self {
        Self { config, registry, router, state: Mutex::new(RecoveryState::default()) }
    }

    /// Records a lost connection and schedules reconnection attempts if the
    /// strategy is retry.
    ///
    /// # Returns
    /// The chosen strategy.
    pub fn handle_connection_failure(
        &self,
        component: &str,
        error_message: &str,
        context: Map<String, Value>,
    ) -> Result<RecoveryStrategy> {
        let now = Utc::now();
        let mut state = self.state.lock().map_err(poisoned)?;
        let record = FailureRecord::new(
            FailureType::ConnectionFailure,
            component,
            format!("Connection failure: {error_message}"),
            context,
        );
        let (failure_id, strategy) = state.record(record);
        state.mark_unhealthy(component);

        match strategy {
            RecoveryStrategy::Retry => {
                state.reconnections.retain(|plan| plan.component_id != component);
                state.reconnections.push(ReconnectPlan {
                    failure_id,
                    component_id: component.to_string(),
                    attempt: 1,
                    next_attempt_at: after(now, self.config.backoff_delay(1)),
                    failed_at: now,
                });
                info!(component = %component, error = %error_message, "Scheduled reconnection");
            }
            RecoveryStrategy::Escalate => {
                error!(
                    component = %component,
                    error = %error_message,
                    "Repeated connection failures, escalating"
                );
            }
            _ => {
                warn!(component = %component, error = %error_message, "Connection recovery aborted");
            }
        }
        Ok(strategy)
    }

    /// Marks a crashed worker inactive and moves its tasks to workers of the
    /// same type.
    pub fn handle_worker_crash(
        &self,
        worker_id: &str,
        task_ids: &[String],
        context: Map<String, Value>,
    ) -> Result<CrashRecovery> {
        let worker_type = self
            .registry
            .get_worker(worker_id)?
            .map_or_else(WorkerType::default, |w| w.worker_type);
        self.registry.update_status(worker_id, WorkerStatus::Inactive, None)?;

        let (failure_id, strategy) = {
            let mut state = self.state.lock().map_err(poisoned)?;
            let record = FailureRecord::new(
                FailureType::WorkerCrash,
                worker_id,
                format!("Worker {worker_id} crashed"),
                context,
            );
            let outcome = state.record(record);
            state.mark_unhealthy(worker_id);
            outcome
        };
        if strategy == RecoveryStrategy::Escalate {
            error!(worker_id = %worker_id, "Worker crashed repeatedly, escalating");
        }

        let mut reassigned = Vec::new();
        let mut queued = Vec::new();
        for task_id in task_ids {
            match self.registry.load_balanced_worker(worker_type, &[])? {
                Some(replacement) => {
                    reassigned.push((task_id.clone(), replacement.worker_id));
                }
                None => queued.push(task_id.clone()),
            }
        }

        let mut state = self.state.lock().map_err(poisoned)?;
        for (task_id, new_worker) in &reassigned {
            state.task_assignments.insert(task_id.clone(), new_worker.clone());
            info!(task_id = %task_id, from = %worker_id, to = %new_worker, "Task reassigned");
        }
        let now = Utc::now();
        for task_id in &queued {
            state.queued_tasks.insert(
                task_id.clone(),
                QueuedTask {
                    task_id: task_id.clone(),
                    original_worker: worker_id.to_string(),
                    worker_type,
                    failure_id: failure_id.clone(),
                    queued_at: now,
                },
            );
            warn!(task_id = %task_id, worker_type = %worker_type, "No replacement worker, task queued");
        }
        if queued.is_empty() {
            let attempts = u32::try_from(reassigned.len()).unwrap_or(u32::MAX);
            state.resolve(&failure_id, attempts);
        }

        Ok(CrashRecovery { failure_id, strategy, reassigned, queued })
    }

    /// Arbitrates between workers competing for a resource.
    ///
    /// The highest priority score wins; ties go to the worker listed first.
    ///
    /// # Returns
    /// The winner, or `None` if no workers were given.
    pub fn handle_resource_conflict(
        &self,
        resource_id: &str,
        worker_ids: &[String],
        context: Map<String, Value>,
    ) -> Result<Option<String>> {
        let mut winner: Option<(f64, &String)> = None;
        for worker_id in worker_ids {
            let score = self.registry.load_stats(worker_id)?.map_or(0.0, |s| s.priority_score);
            if winner.is_none_or(|(best, _)| score > best) {
                winner = Some((score, worker_id));
            }
        }

        let mut state = self.state.lock().map_err(poisoned)?;
        let record = FailureRecord::new(
            FailureType::ResourceConflict,
            resource_id,
            format!("Resource conflict on {resource_id} between {} workers", worker_ids.len()),
            context,
        );
        let (failure_id, _) = state.record(record);

        let Some((_, winner)) = winner else {
            warn!(resource_id = %resource_id, "Resource conflict with no contenders");
            return Ok(None);
        };
        let now = Utc::now();
        state.resource_locks.insert(
            resource_id.to_string(),
            ResourceLock {
                resource_id: resource_id.to_string(),
                worker_id: winner.clone(),
                locked_at: now,
                expires_at: after(now, Duration::from_secs(self.config.resource_lock_secs)),
            },
        );
        state.resolve(&failure_id, 1);
        info!(resource_id = %resource_id, winner = %winner, "Resource conflict resolved");
        Ok(Some(winner.clone()))
    }

    /// Queues a message that failed to route for retry with backoff.
    ///
    /// # Returns
    /// The failure id.
    pub fn handle_communication_failure(
        &self,
        from: &str,
        to: &str,
        envelope: Envelope,
        error_message: &str,
    ) -> Result<String> {
        let now = Utc::now();
        let mut state = self.state.lock().map_err(poisoned)?;
        let mut context = Map::new();
        context.insert("from".to_string(), json!(from));
        context.insert("to".to_string(), json!(to));
        context.insert("message_type".to_string(), json!(envelope.message_type.as_str()));
        let record = FailureRecord::new(
            FailureType::CommunicationFailure,
            &format!("{from}->{to}"),
            format!("Communication failure: {error_message}"),
            context,
        );
        let (failure_id, strategy) = state.record(record);
        if strategy == RecoveryStrategy::Escalate {
            error!(from = %from, to = %to, "Repeated communication failures, escalating");
        }

        state.retry_queue.push(RetryMessage {
            failure_id: failure_id.clone(),
            from: from.to_string(),
            to: to.to_string(),
            envelope,
            retry_count: 0,
            next_retry: after(now, self.config.backoff_delay(1)),
        });
        debug!(from = %from, to = %to, "Message queued for retry");
        Ok(failure_id)
    }

    /// Records a heartbeat, restoring the component's health.
    pub fn record_heartbeat(&self, component: &str, response_time_ms: f64) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        let health = state
            .health
            .entry(component.to_string())
            .or_insert_with(|| ConnectionHealth::new(component));
        health.last_heartbeat = Utc::now();
        health.response_time_ms = response_time_ms;
        health.record_success();
        Ok(())
    }

    /// Runs one pass of the scheduled recovery work.
    ///
    /// Order: message retries, reconnections, expired resource locks, queued
    /// tasks, heartbeat check.
    pub fn run_maintenance(&self) -> Result<MaintenanceReport> {
        let mut report = MaintenanceReport::default();
        self.retry_messages(&mut report)?;
        self.attempt_reconnections(&mut report)?;
        self.expire_resource_locks(&mut report)?;
        self.reassign_queued_tasks(&mut report)?;
        self.check_heartbeats(&mut report)?;
        Ok(report)
    }

    fn retry_messages(&self, report: &mut MaintenanceReport) -> Result<()> {
        let now = Utc::now();
        let due: Vec<RetryMessage> = {
            let mut state = self.state.lock().map_err(poisoned)?;
            let (due, waiting) =
                std::mem::take(&mut state.retry_queue).into_iter().partition(|m| m.next_retry <= now);
            state.retry_queue = waiting;
            due
        };

        for mut message in due {
            let routed = match self.router.route(&message.from, &message.to, message.envelope.clone())
            {
                Ok(routed) => routed,
                Err(e) => {
                    debug!(from = %message.from, to = %message.to, error = %e, "Retry failed");
                    false
                }
            };
            let mut state = self.state.lock().map_err(poisoned)?;
            if routed {
                state.resolve(&message.failure_id, message.retry_count + 1);
                report.messages_retried += 1;
                info!(from = %message.from, to = %message.to, "Message retry succeeded");
                continue;
            }
            message.retry_count += 1;
            if message.retry_count < self.config.max_retry_attempts {
                message.next_retry =
                    after(Utc::now(), self.config.backoff_delay(message.retry_count + 1));
                state.retry_queue.push(message);
            } else {
                if let Some(record) = state.failure_mut(&message.failure_id) {
                    record.recovery_attempts = message.retry_count;
                }
                state.counters.failed_recoveries += 1;
                report.messages_abandoned += 1;
                warn!(
                    from = %message.from,
                    to = %message.to,
                    attempts = message.retry_count,
                    "Message retries exhausted"
                );
            }
        }
        Ok(())
    }

    fn attempt_reconnections(&self, report: &mut MaintenanceReport) -> Result<()> {
        let now = Utc::now();
        let due: Vec<ReconnectPlan> = {
            let mut state = self.state.lock().map_err(poisoned)?;
            let (due, waiting) = std::mem::take(&mut state.reconnections)
                .into_iter()
                .partition(|p| p.next_attempt_at <= now);
            state.reconnections = waiting;
            due
        };

        for mut plan in due {
            let registered = self.registry.is_active(&plan.component_id)?;
            let mut state = self.state.lock().map_err(poisoned)?;
            if registered || state.heartbeat_since(&plan.component_id, plan.failed_at) {
                state.resolve(&plan.failure_id, plan.attempt);
                if let Some(health) = state.health.get_mut(&plan.component_id) {
                    health.record_success();
                }
                report.reconnections_succeeded += 1;
                info!(component = %plan.component_id, attempt = plan.attempt, "Reconnected");
                continue;
            }

            if let Some(record) = state.failure_mut(&plan.failure_id) {
                record.recovery_attempts = plan.attempt;
            }
            if plan.attempt >= self.config.max_retry_attempts {
                state.counters.failed_recoveries += 1;
                report.reconnections_failed += 1;
                warn!(
                    component = %plan.component_id,
                    attempts = plan.attempt,
                    "Reconnection attempts exhausted"
                );
            } else {
                plan.attempt += 1;
                plan.next_attempt_at = after(Utc::now(), self.config.backoff_delay(plan.attempt));
                debug!(component = %plan.component_id, attempt = plan.attempt, "Reconnection rescheduled");
                state.reconnections.push(plan);
            }
        }
        Ok(())
    }

    fn expire_resource_locks(&self, report: &mut MaintenanceReport) -> Result<()> {
        let now = Utc::now();
        let mut state = self.state.lock().map_err(poisoned)?;
        let before = state.resource_locks.len();
        state.resource_locks.retain(|resource_id, lock| {
            let live = lock.expires_at > now;
            if !live {
                debug!(resource_id = %resource_id, worker_id = %lock.worker_id, "Resource lock expired");
            }
            live
        });
        report.locks_expired += before - state.resource_locks.len();
        Ok(())
    }

    fn reassign_queued_tasks(&self, report: &mut MaintenanceReport) -> Result<()> {
        let queued: Vec<QueuedTask> =
            self.state.lock().map_err(poisoned)?.queued_tasks.values().cloned().collect();

        for task in queued {
            let Some(replacement) = self.registry.load_balanced_worker(task.worker_type, &[])?
            else {
                continue;
            };
            let mut state = self.state.lock().map_err(poisoned)?;
            state.queued_tasks.remove(&task.task_id);
            state.task_assignments.insert(task.task_id.clone(), replacement.worker_id.clone());
            let failure_done = !state.queued_tasks.values().any(|t| t.failure_id == task.failure_id);
            if failure_done {
                state.resolve(&task.failure_id, 1);
            }
            report.tasks_reassigned += 1;
            info!(
                task_id = %task.task_id,
                from = %task.original_worker,
                to = %replacement.worker_id,
                "Queued task reassigned"
            );
        }
        Ok(())
    }

    fn check_heartbeats(&self, report: &mut MaintenanceReport) -> Result<()> {
        let now = Utc::now();
        let silence = chrono::Duration::seconds(
            i64::try_from(self.config.heartbeat_interval_secs.saturating_mul(2)).unwrap_or(i64::MAX),
        );
        let report_window = now - chrono::Duration::minutes(HEARTBEAT_REPORT_WINDOW_MINS);

        let mut to_report = Vec::new();
        {
            let mut state = self.state.lock().map_err(poisoned)?;
            let silent: Vec<String> = state
                .health
                .values()
                .filter(|h| h.is_healthy && now.signed_duration_since(h.last_heartbeat) > silence)
                .map(|h| h.component_id.clone())
                .collect();
            for component in silent {
                report.components_marked_unhealthy += 1;
                let reported = state.failures.iter().any(|f| {
                    f.component == component
                        && f.failure_type == FailureType::ConnectionFailure
                        && f.occurred_at >= report_window
                });
                if reported {
                    state.mark_unhealthy(&component);
                } else {
                    to_report.push(component);
                }
            }
        }

        for component in to_report {
            warn!(component = %component, "Heartbeat timeout");
            let mut context = Map::new();
            context.insert("reason".to_string(), json!("heartbeat_timeout"));
            self.handle_connection_failure(&component, "Heartbeat timeout", context)?;
        }
        Ok(())
    }

    /// Current owner of a reassigned task.
    pub fn task_assignment(&self, task_id: &str) -> Result<Option<String>> {
        Ok(self.state.lock().map_err(poisoned)?.task_assignments.get(task_id).cloned())
    }

    /// Tasks still waiting for a replacement worker.
    pub fn queued_tasks(&self) -> Result<Vec<QueuedTask>> {
        Ok(self.state.lock().map_err(poisoned)?.queued_tasks.values().cloned().collect())
    }

    pub fn resource_lock(&self, resource_id: &str) -> Result<Option<ResourceLock>> {
        Ok(self.state.lock().map_err(poisoned)?.resource_locks.get(resource_id).cloned())
    }

    pub fn component_health(&self, component: &str) -> Result<Option<ConnectionHealth>> {
        Ok(self.state.lock().map_err(poisoned)?.health.get(component).cloned())
    }

    /// Recorded failures, newest first.
    pub fn failure_history(&self, limit: usize) -> Result<Vec<FailureRecord>> {
        let state = self.state.lock().map_err(poisoned)?;
        Ok(state.failures.iter().rev().take(limit).cloned().collect())
    }

    pub fn system_health(&self) -> Result<SystemHealth> {
        let state = self.state.lock().map_err(poisoned)?;
        let now = Utc::now();
        let recent_cutoff = now - chrono::Duration::hours(RECENT_FAILURE_WINDOW_HOURS);

        let total_components = state.health.len();
        let healthy_components = state.health.values().filter(|h| h.is_healthy).count();
        let overall_health_pct = if total_components == 0 {
            100.0
        } else {
            healthy_components as f64 / total_components as f64 * 100.0
        };

        let recovery_times: Vec<f64> =
            state.failures.iter().filter_map(FailureRecord::recovery_secs).collect();
        let average_recovery_secs = if recovery_times.is_empty() {
            0.0
        } else {
            recovery_times.iter().sum::<f64>() / recovery_times.len() as f64
        };

        Ok(SystemHealth {
            overall_health_pct,
            healthy_components,
            total_components,
            active_recoveries: state.reconnections.len(),
            recent_failures: state.failures.iter().filter(|f| f.occurred_at >= recent_cutoff).count(),
            total_failures: state.counters.total_failures,
            resolved_failures: state.failures.iter().filter(|f| f.is_resolved).count(),
            average_recovery_secs,
            pending_message_retries: state.retry_queue.len(),
            queued_tasks: state.queued_tasks.len(),
            open_conflicts: state
                .failures
                .iter()
                .filter(|f| f.failure_type == FailureType::ResourceConflict && !f.is_resolved)
                .count(),
            resource_locks: state.resource_locks.len(),
            successful_recoveries: state.counters.successful_recoveries,
            failed_recoveries: state.counters.failed_recoveries,
            failures_by_type: state.counters.failures_by_type.clone(),
            recoveries_by_strategy: state.counters.recoveries_by_strategy.clone(),
        })
    }

    /// Drops all failures, health records and scheduled work.
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        *state = RecoveryState::default();
        info!("Error recovery shut down");
        Ok(())
    }
}
