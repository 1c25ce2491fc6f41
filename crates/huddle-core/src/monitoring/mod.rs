//! Metrics, alerts and optimization recommendations.
//!
//! Metrics are named series with a bounded history. Recording a value checks
//! the configured warning/critical thresholds for that name; an unresolved
//! alert for the same metric and level suppresses new ones. Analysis adds
//! slow-operation and anomaly alerts and recommendations derived from the
//! current CPU, memory and error-rate values.

mod export;
mod metric;

pub use export::{
    CsvExporter, ExportFormat, JsonExporter, MetricExporter, MetricSeries, MetricsExport,
    exporter_for,
};
pub use metric::{
    Alert, AlertDraft, AlertLevel, MAX_METRIC_HISTORY, MetricPoint, MetricType, NewRecommendation,
    OperationRecord, OptimizationRecommendation, PerformanceMetric, RecommendationPriority, Trend,
    WorkerMetricValue,
};

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, json};
use tracing::{debug, info, warn};

use crate::config::MonitoringConfig;
use crate::error::{Result, poisoned};
use crate::notify::{Callback, fan_out};
use metric::DEFAULT_METRICS;

/// Maximum operation records kept.
pub const MAX_OPERATION_HISTORY: usize = 10_000;
/// Average duration above which an operation is reported slow, in seconds.
const SLOW_OPERATION_SECS: f64 = 5.0;
const SLOW_OPERATION_WINDOW_MINS: i64 = 10;
const OVERVIEW_WINDOW_MINS: i64 = 5;
const ANOMALY_WINDOW: usize = 10;

/// Inputs for [`MonitoringSystem::collect_collaboration_metrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollaborationSnapshot {
    pub active_workers: usize,
    pub active_spaces: usize,
    /// Router lifetime message count.
    pub total_messages: u64,
    pub average_delivery_time_ms: f64,
    /// Registry average success rate, `0.0..=1.0`.
    pub average_success_rate: f64,
}

/// Collaboration figures derived from the last snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollaborationMetrics {
    pub active_workers: usize,
    pub active_spaces: usize,
    pub messages_per_second: f64,
    pub average_response_time_ms: f64,
    pub task_success_rate: f64,
}

/// What one [`MonitoringSystem::analyze`] pass produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisReport {
    pub slow_operation_alerts: usize,
    pub recommendations_added: usize,
    pub anomalies: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Snapshot returned by [`MonitoringSystem::system_overview`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemOverview {
    pub timestamp: DateTime<Utc>,
    pub status: HealthStatus,
    pub active_alerts: usize,
    pub pending_recommendations: usize,
    /// Average over the last five minutes.
    pub operations_per_minute: f64,
    pub average_operation_secs: f64,
    pub total_operations: usize,
    /// Workers with per-worker metrics.
    pub tracked_workers: usize,
    pub collaboration: CollaborationMetrics,
    pub total_metrics: usize,
    pub metrics_with_alerts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationStats {
    pub count: usize,
    pub average_secs: f64,
    pub min_secs: f64,
    pub max_secs: f64,
    pub total_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricTrend {
    pub current_value: f64,
    pub average_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub data_points: usize,
    pub trend: Trend,
}

/// Report over the last `hours`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub duration_hours: u64,
    pub operations: BTreeMap<String, OperationStats>,
    /// Metrics with at least two points in the period.
    pub metric_trends: BTreeMap<String, MetricTrend>,
    pub worker_performance: BTreeMap<String, BTreeMap<String, WorkerMetricValue>>,
    pub total_alerts: usize,
    pub resolved_alerts: usize,
    pub active_alerts: usize,
}

#[derive(Debug)]
struct RunningTimer {
    operation_name: String,
    started: Instant,
}

#[derive(Default)]
struct MonitorState {
    metrics: BTreeMap<String, PerformanceMetric>,
    alerts: HashMap<String, Alert>,
    active_alerts: BTreeSet<String>,
    recommendations: HashMap<String, OptimizationRecommendation>,
    timers: HashMap<String, RunningTimer>,
    operations: VecDeque<OperationRecord>,
    worker_metrics: BTreeMap<String, BTreeMap<String, WorkerMetricValue>>,
    collaboration: CollaborationMetrics,
    last_collection: Option<(Instant, u64)>,
    subscribers: BTreeMap<String, Callback<Alert>>,
}

impl MonitorState {
    fn with_default_metrics() -> Self {
        let metrics = DEFAULT_METRICS
            .iter()
            .map(|(name, metric_type, description, unit)| {
                (name.to_string(), PerformanceMetric::new(name, *metric_type, description, unit))
            })
            .collect();
        Self { metrics, ..Self::default() }
    }

    fn has_open_alert(&self, metric_name: &str, level: AlertLevel) -> bool {
        self.active_alerts.iter().filter_map(|id| self.alerts.get(id)).any(|alert| {
            alert.level == level && alert.metric_name.as_deref() == Some(metric_name)
        })
    }

    fn insert_alert(&mut self, draft: AlertDraft) -> Alert {
        let alert = draft.into_alert();
        warn!(
            level = %alert.level,
            component = %alert.component,
            alert_id = %alert.alert_id,
            "ALERT {}: {}",
            alert.title,
            alert.description
        );
        self.active_alerts.insert(alert.alert_id.clone());
        self.alerts.insert(alert.alert_id.clone(), alert.clone());
        alert
    }

    /// Inserts an alert for a metric unless one is already open for it at that level.
    fn insert_deduplicated(&mut self, draft: AlertDraft, raised: &mut Vec<Alert>) {
        let open = draft.metric_name.as_deref().is_some_and(|m| self.has_open_alert(m, draft.level));
        if !open {
            raised.push(self.insert_alert(draft));
        }
    }

    fn record(
        &mut self,
        name: &str,
        value: f64,
        labels: BTreeMap<String, String>,
        metric_type: MetricType,
        config: &MonitoringConfig,
    ) -> Vec<Alert> {
        let current = self
            .metrics
            .entry(name.to_string())
            .or_insert_with(|| PerformanceMetric::auto(name, metric_type))
            .record(value, metric_type, labels);

        let mut raised = Vec::new();
        let Some(threshold) = config.alert_thresholds.get(name) else {
            return raised;
        };
        for (level, bound) in
            [(AlertLevel::Warning, threshold.warning), (AlertLevel::Critical, threshold.critical)]
        {
            if current > bound {
                let draft = AlertDraft::new(
                    level,
                    format!("{name} threshold exceeded"),
                    format!("{name} value {current} exceeds {level} threshold {bound}"),
                    "system",
                )
                .for_metric(name, Some(bound), current);
                self.insert_deduplicated(draft, &mut raised);
            }
        }
        raised
    }

    fn subscriber_snapshot(&self) -> Vec<(String, Callback<Alert>)> {
        self.subscribers.iter().map(|(id, cb)| (id.clone(), cb.clone())).collect()
    }

    fn has_pending_recommendation(&self, category: &str, title_fragment: &str) -> bool {
        let fragment = title_fragment.to_lowercase();
        self.recommendations.values().any(|r| {
            !r.implemented && r.category == category && r.title.to_lowercase().contains(&fragment)
        })
    }
}

/// Collects metrics and raises alerts for a server.
pub struct MonitoringSystem {
    config: MonitoringConfig,
    state: Mutex<MonitorState>,
}

impl fmt::Debug for MonitoringSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoringSystem").field("config", &self.config).finish_non_exhaustive()
    }
}

impl MonitoringSystem {
    pub fn new(config: MonitoringConfig) -> Self {
        Self { config, state: Mutex::new(MonitorState::with_default_metrics()) }
    }

    fn notify(&self, alerts: &[Alert], subscribers: &[(String, Callback<Alert>)]) {
        for alert in alerts {
            fan_out("monitoring", subscribers, alert);
        }
    }

    /// Records a metric value.
    ///
    /// Counters add `value` to the current value; every other type replaces it.
    ///
    /// # Returns
    /// The metric's current value after recording.
    pub fn record_metric(
        &self,
        name: &str,
        value: f64,
        labels: BTreeMap<String, String>,
        metric_type: MetricType,
    ) -> Result<f64> {
        let (current, raised, subscribers) = {
            let mut state = self.state.lock().map_err(poisoned)?;
            let raised = state.record(name, value, labels, metric_type, &self.config);
            let current = state.metrics.get(name).map_or(value, |m| m.current_value);
            (current, raised, state.subscriber_snapshot())
        };
        self.notify(&raised, &subscribers);
        Ok(current)
    }

    pub fn metric(&self, name: &str) -> Result<Option<PerformanceMetric>> {
        Ok(self.state.lock().map_err(poisoned)?.metrics.get(name).cloned())
    }

    /// Starts timing an operation.
    ///
    /// # Returns
    /// The operation id, `{name}_{8 hex}` unless one is given.
    pub fn start_operation_timer(
        &self,
        operation_name: &str,
        operation_id: Option<&str>,
    ) -> Result<String> {
        let operation_id = operation_id.map_or_else(
            || format!("{operation_name}_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            str::to_string,
        );
        let mut state = self.state.lock().map_err(poisoned)?;
        state.timers.insert(
            operation_id.clone(),
            RunningTimer { operation_name: operation_name.to_string(), started: Instant::now() },
        );
        Ok(operation_id)
    }

    /// Stops a timer and records `operation_duration_<name>`.
    ///
    /// # Returns
    /// Elapsed seconds, or `None` for an unknown id.
    pub fn stop_operation_timer(
        &self,
        operation_id: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<Option<f64>> {
        let (duration, raised, subscribers) = {
            let mut state = self.state.lock().map_err(poisoned)?;
            let Some(timer) = state.timers.remove(operation_id) else {
                warn!(operation_id = %operation_id, "No timer found for operation");
                return Ok(None);
            };
            let duration = timer.started.elapsed().as_secs_f64();
            let raised = state.record(
                &format!("operation_duration_{}", timer.operation_name),
                duration,
                labels.clone(),
                MetricType::Timer,
                &self.config,
            );
            state.operations.push_back(OperationRecord {
                operation_id: operation_id.to_string(),
                operation_name: timer.operation_name,
                duration_secs: duration,
                timestamp: Utc::now(),
                labels,
            });
            while state.operations.len() > MAX_OPERATION_HISTORY {
                state.operations.pop_front();
            }
            (duration, raised, state.subscriber_snapshot())
        };
        self.notify(&raised, &subscribers);
        Ok(Some(duration))
    }

    /// Records a per-worker value, mirrored into the `worker_<metric>` series.
    pub fn record_worker_metric(
        &self,
        worker_id: &str,
        metric_name: &str,
        value: f64,
    ) -> Result<()> {
        {
            let mut state = self.state.lock().map_err(poisoned)?;
            state
                .worker_metrics
                .entry(worker_id.to_string())
                .or_default()
                .insert(metric_name.to_string(), WorkerMetricValue { value, timestamp: Utc::now() });
        }
        let labels = BTreeMap::from([("worker_id".to_string(), worker_id.to_string())]);
        self.record_metric(&format!("worker_{metric_name}"), value, labels, MetricType::Gauge)?;
        Ok(())
    }

    pub fn worker_metrics(&self, worker_id: &str) -> Result<BTreeMap<String, WorkerMetricValue>> {
        let state = self.state.lock().map_err(poisoned)?;
        Ok(state.worker_metrics.get(worker_id).cloned().unwrap_or_default())
    }

    /// Raises an alert and notifies subscribers.
    ///
    /// # Returns
    /// The alert id.
    pub fn create_alert(&self, draft: AlertDraft) -> Result<String> {
        let (alert, subscribers) = {
            let mut state = self.state.lock().map_err(poisoned)?;
            let alert = state.insert_alert(draft);
            (alert, state.subscriber_snapshot())
        };
        let alert_id = alert.alert_id.clone();
        self.notify(&[alert], &subscribers);
        Ok(alert_id)
    }

    /// Resolves an alert.
    ///
    /// # Returns
    /// `false` if the alert is unknown.
    pub fn resolve_alert(&self, alert_id: &str) -> Result<bool> {
        let mut state = self.state.lock().map_err(poisoned)?;
        let Some(alert) = state.alerts.get_mut(alert_id) else {
            return Ok(false);
        };
        alert.is_resolved = true;
        alert.resolved_at = Some(Utc::now());
        info!(alert_id = %alert_id, title = %alert.title, "Alert resolved");
        state.active_alerts.remove(alert_id);
        Ok(true)
    }

    pub fn alert(&self, alert_id: &str) -> Result<Option<Alert>> {
        Ok(self.state.lock().map_err(poisoned)?.alerts.get(alert_id).cloned())
    }

    /// Unresolved alerts, oldest first.
    pub fn active_alerts(&self) -> Result<Vec<Alert>> {
        let state = self.state.lock().map_err(poisoned)?;
        let mut alerts: Vec<Alert> =
            state.active_alerts.iter().filter_map(|id| state.alerts.get(id)).cloned().collect();
        alerts.sort_by_key(|a| a.created_at);
        Ok(alerts)
    }

    /// Registers an alert callback.
    ///
    /// # Returns
    /// Subscription id for [`Self::unsubscribe_from_alerts`].
    pub fn subscribe_to_alerts(&self, callback: Callback<Alert>) -> Result<String> {
        let subscription_id = uuid::Uuid::new_v4().to_string();
        let mut state = self.state.lock().map_err(poisoned)?;
        state.subscribers.insert(subscription_id.clone(), callback);
        Ok(subscription_id)
    }

    pub fn unsubscribe_from_alerts(&self, subscription_id: &str) -> Result<bool> {
        Ok(self.state.lock().map_err(poisoned)?.subscribers.remove(subscription_id).is_some())
    }

    pub fn add_recommendation(&self, recommendation: NewRecommendation) -> Result<String> {
        let recommendation = OptimizationRecommendation::from_new(recommendation);
        let recommendation_id = recommendation.recommendation_id.clone();
        info!(
            title = %recommendation.title,
            priority = ?recommendation.priority,
            "Optimization recommendation added"
        );
        self.state
            .lock()
            .map_err(poisoned)?
            .recommendations
            .insert(recommendation_id.clone(), recommendation);
        Ok(recommendation_id)
    }

    /// Recommendations, highest priority first, newest first within a priority.
    pub fn recommendations(
        &self,
        category: Option<&str>,
        priority: Option<RecommendationPriority>,
    ) -> Result<Vec<OptimizationRecommendation>> {
        let state = self.state.lock().map_err(poisoned)?;
        let mut matching: Vec<OptimizationRecommendation> = state
            .recommendations
            .values()
            .filter(|r| category.is_none_or(|c| r.category == c))
            .filter(|r| priority.is_none_or(|p| r.priority == p))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.priority.cmp(&a.priority).then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(matching)
    }

    pub fn mark_recommendation_implemented(&self, recommendation_id: &str) -> Result<bool> {
        let mut state = self.state.lock().map_err(poisoned)?;
        let Some(recommendation) = state.recommendations.get_mut(recommendation_id) else {
            return Ok(false);
        };
        recommendation.implemented = true;
        Ok(true)
    }

    /// Returns `true` once a collection interval has passed since the last
    /// collaboration snapshot.
    pub fn collection_due(&self) -> Result<bool> {
        let interval = Duration::from_secs(self.config.collection_interval_secs);
        let state = self.state.lock().map_err(poisoned)?;
        Ok(state.last_collection.is_none_or(|(at, _)| at.elapsed() >= interval))
    }

    /// Records collaboration metrics from a server snapshot.
    ///
    /// `messages_per_second` is the router message delta over the time since
    /// the previous snapshot; the first snapshot only sets the baseline.
    pub fn collect_collaboration_metrics(&self, snapshot: &CollaborationSnapshot) -> Result<()> {
        let now = Instant::now();
        let messages_per_second = {
            let mut state = self.state.lock().map_err(poisoned)?;
            let rate = state.last_collection.and_then(|(at, count)| {
                let elapsed = now.duration_since(at).as_secs_f64();
                (elapsed > 0.0)
                    .then(|| snapshot.total_messages.saturating_sub(count) as f64 / elapsed)
            });
            state.last_collection = Some((now, snapshot.total_messages));
            state.collaboration = CollaborationMetrics {
                active_workers: snapshot.active_workers,
                active_spaces: snapshot.active_spaces,
                messages_per_second: rate.unwrap_or(state.collaboration.messages_per_second),
                average_response_time_ms: snapshot.average_delivery_time_ms,
                task_success_rate: snapshot.average_success_rate * 100.0,
            };
            rate
        };

        let gauge = |name: &str, value: f64| {
            self.record_metric(name, value, BTreeMap::new(), MetricType::Gauge).map(|_| ())
        };
        gauge("active_workers", snapshot.active_workers as f64)?;
        if let Some(rate) = messages_per_second {
            gauge("messages_per_second", rate)?;
        }
        gauge("average_response_time", snapshot.average_delivery_time_ms)?;
        gauge("task_success_rate", snapshot.average_success_rate * 100.0)?;
        gauge("error_rate", (1.0 - snapshot.average_success_rate) * 100.0)?;
        debug!(active_workers = snapshot.active_workers, "Collaboration metrics collected");
        Ok(())
    }

    /// Runs slow-operation detection, recommendation generation and anomaly
    /// detection.
    pub fn analyze(&self) -> Result<AnalysisReport> {
        let mut report = AnalysisReport::default();
        let mut new_recommendations = Vec::new();
        let (raised, subscribers) = {
            let mut state = self.state.lock().map_err(poisoned)?;
            let mut raised = Vec::new();

            let cutoff = Utc::now() - chrono::Duration::minutes(SLOW_OPERATION_WINDOW_MINS);
            let recent: Vec<&OperationRecord> =
                state.operations.iter().filter(|op| op.timestamp > cutoff).collect();
            if recent.len() > 10 {
                let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
                for op in recent {
                    groups.entry(op.operation_name.as_str()).or_default().push(op.duration_secs);
                }
                let slow: Vec<AlertDraft> = groups
                    .into_iter()
                    .filter(|(_, durations)| durations.len() >= 5)
                    .filter_map(|(name, durations)| {
                        let average = durations.iter().sum::<f64>() / durations.len() as f64;
                        let max = durations.iter().copied().fold(0.0, f64::max);
                        (average > SLOW_OPERATION_SECS).then(|| {
                            AlertDraft::new(
                                AlertLevel::Warning,
                                format!("Slow operation detected: {name}"),
                                format!("Average duration: {average:.2}s, Max: {max:.2}s"),
                                name,
                            )
                            .for_metric(&format!("operation_duration_{name}"), None, average)
                        })
                    })
                    .collect();
                for draft in slow {
                    let before = raised.len();
                    state.insert_deduplicated(draft, &mut raised);
                    report.slow_operation_alerts += raised.len() - before;
                }
            }

            new_recommendations.extend(recommendations_from_metrics(&state));

            let anomalies: Vec<AlertDraft> = state
                .metrics
                .values()
                .filter(|m| m.history.len() >= ANOMALY_WINDOW)
                .filter_map(|m| {
                    let recent = m.history.iter().rev().take(ANOMALY_WINDOW);
                    let average = recent.map(|p| p.value).sum::<f64>() / ANOMALY_WINDOW as f64;
                    (average > 0.0 && m.current_value > average * 2.0).then(|| {
                        AlertDraft::new(
                            AlertLevel::Warning,
                            format!("Anomaly detected in {}", m.name),
                            format!(
                                "Current value {:.2} is well above recent average {average:.2}",
                                m.current_value
                            ),
                            "system",
                        )
                        .for_metric(&m.name, None, m.current_value)
                    })
                })
                .collect();
            for draft in anomalies {
                let before = raised.len();
                state.insert_deduplicated(draft, &mut raised);
                report.anomalies += raised.len() - before;
            }

            (raised, state.subscriber_snapshot())
        };
        self.notify(&raised, &subscribers);

        for recommendation in new_recommendations {
            self.add_recommendation(recommendation)?;
            report.recommendations_added += 1;
        }
        Ok(report)
    }

    pub fn system_overview(&self) -> Result<SystemOverview> {
        let state = self.state.lock().map_err(poisoned)?;
        let now = Utc::now();
        let cutoff = now - chrono::Duration::minutes(OVERVIEW_WINDOW_MINS);
        let recent: Vec<f64> = state
            .operations
            .iter()
            .filter(|op| op.timestamp > cutoff)
            .map(|op| op.duration_secs)
            .collect();
        let average_operation_secs = if recent.is_empty() {
            0.0
        } else {
            recent.iter().sum::<f64>() / recent.len() as f64
        };

        let alerted: BTreeSet<&str> = state
            .active_alerts
            .iter()
            .filter_map(|id| state.alerts.get(id))
            .filter_map(|a| a.metric_name.as_deref())
            .collect();
        let active_alerts = state.active_alerts.len();

        Ok(SystemOverview {
            timestamp: now,
            status: if active_alerts == 0 { HealthStatus::Healthy } else { HealthStatus::Degraded },
            active_alerts,
            pending_recommendations: state.recommendations.values().filter(|r| !r.implemented).count(),
            operations_per_minute: recent.len() as f64 / OVERVIEW_WINDOW_MINS as f64,
            average_operation_secs,
            total_operations: state.operations.len(),
            tracked_workers: state.worker_metrics.len(),
            collaboration: state.collaboration.clone(),
            total_metrics: state.metrics.len(),
            metrics_with_alerts: state.metrics.keys().filter(|m| alerted.contains(m.as_str())).count(),
        })
    }

    pub fn performance_report(&self, hours: u64) -> Result<PerformanceReport> {
        let state = self.state.lock().map_err(poisoned)?;
        let period_end = Utc::now();
        let period_start = cutoff_hours(period_end, hours);

        let mut durations: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for op in state.operations.iter().filter(|op| op.timestamp > period_start) {
            durations.entry(op.operation_name.clone()).or_default().push(op.duration_secs);
        }
        let operations = durations
            .into_iter()
            .map(|(name, values)| {
                let total_secs: f64 = values.iter().sum();
                let stats = OperationStats {
                    count: values.len(),
                    average_secs: total_secs / values.len() as f64,
                    min_secs: values.iter().copied().fold(f64::INFINITY, f64::min),
                    max_secs: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    total_secs,
                };
                (name, stats)
            })
            .collect();

        let mut metric_trends = BTreeMap::new();
        for (name, metric) in &state.metrics {
            let values: Vec<f64> = metric.points_since(period_start).map(|p| p.value).collect();
            let (Some(first), Some(last)) = (values.first(), values.last()) else {
                continue;
            };
            if values.len() < 2 {
                continue;
            }
            metric_trends.insert(
                name.clone(),
                MetricTrend {
                    current_value: metric.current_value,
                    average_value: values.iter().sum::<f64>() / values.len() as f64,
                    min_value: values.iter().copied().fold(f64::INFINITY, f64::min),
                    max_value: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    data_points: values.len(),
                    trend: Trend::between(*first, *last),
                },
            );
        }

        let worker_performance = state
            .worker_metrics
            .iter()
            .filter_map(|(worker_id, metrics)| {
                let recent: BTreeMap<String, WorkerMetricValue> = metrics
                    .iter()
                    .filter(|(_, v)| v.timestamp > period_start)
                    .map(|(k, v)| (k.clone(), *v))
                    .collect();
                (!recent.is_empty()).then(|| (worker_id.clone(), recent))
            })
            .collect();

        let period_alerts: Vec<&Alert> =
            state.alerts.values().filter(|a| a.created_at > period_start).collect();
        Ok(PerformanceReport {
            period_start,
            period_end,
            duration_hours: hours,
            operations,
            metric_trends,
            worker_performance,
            total_alerts: period_alerts.len(),
            resolved_alerts: period_alerts.iter().filter(|a| a.is_resolved).count(),
            active_alerts: state.active_alerts.len(),
        })
    }

    /// Exports the last `hours` of every metric.
    ///
    /// # Errors
    /// `InvalidInput` for a format other than `json` or `csv`.
    pub fn export_metrics(&self, format: &str, hours: u64) -> Result<String> {
        let format: ExportFormat = format.parse()?;
        let export = {
            let state = self.state.lock().map_err(poisoned)?;
            let now = Utc::now();
            let cutoff = cutoff_hours(now, hours);
            MetricsExport {
                export_timestamp: now,
                time_range_hours: hours,
                metrics: state
                    .metrics
                    .values()
                    .map(|m| MetricSeries {
                        name: m.name.clone(),
                        metric_type: m.metric_type,
                        description: m.description.clone(),
                        unit: m.unit.clone(),
                        current_value: m.current_value,
                        data_points: m.points_since(cutoff).cloned().collect(),
                    })
                    .collect(),
            }
        };
        exporter_for(format).export(&export)
    }

    /// Drops metric points and operation records older than the retention period.
    ///
    /// # Returns
    /// Number of entries removed.
    pub fn cleanup_old_data(&self) -> Result<usize> {
        let cutoff = cutoff_hours(Utc::now(), self.config.retention_hours);
        let mut state = self.state.lock().map_err(poisoned)?;
        let mut removed = 0;
        for metric in state.metrics.values_mut() {
            while metric.history.front().is_some_and(|p| p.timestamp < cutoff) {
                metric.history.pop_front();
                removed += 1;
            }
        }
        while state.operations.front().is_some_and(|op| op.timestamp < cutoff) {
            state.operations.pop_front();
            removed += 1;
        }
        if removed > 0 {
            debug!(removed = removed, "Old monitoring data removed");
        }
        Ok(removed)
    }

    /// Clears metrics, alerts, recommendations, timers and subscriptions.
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        *state = MonitorState::default();
        info!("Monitoring system shut down");
        Ok(())
    }
}

fn cutoff_hours(now: DateTime<Utc>, hours: u64) -> DateTime<Utc> {
    i64::try_from(hours)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Recommendations implied by the current CPU, memory and error-rate values
/// that are not already pending.
fn recommendations_from_metrics(state: &MonitorState) -> Vec<NewRecommendation> {
    let current = |name: &str| state.metrics.get(name).map(|m| m.current_value);
    let mut found = Vec::new();

    if let Some(cpu) = current("cpu_usage_percent").filter(|v| *v > 80.0)
        && !state.has_pending_recommendation("performance", "cpu")
    {
        found.push(NewRecommendation {
            category: "performance".to_string(),
            priority: RecommendationPriority::High,
            title: "High CPU Usage Detected".to_string(),
            description: "CPU usage is above 80%. Optimize worker workloads or scale out."
                .to_string(),
            impact: "Reduced response times and improved stability".to_string(),
            effort: "medium".to_string(),
            affected_components: vec!["server".to_string(), "workers".to_string()],
            evidence: evidence("cpu_usage_percent", cpu),
        });
    }

    if let Some(memory) = current("memory_usage_percent").filter(|v| *v > 85.0)
        && !state.has_pending_recommendation("resource", "memory")
    {
        found.push(NewRecommendation {
            category: "resource".to_string(),
            priority: RecommendationPriority::High,
            title: "High Memory Usage Detected".to_string(),
            description: "Memory usage is above 85%. Trim retained history or add memory."
                .to_string(),
            impact: "Prevents out-of-memory failures".to_string(),
            effort: "low".to_string(),
            affected_components: vec!["server".to_string()],
            evidence: evidence("memory_usage_percent", memory),
        });
    }

    if let Some(error_rate) = current("error_rate").filter(|v| *v > 5.0)
        && !state.has_pending_recommendation("performance", "error")
    {
        found.push(NewRecommendation {
            category: "performance".to_string(),
            priority: RecommendationPriority::Critical,
            title: "High Error Rate Detected".to_string(),
            description: format!("Error rate is {error_rate:.1}%. Investigate failing tasks."),
            impact: "Improved reliability".to_string(),
            effort: "high".to_string(),
            affected_components: vec![
                "server".to_string(),
                "workers".to_string(),
                "communication".to_string(),
            ],
            evidence: evidence("error_rate", error_rate),
        });
    }

    found
}

fn evidence(metric: &str, value: f64) -> Map<String, serde_json::Value> {
    let mut map = Map::new();
    map.insert(metric.to_string(), json!(value));
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::callback;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn gauge(monitoring: &MonitoringSystem, name: &str, value: f64) {
        monitoring.record_metric(name, value, BTreeMap::new(), MetricType::Gauge).unwrap();
    }

    #[test]
    fn test_default_metrics_exist() {
        let monitoring = MonitoringSystem::new(MonitoringConfig::default());
        let cpu = monitoring.metric("cpu_usage_percent").unwrap().unwrap();
        assert_eq!(cpu.unit, "%");
        assert_eq!(monitoring.system_overview().unwrap().total_metrics, DEFAULT_METRICS.len());
    }

    #[test]
    fn test_counter_adds_and_gauge_sets() {
        let monitoring = MonitoringSystem::new(MonitoringConfig::default());
        monitoring.record_metric("requests", 1.0, BTreeMap::new(), MetricType::Counter).unwrap();
        let total =
            monitoring.record_metric("requests", 2.0, BTreeMap::new(), MetricType::Counter).unwrap();
        assert!((total - 3.0).abs() < 1e-9);

        gauge(&monitoring, "active_workers", 4.0);
        gauge(&monitoring, "active_workers", 2.0);
        let metric = monitoring.metric("active_workers").unwrap().unwrap();
        assert!((metric.current_value - 2.0).abs() < 1e-9);
        assert_eq!(metric.history.len(), 2);
    }

    #[test]
    fn test_threshold_alerts_are_deduplicated() {
        let monitoring = MonitoringSystem::new(MonitoringConfig::default());
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        monitoring
            .subscribe_to_alerts(callback(move |_alert: &Alert| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();

        gauge(&monitoring, "cpu_usage_percent", 85.0);
        gauge(&monitoring, "cpu_usage_percent", 70.0);
        gauge(&monitoring, "cpu_usage_percent", 88.0);
        let alerts = monitoring.active_alerts().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Warning);
        assert_eq!(alerts[0].title, "cpu_usage_percent threshold exceeded");
        assert_eq!(alerts[0].threshold_value, Some(80.0));

        gauge(&monitoring, "cpu_usage_percent", 97.0);
        assert_eq!(monitoring.active_alerts().unwrap().len(), 2);
        assert_eq!(notified.load(Ordering::SeqCst), 2);

        assert!(monitoring.resolve_alert(&alerts[0].alert_id).unwrap());
        gauge(&monitoring, "cpu_usage_percent", 90.0);
        assert_eq!(monitoring.active_alerts().unwrap().len(), 2);
        assert_eq!(monitoring.system_overview().unwrap().status, HealthStatus::Degraded);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let monitoring = MonitoringSystem::new(MonitoringConfig::default());
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        let id = monitoring
            .subscribe_to_alerts(callback(move |_alert: &Alert| {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("subscriber failure is not propagated")
            }))
            .unwrap();

        monitoring.create_alert(AlertDraft::new(AlertLevel::Info, "a", "b", "test")).unwrap();
        assert!(monitoring.unsubscribe_from_alerts(&id).unwrap());
        assert!(!monitoring.unsubscribe_from_alerts(&id).unwrap());
        monitoring.create_alert(AlertDraft::new(AlertLevel::Info, "c", "d", "test")).unwrap();
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_operation_timer_records_duration() {
        let monitoring = MonitoringSystem::new(MonitoringConfig::default());
        let id = monitoring.start_operation_timer("route", None).unwrap();
        assert!(id.starts_with("route_"));
        std::thread::sleep(Duration::from_millis(5));

        let duration = monitoring.stop_operation_timer(&id, BTreeMap::new()).unwrap().unwrap();
        assert!(duration >= 0.005);
        assert!(monitoring.stop_operation_timer(&id, BTreeMap::new()).unwrap().is_none());

        let metric = monitoring.metric("operation_duration_route").unwrap().unwrap();
        assert_eq!(metric.metric_type, MetricType::Timer);
        let report = monitoring.performance_report(1).unwrap();
        assert_eq!(report.operations["route"].count, 1);
        assert_eq!(monitoring.system_overview().unwrap().total_operations, 1);
    }

    #[test]
    fn test_worker_metric_is_mirrored() {
        let monitoring = MonitoringSystem::new(MonitoringConfig::default());
        monitoring.record_worker_metric("w1", "tasks_done", 7.0).unwrap();

        assert!((monitoring.worker_metrics("w1").unwrap()["tasks_done"].value - 7.0).abs() < 1e-9);
        let mirrored = monitoring.metric("worker_tasks_done").unwrap().unwrap();
        assert_eq!(mirrored.history[0].labels["worker_id"], "w1");
        assert_eq!(monitoring.system_overview().unwrap().tracked_workers, 1);
    }

    #[test]
    fn test_analysis_generates_recommendations_once() {
        let monitoring = MonitoringSystem::new(MonitoringConfig::default());
        gauge(&monitoring, "cpu_usage_percent", 90.0);
        gauge(&monitoring, "error_rate", 12.0);

        let report = monitoring.analyze().unwrap();
        assert_eq!(report.recommendations_added, 2);
        assert_eq!(monitoring.analyze().unwrap().recommendations_added, 0);

        let recommendations = monitoring.recommendations(None, None).unwrap();
        assert_eq!(recommendations[0].priority, RecommendationPriority::Critical);
        assert_eq!(monitoring.recommendations(Some("resource"), None).unwrap().len(), 0);

        let id = recommendations[0].recommendation_id.clone();
        assert!(monitoring.mark_recommendation_implemented(&id).unwrap());
        assert_eq!(monitoring.system_overview().unwrap().pending_recommendations, 1);
    }

    #[test]
    fn test_anomaly_detection_on_spike() {
        let monitoring = MonitoringSystem::new(MonitoringConfig::default());
        for _ in 0..9 {
            gauge(&monitoring, "queue_depth", 1.0);
        }
        gauge(&monitoring, "queue_depth", 50.0);

        let report = monitoring.analyze().unwrap();
        assert_eq!(report.anomalies, 1);
        assert_eq!(monitoring.analyze().unwrap().anomalies, 0);
    }

    #[test]
    fn test_collaboration_metrics_derive_error_rate() {
        let monitoring = MonitoringSystem::new(MonitoringConfig::default());
        assert!(monitoring.collection_due().unwrap());
        let snapshot = CollaborationSnapshot {
            active_workers: 3,
            active_spaces: 1,
            total_messages: 10,
            average_delivery_time_ms: 4.0,
            average_success_rate: 0.8,
        };
        monitoring.collect_collaboration_metrics(&snapshot).unwrap();
        assert!(!monitoring.collection_due().unwrap());

        let error_rate = monitoring.metric("error_rate").unwrap().unwrap().current_value;
        assert!((error_rate - 20.0).abs() < 1e-9);
        let overview = monitoring.system_overview().unwrap();
        assert_eq!(overview.collaboration.active_workers, 3);
        assert!((overview.collaboration.task_success_rate - 80.0).abs() < 1e-9);
        // error_rate 20 crosses both the warning and the critical bound.
        assert_eq!(overview.active_alerts, 2);
    }

    #[test]
    fn test_export_formats() {
        let monitoring = MonitoringSystem::new(MonitoringConfig::default());
        gauge(&monitoring, "active_workers", 2.0);

        let csv = monitoring.export_metrics("csv", 1).unwrap();
        assert_eq!(csv.lines().next(), Some("timestamp,metric_name,value,labels"));
        assert_eq!(csv.lines().count(), 2);

        let json: serde_json::Value =
            serde_json::from_str(&monitoring.export_metrics("json", 1).unwrap()).unwrap();
        assert_eq!(json["time_range_hours"], 1);

        let err = monitoring.export_metrics("xml", 1).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_cleanup_and_shutdown() {
        let monitoring = MonitoringSystem::new(MonitoringConfig::default());
        gauge(&monitoring, "active_workers", 2.0);
        assert_eq!(monitoring.cleanup_old_data().unwrap(), 0);

        monitoring.shutdown().unwrap();
        assert!(monitoring.metric("active_workers").unwrap().is_none());
        assert_eq!(monitoring.system_overview().unwrap().total_metrics, 0);
    }
}
