//! Metric series, operation records and alert/recommendation records.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum points kept per metric.
pub const MAX_METRIC_HISTORY: usize = 1000;

/// How a recorded value updates a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Recorded values are added to the current value.
    Counter,
    #[default]
    Gauge,
    Histogram,
    Timer,
}

impl MetricType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
            Self::Timer => "timer",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observation of a metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub labels: BTreeMap<String, String>,
}

/// A named metric with bounded history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetric {
    pub name: String,
    pub metric_type: MetricType,
    pub description: String,
    pub unit: String,
    pub current_value: f64,
    pub history: VecDeque<MetricPoint>,
    pub created_at: DateTime<Utc>,
}

impl PerformanceMetric {
    pub(crate) fn new(name: &str, metric_type: MetricType, description: &str, unit: &str) -> Self {
        Self {
            name: name.to_string(),
            metric_type,
            description: description.to_string(),
            unit: unit.to_string(),
            current_value: 0.0,
            history: VecDeque::new(),
            created_at: Utc::now(),
        }
    }

    /// Metric created on first use of an unknown name.
    pub(crate) fn auto(name: &str, metric_type: MetricType) -> Self {
        Self::new(name, metric_type, &format!("Auto-generated metric: {name}"), "units")
    }

    /// Applies a value and appends the resulting current value to history.
    pub(crate) fn record(
        &mut self,
        value: f64,
        metric_type: MetricType,
        labels: BTreeMap<String, String>,
    ) -> f64 {
        if metric_type == MetricType::Counter {
            self.current_value += value;
        } else {
            self.current_value = value;
        }
        self.history.push_back(MetricPoint {
            timestamp: Utc::now(),
            value: self.current_value,
            labels,
        });
        while self.history.len() > MAX_METRIC_HISTORY {
            self.history.pop_front();
        }
        self.current_value
    }

    pub(crate) fn points_since(&self, cutoff: DateTime<Utc>) -> impl Iterator<Item = &MetricPoint> {
        self.history.iter().filter(move |p| p.timestamp > cutoff)
    }
}

/// Metrics every monitoring system starts with: name, type, description, unit.
pub(crate) const DEFAULT_METRICS: [(&str, MetricType, &str, &str); 8] = [
    ("cpu_usage_percent", MetricType::Gauge, "CPU usage percentage", "%"),
    ("memory_usage_percent", MetricType::Gauge, "Memory usage percentage", "%"),
    ("disk_usage_percent", MetricType::Gauge, "Disk usage percentage", "%"),
    ("active_workers", MetricType::Gauge, "Number of active workers", "count"),
    ("messages_per_second", MetricType::Gauge, "Messages processed per second", "msg/s"),
    ("average_response_time", MetricType::Gauge, "Average response time", "ms"),
    ("error_rate", MetricType::Gauge, "Error rate percentage", "%"),
    ("task_completion_rate", MetricType::Gauge, "Task completion rate", "tasks/min"),
];

/// A completed timed operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationRecord {
    pub operation_id: String,
    pub operation_name: String,
    pub duration_secs: f64,
    pub timestamp: DateTime<Utc>,
    pub labels: BTreeMap<String, String>,
}

/// Latest value of a per-worker metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WorkerMetricValue {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Direction of a series over a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

impl Trend {
    pub(crate) fn between(first: f64, last: f64) -> Self {
        if last > first {
            Self::Increasing
        } else if last < first {
            Self::Decreasing
        } else {
            Self::Stable
        }
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raised alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub alert_id: String,
    pub level: AlertLevel,
    pub title: String,
    pub description: String,
    pub component: String,
    pub metric_name: Option<String>,
    pub threshold_value: Option<f64>,
    pub current_value: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub is_resolved: bool,
}

/// Parameters of a new alert.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertDraft {
    pub level: AlertLevel,
    pub title: String,
    pub description: String,
    pub component: String,
    pub metric_name: Option<String>,
    pub threshold_value: Option<f64>,
    pub current_value: Option<f64>,
}

impl AlertDraft {
    pub fn new(
        level: AlertLevel,
        title: impl Into<String>,
        description: impl Into<String>,
        component: impl Into<String>,
    ) -> Self {
        Self {
            level,
            title: title.into(),
            description: description.into(),
            component: component.into(),
            metric_name: None,
            threshold_value: None,
            current_value: None,
        }
    }

    /// Ties the alert to a metric value and optional threshold.
    #[must_use]
    pub fn for_metric(mut self, name: &str, threshold: Option<f64>, current: f64) -> Self {
        self.metric_name = Some(name.to_string());
        self.threshold_value = threshold;
        self.current_value = Some(current);
        self
    }

    pub(crate) fn into_alert(self) -> Alert {
        Alert {
            alert_id: uuid::Uuid::new_v4().to_string(),
            level: self.level,
            title: self.title,
            description: self.description,
            component: self.component,
            metric_name: self.metric_name,
            threshold_value: self.threshold_value,
            current_value: self.current_value,
            created_at: Utc::now(),
            resolved_at: None,
            is_resolved: false,
        }
    }
}

/// Urgency of a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// Parameters of a new optimization recommendation.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecommendation {
    /// `performance`, `resource` or `configuration`.
    pub category: String,
    pub priority: RecommendationPriority,
    pub title: String,
    pub description: String,
    pub impact: String,
    /// `low`, `medium` or `high`.
    pub effort: String,
    pub affected_components: Vec<String>,
    pub evidence: Map<String, Value>,
}

/// A suggested change backed by metric evidence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationRecommendation {
    pub recommendation_id: String,
    pub category: String,
    pub priority: RecommendationPriority,
    pub title: String,
    pub description: String,
    pub impact: String,
    pub effort: String,
    pub affected_components: Vec<String>,
    pub evidence: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub implemented: bool,
}

impl OptimizationRecommendation {
    pub(crate) fn from_new(new: NewRecommendation) -> Self {
        Self {
            recommendation_id: uuid::Uuid::new_v4().to_string(),
            category: new.category,
            priority: new.priority,
            title: new.title,
            description: new.description,
            impact: new.impact,
            effort: new.effort,
            affected_components: new.affected_components,
            evidence: new.evidence,
            created_at: Utc::now(),
            implemented: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_accumulates_gauge_replaces() {
        let mut metric = PerformanceMetric::auto("requests", MetricType::Counter);
        metric.record(2.0, MetricType::Counter, BTreeMap::new());
        assert!((metric.record(3.0, MetricType::Counter, BTreeMap::new()) - 5.0).abs() < 1e-9);

        let mut gauge = PerformanceMetric::auto("load", MetricType::Gauge);
        gauge.record(2.0, MetricType::Gauge, BTreeMap::new());
        assert!((gauge.record(3.0, MetricType::Gauge, BTreeMap::new()) - 3.0).abs() < 1e-9);
        assert_eq!(gauge.description, "Auto-generated metric: load");
    }

    #[test]
    fn test_history_is_bounded() {
        let mut metric = PerformanceMetric::auto("x", MetricType::Gauge);
        for i in 0..(MAX_METRIC_HISTORY + 25) {
            metric.record(i as f64, MetricType::Gauge, BTreeMap::new());
        }
        assert_eq!(metric.history.len(), MAX_METRIC_HISTORY);
        assert!((metric.history[0].value - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_trend_and_priority_order() {
        assert_eq!(Trend::between(1.0, 2.0), Trend::Increasing);
        assert_eq!(Trend::between(2.0, 2.0), Trend::Stable);
        assert!(RecommendationPriority::Critical > RecommendationPriority::High);
        assert!(AlertLevel::Critical > AlertLevel::Warning);
    }
}
