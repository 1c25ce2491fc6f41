//! Failure records and connection health.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Kind of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    ConnectionFailure,
    WorkerCrash,
    TaskTimeout,
    ResourceConflict,
    CommunicationFailure,
    ValidationFailure,
    SystemOverload,
}

impl FailureType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionFailure => "connection_failure",
            Self::WorkerCrash => "worker_crash",
            Self::TaskTimeout => "task_timeout",
            Self::ResourceConflict => "resource_conflict",
            Self::CommunicationFailure => "communication_failure",
            Self::ValidationFailure => "validation_failure",
            Self::SystemOverload => "system_overload",
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStrategy {
    Retry,
    Reassign,
    Escalate,
    Abort,
    Ignore,
}

impl RecoveryStrategy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Reassign => "reassign",
            Self::Escalate => "escalate",
            Self::Abort => "abort",
            Self::Ignore => "ignore",
        }
    }

    /// Picks a strategy from the failure type and how many failures the same
    /// component had in the recent window, this one included.
    #[must_use]
    pub fn for_failure(failure_type: FailureType, recent_failures: usize) -> Self {
        match failure_type {
            FailureType::ConnectionFailure => match recent_failures {
                0..3 => Self::Retry,
                3..5 => Self::Escalate,
                _ => Self::Abort,
            },
            FailureType::WorkerCrash => {
                if recent_failures < 2 {
                    Self::Reassign
                } else {
                    Self::Escalate
                }
            }
            FailureType::CommunicationFailure => {
                if recent_failures < 5 {
                    Self::Retry
                } else {
                    Self::Escalate
                }
            }
            FailureType::ResourceConflict
            | FailureType::TaskTimeout
            | FailureType::ValidationFailure
            | FailureType::SystemOverload => Self::Retry,
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-facing severity of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// A recorded failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub failure_id: String,
    pub failure_type: FailureType,
    /// Worker id, resource id, or `from->to` for communication failures.
    pub component: String,
    pub description: String,
    pub context: Map<String, Value>,
    pub occurred_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub is_resolved: bool,
    pub recovery_strategy: Option<RecoveryStrategy>,
    pub recovery_attempts: u32,
    pub impact_level: ImpactLevel,
}

impl FailureRecord {
    pub(crate) fn new(
        failure_type: FailureType,
        component: &str,
        description: String,
        context: Map<String, Value>,
    ) -> Self {
        Self {
            failure_id: uuid::Uuid::new_v4().to_string(),
            failure_type,
            component: component.to_string(),
            description,
            context,
            occurred_at: Utc::now(),
            resolved_at: None,
            is_resolved: false,
            recovery_strategy: None,
            recovery_attempts: 0,
            impact_level: ImpactLevel::default(),
        }
    }

    pub(crate) fn resolve(&mut self) {
        self.is_resolved = true;
        self.resolved_at = Some(Utc::now());
    }

    /// Seconds between occurrence and resolution.
    #[must_use]
    pub fn recovery_secs(&self) -> Option<f64> {
        self.resolved_at
            .map(|resolved| (resolved - self.occurred_at).num_milliseconds() as f64 / 1000.0)
    }
}

const QUALITY_PENALTY: f64 = 0.2;
const QUALITY_REWARD: f64 = 0.1;

/// Health of one component as seen by recovery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionHealth {
    pub component_id: String,
    pub is_healthy: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub last_transition: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub total_failures: u32,
    /// `0.0..=1.0`.
    pub connection_quality: f64,
    pub response_time_ms: f64,
}

impl ConnectionHealth {
    pub(crate) fn new(component_id: &str) -> Self {
        let now = Utc::now();
        Self {
            component_id: component_id.to_string(),
            is_healthy: true,
            last_heartbeat: now,
            last_transition: now,
            consecutive_failures: 0,
            total_failures: 0,
            connection_quality: 1.0,
            response_time_ms: 0.0,
        }
    }

    pub(crate) fn record_failure(&mut self) {
        if self.is_healthy {
            self.last_transition = Utc::now();
        }
        self.is_healthy = false;
        self.consecutive_failures += 1;
        self.total_failures += 1;
        self.connection_quality = (self.connection_quality - QUALITY_PENALTY).max(0.0);
    }

    pub(crate) fn record_success(&mut self) {
        if !self.is_healthy {
            self.last_transition = Utc::now();
        }
        self.is_healthy = true;
        self.consecutive_failures = 0;
        self.connection_quality = (self.connection_quality + QUALITY_REWARD).min(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_strategy_thresholds() {
        let strategy = |n| RecoveryStrategy::for_failure(FailureType::ConnectionFailure, n);
        assert_eq!(strategy(1), RecoveryStrategy::Retry);
        assert_eq!(strategy(2), RecoveryStrategy::Retry);
        assert_eq!(strategy(3), RecoveryStrategy::Escalate);
        assert_eq!(strategy(4), RecoveryStrategy::Escalate);
        assert_eq!(strategy(5), RecoveryStrategy::Abort);
    }

    #[test]
    fn test_other_strategy_thresholds() {
        assert_eq!(
            RecoveryStrategy::for_failure(FailureType::WorkerCrash, 1),
            RecoveryStrategy::Reassign
        );
        assert_eq!(
            RecoveryStrategy::for_failure(FailureType::WorkerCrash, 2),
            RecoveryStrategy::Escalate
        );
        assert_eq!(
            RecoveryStrategy::for_failure(FailureType::CommunicationFailure, 5),
            RecoveryStrategy::Escalate
        );
        assert_eq!(
            RecoveryStrategy::for_failure(FailureType::ResourceConflict, 50),
            RecoveryStrategy::Retry
        );
    }

    #[test]
    fn test_connection_quality_is_clamped() {
        let mut health = ConnectionHealth::new("w1");
        for _ in 0..10 {
            health.record_failure();
        }
        assert!(health.connection_quality.abs() < f64::EPSILON);
        assert_eq!(health.consecutive_failures, 10);

        health.record_success();
        assert!(health.is_healthy);
        assert_eq!(health.consecutive_failures, 0);
        assert!((health.connection_quality - 0.1).abs() < 1e-9);
        assert_eq!(health.total_failures, 10);
    }
}
