//! Configuration for the coordination engine.
//!
//! Every section deserializes from TOML with per-field defaults, so an empty
//! document yields a fully usable configuration.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoordinationError, Result};

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host the server identifies itself with.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port the server identifies itself with.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum number of registered workers.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Capacity of each recipient's pending message queue.
    #[serde(default = "default_message_queue_size")]
    pub message_queue_size: usize,
    /// Heartbeat interval in seconds.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Maintenance tick interval in milliseconds.
    #[serde(default = "default_maintenance_interval_ms")]
    pub maintenance_interval_ms: u64,
    /// Bound on waiting for the maintenance loop to become ready, in milliseconds.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    /// Bound on waiting for the maintenance loop to exit, in milliseconds.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Remove idle workers during maintenance.
    #[serde(default = "default_true")]
    pub auto_cleanup: bool,
    /// Idle time after which a worker is considered inactive, in seconds.
    #[serde(default = "default_worker_idle_timeout_secs")]
    pub worker_idle_timeout_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_max_workers() -> usize {
    100
}

fn default_message_queue_size() -> usize {
    1000
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_maintenance_interval_ms() -> u64 {
    1000
}

fn default_startup_timeout_ms() -> u64 {
    10_000
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_worker_idle_timeout_secs() -> u64 {
    30 * 60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_workers: default_max_workers(),
            message_queue_size: default_message_queue_size(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            maintenance_interval_ms: default_maintenance_interval_ms(),
            startup_timeout_ms: default_startup_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            auto_cleanup: true,
            worker_idle_timeout_secs: default_worker_idle_timeout_secs(),
        }
    }
}

impl ServerConfig {
    /// Maintenance tick interval.
    #[must_use]
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    /// Startup readiness bound.
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Shutdown join bound.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Idle threshold for inactive-worker cleanup.
    #[must_use]
    pub fn worker_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_idle_timeout_secs)
    }
}

/// Error recovery configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Maximum reconnection and message retry attempts.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Base delay for exponential backoff, in milliseconds.
    #[serde(default = "default_retry_delay_base_ms")]
    pub retry_delay_base_ms: u64,
    /// Heartbeat interval in seconds; silence for twice this marks a component unhealthy.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Connection timeout in seconds.
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    /// Task timeout in seconds.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    /// Lifetime of a resource lock granted by conflict arbitration, in seconds.
    #[serde(default = "default_resource_lock_secs")]
    pub resource_lock_secs: u64,
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_base_ms() -> u64 {
    1000
}

fn default_connection_timeout_secs() -> u64 {
    10
}

fn default_task_timeout_secs() -> u64 {
    300
}

fn default_resource_lock_secs() -> u64 {
    600
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: default_max_retry_attempts(),
            retry_delay_base_ms: default_retry_delay_base_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            connection_timeout_secs: default_connection_timeout_secs(),
            task_timeout_secs: default_task_timeout_secs(),
            resource_lock_secs: default_resource_lock_secs(),
        }
    }
}

impl RecoveryConfig {
    /// Backoff delay before the given (1-based) attempt.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_delay_base_ms.saturating_mul(1 << exponent))
    }
}

/// Warning/critical bounds for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertThreshold {
    /// Value above which a warning alert fires.
    pub warning: f64,
    /// Value above which a critical alert fires.
    pub critical: f64,
}

/// Monitoring configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Collection interval in seconds.
    #[serde(default = "default_collection_interval_secs")]
    pub collection_interval_secs: u64,
    /// How long metric history is retained, in hours.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    /// Alert thresholds keyed by metric name.
    #[serde(default = "default_alert_thresholds")]
    pub alert_thresholds: HashMap<String, AlertThreshold>,
}

fn default_collection_interval_secs() -> u64 {
    10
}

fn default_retention_hours() -> u64 {
    24
}

fn default_alert_thresholds() -> HashMap<String, AlertThreshold> {
    HashMap::from([
        ("cpu_usage_percent".to_string(), AlertThreshold { warning: 80.0, critical: 95.0 }),
        ("memory_usage_percent".to_string(), AlertThreshold { warning: 85.0, critical: 95.0 }),
        ("error_rate".to_string(), AlertThreshold { warning: 5.0, critical: 10.0 }),
    ])
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            collection_interval_secs: default_collection_interval_secs(),
            retention_hours: default_retention_hours(),
            alert_thresholds: default_alert_thresholds(),
        }
    }
}

/// Whiteboard configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhiteboardConfig {
    /// Seconds after which a content lock may be taken over.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
    /// Maximum retained change records.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

fn default_lock_timeout_secs() -> u64 {
    300
}

fn default_max_history() -> usize {
    1000
}

impl Default for WhiteboardConfig {
    fn default() -> Self {
        Self { lock_timeout_secs: default_lock_timeout_secs(), max_history: default_max_history() }
    }
}

/// Shared file system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSystemConfig {
    /// Default lock lifetime in seconds.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

impl Default for FileSystemConfig {
    fn default() -> Self {
        Self { lock_timeout_secs: default_lock_timeout_secs() }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), json: false }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HuddleConfig {
    /// Server section.
    #[serde(default)]
    pub server: ServerConfig,
    /// Error recovery section.
    #[serde(default)]
    pub recovery: RecoveryConfig,
    /// Monitoring section.
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// Whiteboard section.
    #[serde(default)]
    pub whiteboard: WhiteboardConfig,
    /// File system section.
    #[serde(default)]
    pub filesystem: FileSystemConfig,
    /// Logging section.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HuddleConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| CoordinationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.server.message_queue_size == 0 {
            return Err(CoordinationError::Config(
                "server.message_queue_size must be greater than 0".to_string(),
            ));
        }
        if self.server.maintenance_interval_ms == 0 {
            return Err(CoordinationError::Config(
                "server.maintenance_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.server.max_workers == 0 {
            return Err(CoordinationError::Config(
                "server.max_workers must be greater than 0".to_string(),
            ));
        }
        for (metric, threshold) in &self.monitoring.alert_thresholds {
            if threshold.warning > threshold.critical {
                return Err(CoordinationError::Config(format!(
                    "monitoring threshold for {} has warning above critical",
                    metric
                )));
            }
        }
        Ok(())
    }
}
