//! Collaborative server.
//!
//! Owns every coordination component and the maintenance thread. Components
//! exist only while the server runs; operations that need them fail with
//! `InvalidState` otherwise.

mod lifecycle;
mod maintenance;

pub use lifecycle::ServerState;
pub use maintenance::TickReport;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::HuddleConfig;
use crate::error::{CoordinationError, Result, poisoned};
use crate::monitoring::{MonitoringSystem, SystemOverview};
use crate::recovery::{ErrorRecoverySystem, SystemHealth};
use crate::registry::{TaskExecutor, WorkerInfo, WorkerRegistry};
use crate::router::{Envelope, MessageRouter};
use crate::space::{CollaborativeSpace, SpaceManager};
use maintenance::{MaintenanceHandle, MaintenanceLoop};

/// The components a running server owns.
#[derive(Debug, Clone)]
pub(crate) struct Components {
    pub(crate) registry: Arc<WorkerRegistry>,
    pub(crate) router: Arc<MessageRouter>,
    pub(crate) spaces: Arc<SpaceManager>,
    pub(crate) recovery: Arc<ErrorRecoverySystem>,
    pub(crate) monitoring: Arc<MonitoringSystem>,
}

impl Components {
    /// Builds the components in dependency order.
    pub(crate) fn build(config: &HuddleConfig) -> Self {
        let registry = Arc::new(WorkerRegistry::with_capacity(config.server.max_workers));
        let router =
            Arc::new(MessageRouter::new(Arc::clone(&registry), config.server.message_queue_size));
        let spaces = Arc::new(SpaceManager::new(
            config.whiteboard.clone(),
            config.filesystem.clone(),
        ));
        let recovery = Arc::new(ErrorRecoverySystem::new(
            config.recovery.clone(),
            Arc::clone(&registry),
            Arc::clone(&router),
        ));
        let monitoring = Arc::new(MonitoringSystem::new(config.monitoring.clone()));
        Self { registry, router, spaces, recovery, monitoring }
    }

    /// Tears the components down in reverse order.
    ///
    /// Every step runs; the first failure is returned.
    fn teardown(&self) -> Result<()> {
        let steps: [(&str, Result<()>); 5] = [
            ("monitoring", self.monitoring.shutdown()),
            ("recovery", self.recovery.shutdown()),
            ("router", self.router.shutdown()),
            ("registry", self.registry.shutdown()),
            ("spaces", self.spaces.close_all().map(|closed| debug!(closed, "Spaces closed"))),
        ];
        let mut first_error = None;
        for (component, outcome) in steps {
            if let Err(e) = outcome {
                error!(component = %component, error = %e, "Component teardown failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

struct Running {
    components: Components,
    maintenance: MaintenanceHandle,
    started_at: DateTime<Utc>,
    started: Instant,
}

#[derive(Default)]
struct Lifecycle {
    state: ServerState,
    running: Option<Running>,
}

impl Lifecycle {
    fn transition(&mut self, to: ServerState) {
        if self.state.can_transition_to(to) {
            debug!(from = %self.state, to = %to, "Server state transition");
        } else {
            warn!(from = %self.state, to = %to, "Unexpected server state transition");
        }
        self.state = to;
    }
}

#[derive(Debug, Default)]
struct ServerCounters {
    workers_registered: AtomicU64,
    messages_routed: AtomicU64,
    spaces_created: AtomicU64,
}

/// Server identity reported in [`ServerStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerConfigSummary {
    pub host: String,
    pub port: u16,
    pub max_workers: usize,
}

/// Lifetime counters of a server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerStatistics {
    pub workers_registered: u64,
    pub messages_routed: u64,
    pub spaces_created: u64,
    pub uptime_seconds: f64,
}

/// Snapshot returned by [`CollaborativeServer::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerStatus {
    pub server_id: String,
    pub state: ServerState,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_seconds: f64,
    pub config: ServerConfigSummary,
    pub statistics: ServerStatistics,
    pub active_workers: usize,
    pub collaborative_spaces: usize,
    /// Present while running.
    pub recovery: Option<SystemHealth>,
    /// Present while running.
    pub monitoring: Option<SystemOverview>,
}

/// Central coordination server.
///
/// # Example
/// ```no_run
/// use huddle_core::config::HuddleConfig;
/// use huddle_core::registry::WorkerInfo;
/// use huddle_core::server::CollaborativeServer;
///
/// let server = CollaborativeServer::new(HuddleConfig::default());
/// server.start()?;
/// server.register_worker("planner-1", WorkerInfo::new("Planner", "Lead"), None)?;
/// server.stop()?;
/// # Ok::<(), huddle_core::error::CoordinationError>(())
/// ```
pub struct CollaborativeServer {
    server_id: String,
    config: HuddleConfig,
    lifecycle: Mutex<Lifecycle>,
    counters: ServerCounters,
}

impl fmt::Debug for CollaborativeServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollaborativeServer")
            .field("server_id", &self.server_id)
            .field("state", &self.lifecycle.lock().map(|l| l.state).unwrap_or(ServerState::Error))
            .finish_non_exhaustive()
    }
}

impl CollaborativeServer {
    /// Creates a stopped server.
    pub fn new(config: HuddleConfig) -> Self {
        Self {
            server_id: uuid::Uuid::new_v4().to_string(),
            config,
            lifecycle: Mutex::new(Lifecycle::default()),
            counters: ServerCounters::default(),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn config(&self) -> &HuddleConfig {
        &self.config
    }

    pub fn state(&self) -> Result<ServerState> {
        Ok(self.lifecycle.lock().map_err(poisoned)?.state)
    }

    pub fn is_running(&self) -> bool {
        self.state().is_ok_and(|state| state == ServerState::Running)
    }

    /// Builds the components and starts the maintenance loop.
    ///
    /// Blocks until the loop is ready or the startup timeout elapses.
    ///
    /// # Errors
    /// `InvalidState` unless the server is stopped or in error; `Timeout` if
    /// the loop is not ready in time (the server is left in `Error`).
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().map_err(poisoned)?;
        if !matches!(lifecycle.state, ServerState::Stopped | ServerState::Error) {
            return Err(CoordinationError::invalid_state("start", lifecycle.state));
        }
        lifecycle.transition(ServerState::Starting);
        info!(server_id = %self.server_id, "Starting collaborative server");

        let components = Components::build(&self.config);
        let token = CancellationToken::new();
        let spawned = MaintenanceLoop::new(components.clone(), self.config.server.clone())
            .spawn(token.clone())
            .map_err(CoordinationError::from)
            .and_then(|handle| {
                handle.wait_ready(self.config.server.startup_timeout()).map(|()| handle)
            });

        match spawned {
            Ok(maintenance) => {
                lifecycle.running = Some(Running {
                    components,
                    maintenance,
                    started_at: Utc::now(),
                    started: Instant::now(),
                });
                lifecycle.transition(ServerState::Running);
                info!(
                    server_id = %self.server_id,
                    host = %self.config.server.host,
                    port = self.config.server.port,
                    "Collaborative server started"
                );
                Ok(())
            }
            Err(e) => {
                token.cancel();
                if let Err(teardown) = components.teardown() {
                    warn!(error = %teardown, "Teardown after failed start also failed");
                }
                lifecycle.transition(ServerState::Error);
                error!(server_id = %self.server_id, error = %e, "Server failed to start");
                Err(e)
            }
        }
    }

    /// Stops the maintenance loop and tears the components down.
    ///
    /// Logs a warning and returns `Ok(())` if the server is not running.
    pub fn stop(&self) -> Result<()> {
        let running = {
            let mut lifecycle = self.lifecycle.lock().map_err(poisoned)?;
            if lifecycle.state != ServerState::Running {
                warn!(state = %lifecycle.state, "Stop requested but server is not running");
                return Ok(());
            }
            lifecycle.transition(ServerState::Stopping);
            lifecycle.running.take()
        };
        info!(server_id = %self.server_id, "Stopping collaborative server");

        let outcome = match running {
            Some(running) => {
                running.maintenance.shutdown(self.config.server.shutdown_timeout());
                running.components.teardown()
            }
            None => Ok(()),
        };

        let mut lifecycle = self.lifecycle.lock().map_err(poisoned)?;
        match outcome {
            Ok(()) => {
                lifecycle.transition(ServerState::Stopped);
                info!(server_id = %self.server_id, "Collaborative server stopped");
                Ok(())
            }
            Err(e) => {
                lifecycle.transition(ServerState::Error);
                Err(e)
            }
        }
    }

    /// Clones the running components, or fails with the operation name.
    fn components(&self, operation: &str) -> Result<Components> {
        let lifecycle = self.lifecycle.lock().map_err(poisoned)?;
        match (&lifecycle.running, lifecycle.state) {
            (Some(running), ServerState::Running) => Ok(running.components.clone()),
            (_, state) => Err(CoordinationError::invalid_state(operation, state)),
        }
    }

    /// Registers a worker.
    ///
    /// # Returns
    /// The registration id.
    pub fn register_worker(
        &self,
        worker_id: &str,
        info: WorkerInfo,
        executor: Option<&Arc<dyn TaskExecutor>>,
    ) -> Result<String> {
        let components = self.components("register_worker")?;
        let registration = components.registry.register(worker_id, info, executor)?;
        self.counters.workers_registered.fetch_add(1, Ordering::Relaxed);
        Ok(registration)
    }

    /// Unregisters a worker and drops its message subscription.
    ///
    /// # Returns
    /// `false` if the worker was not registered.
    pub fn unregister_worker(&self, worker_id: &str) -> Result<bool> {
        let components = self.components("unregister_worker")?;
        let removed = components.registry.unregister(worker_id)?;
        components.router.unsubscribe(worker_id)?;
        Ok(removed)
    }

    /// Routes a message between workers.
    ///
    /// # Returns
    /// `false` if the recipient's queue is full.
    pub fn route_message(&self, from: &str, to: &str, envelope: Envelope) -> Result<bool> {
        let components = self.components("route_message")?;
        let routed = components.router.route(from, to, envelope)?;
        if routed {
            self.counters.messages_routed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(routed)
    }

    /// Creates a collaborative space owned by `created_by`.
    pub fn create_collaborative_space(
        &self,
        name: &str,
        created_by: &str,
        description: Option<&str>,
        space_id: Option<&str>,
    ) -> Result<Arc<CollaborativeSpace>> {
        let components = self.components("create_collaborative_space")?;
        let space = components.spaces.create_space(name, created_by, description, space_id)?;
        self.counters.spaces_created.fetch_add(1, Ordering::Relaxed);
        Ok(space)
    }

    pub fn get_collaborative_space(&self, space_id: &str) -> Result<Option<Arc<CollaborativeSpace>>> {
        self.components("get_collaborative_space")?.spaces.get_space(space_id)
    }

    pub fn registry(&self) -> Result<Arc<WorkerRegistry>> {
        Ok(self.components("registry")?.registry)
    }

    pub fn router(&self) -> Result<Arc<MessageRouter>> {
        Ok(self.components("router")?.router)
    }

    pub fn spaces(&self) -> Result<Arc<SpaceManager>> {
        Ok(self.components("spaces")?.spaces)
    }

    pub fn recovery(&self) -> Result<Arc<ErrorRecoverySystem>> {
        Ok(self.components("recovery")?.recovery)
    }

    pub fn monitoring(&self) -> Result<Arc<MonitoringSystem>> {
        Ok(self.components("monitoring")?.monitoring)
    }

    /// Status snapshot. Component sections are filled only while running.
    pub fn status(&self) -> Result<ServerStatus> {
        let (state, components, started_at, uptime_seconds) = {
            let lifecycle = self.lifecycle.lock().map_err(poisoned)?;
            match &lifecycle.running {
                Some(running) => (
                    lifecycle.state,
                    Some(running.components.clone()),
                    Some(running.started_at),
                    running.started.elapsed().as_secs_f64(),
                ),
                None => (lifecycle.state, None, None, 0.0),
            }
        };

        let mut status = ServerStatus {
            server_id: self.server_id.clone(),
            state,
            started_at,
            uptime_seconds,
            config: ServerConfigSummary {
                host: self.config.server.host.clone(),
                port: self.config.server.port,
                max_workers: self.config.server.max_workers,
            },
            statistics: ServerStatistics {
                workers_registered: self.counters.workers_registered.load(Ordering::Relaxed),
                messages_routed: self.counters.messages_routed.load(Ordering::Relaxed),
                spaces_created: self.counters.spaces_created.load(Ordering::Relaxed),
                uptime_seconds,
            },
            active_workers: 0,
            collaborative_spaces: 0,
            recovery: None,
            monitoring: None,
        };
        if let Some(components) = components {
            status.active_workers = components.registry.active_workers(None)?.len();
            status.collaborative_spaces = components.spaces.count()?;
            status.recovery = Some(components.recovery.system_health()?);
            status.monitoring = Some(components.monitoring.system_overview()?);
        }
        Ok(status)
    }
}

impl Drop for CollaborativeServer {
    fn drop(&mut self) {
        if self.is_running()
            && let Err(e) = self.stop()
        {
            warn!(server_id = %self.server_id, error = %e, "Failed to stop server on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::router::MessageType;
    use serde_json::json;

    fn fast_config() -> HuddleConfig {
        let mut config = HuddleConfig::default();
        config.server.maintenance_interval_ms = 10;
        config
    }

    #[test]
    fn test_start_stop_cycle() {
        let server = CollaborativeServer::new(fast_config());
        assert_eq!(server.state().unwrap(), ServerState::Stopped);

        server.start().unwrap();
        assert!(server.is_running());
        let err = server.start().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        assert_eq!(err.context()["operation"], "start");

        server.stop().unwrap();
        assert_eq!(server.state().unwrap(), ServerState::Stopped);
        server.stop().unwrap();

        server.start().unwrap();
        server.stop().unwrap();
    }

    #[test]
    fn test_operations_require_running() {
        let server = CollaborativeServer::new(fast_config());
        let err = server
            .register_worker("w1", WorkerInfo::new("One", "Worker"), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        assert_eq!(err.context()["state"], "stopped");
        assert!(server.registry().is_err());
        assert!(server.create_collaborative_space("s", "w1", None, None).is_err());
    }

    #[test]
    fn test_counters_and_status() {
        let server = CollaborativeServer::new(fast_config());
        server.start().unwrap();
        server.register_worker("a", WorkerInfo::new("A", "Worker"), None).unwrap();
        server.register_worker("b", WorkerInfo::new("B", "Worker"), None).unwrap();
        let envelope = Envelope::new(MessageType::StatusUpdate, json!({ "ok": true }));
        assert!(server.route_message("a", "b", envelope).unwrap());
        server.create_collaborative_space("Plan", "a", None, None).unwrap();

        let status = server.status().unwrap();
        assert_eq!(status.state, ServerState::Running);
        assert_eq!(status.statistics.workers_registered, 2);
        assert_eq!(status.statistics.messages_routed, 1);
        assert_eq!(status.statistics.spaces_created, 1);
        assert_eq!(status.active_workers, 2);
        assert_eq!(status.collaborative_spaces, 1);
        assert!(status.recovery.is_some());
        assert!(status.monitoring.is_some());

        assert!(server.unregister_worker("b").unwrap());
        assert!(!server.unregister_worker("b").unwrap());

        server.stop().unwrap();
        let status = server.status().unwrap();
        assert_eq!(status.statistics.workers_registered, 2);
        assert!(status.recovery.is_none());
    }

    #[test]
    fn test_drop_stops_running_server() {
        let server = CollaborativeServer::new(fast_config());
        server.start().unwrap();
        let registry = server.registry().unwrap();
        registry.register("w1", WorkerInfo::new("One", "Worker"), None).unwrap();
        drop(server);
        assert_eq!(registry.count().unwrap(), 0);
    }
}
