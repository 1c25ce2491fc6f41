//! Background maintenance loop.
//!
//! Runs on its own OS thread with a current-thread tokio runtime. Each tick
//! removes idle workers, delivers pending messages, drops expired ones, runs
//! recovery maintenance and, once per collection interval, collects and
//! analyzes monitoring data. A failing step is logged and the tick goes on.

use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::Components;
use crate::config::ServerConfig;
use crate::error::{CoordinationError, Result};
use crate::monitoring::CollaborationSnapshot;
use crate::recovery::MaintenanceReport;
use crate::space::SpaceState;

const THREAD_NAME: &str = "huddle-maintenance";

/// What one maintenance tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub workers_removed: usize,
    pub messages_delivered: usize,
    pub messages_expired: usize,
    pub recovery: Option<MaintenanceReport>,
    pub metrics_collected: bool,
}

/// Work performed on every tick.
pub(crate) struct MaintenanceLoop {
    components: Components,
    config: ServerConfig,
}

impl MaintenanceLoop {
    pub(crate) fn new(components: Components, config: ServerConfig) -> Self {
        Self { components, config }
    }

    /// Starts the loop on a dedicated thread.
    pub(crate) fn spawn(self, token: CancellationToken) -> io::Result<MaintenanceHandle> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let loop_token = token.clone();

        let thread = thread::Builder::new().name(THREAD_NAME.to_string()).spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!(error = %e, "Failed to build maintenance runtime");
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            runtime.block_on(self.run(loop_token, ready_tx));
            let _ = done_tx.send(());
        })?;

        Ok(MaintenanceHandle { thread, token, ready_rx, done_rx })
    }

    async fn run(&self, token: CancellationToken, ready_tx: Sender<io::Result<()>>) {
        let period = self.config.maintenance_interval().max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let _ = ready_tx.send(Ok(()));
        info!(interval_ms = period.as_millis() as u64, "Maintenance loop started");

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = interval.tick() => {
                    let report = self.tick();
                    debug!(
                        delivered = report.messages_delivered,
                        removed = report.workers_removed,
                        "Maintenance tick"
                    );
                }
            }
        }
        info!("Maintenance loop stopped");
    }

    /// Runs one maintenance pass.
    pub(crate) fn tick(&self) -> TickReport {
        let c = &self.components;
        let mut report = TickReport::default();

        if self.config.auto_cleanup {
            match c.registry.cleanup_inactive_workers(self.config.worker_idle_timeout()) {
                Ok(removed) => {
                    for worker_id in &removed {
                        if let Err(e) = c.router.unsubscribe(worker_id) {
                            debug!(worker_id = %worker_id, error = %e, "Unsubscribe failed");
                        }
                    }
                    report.workers_removed = removed.len();
                }
                Err(e) => warn!(error = %e, "Inactive worker cleanup failed"),
            }
        }

        match c.router.process_pending_messages() {
            Ok(processed) => report.messages_delivered = processed.delivered,
            Err(e) => warn!(error = %e, "Message processing failed"),
        }
        match c.router.cleanup_expired_messages() {
            Ok(expired) => report.messages_expired = expired,
            Err(e) => warn!(error = %e, "Expired message cleanup failed"),
        }

        match c.recovery.run_maintenance() {
            Ok(recovery) => report.recovery = Some(recovery),
            Err(e) => warn!(error = %e, "Recovery maintenance failed"),
        }

        match c.monitoring.collection_due() {
            Ok(true) => match self.collect_metrics() {
                Ok(()) => report.metrics_collected = true,
                Err(e) => warn!(error = %e, "Metric collection failed"),
            },
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Metric collection check failed"),
        }

        report
    }

    fn collect_metrics(&self) -> Result<()> {
        let c = &self.components;
        let registry = c.registry.statistics()?;
        let routing = c.router.statistics()?;
        let active_spaces = c
            .spaces
            .list_spaces(false)?
            .iter()
            .filter(|space| space.state().is_ok_and(|state| state == SpaceState::Active))
            .count();

        let snapshot = CollaborationSnapshot {
            active_workers: registry.active_workers,
            active_spaces,
            total_messages: routing.total_messages,
            average_delivery_time_ms: routing.average_delivery_time_ms,
            average_success_rate: registry.average_success_rate,
        };
        c.monitoring.collect_collaboration_metrics(&snapshot)?;
        c.monitoring.analyze()?;
        c.monitoring.cleanup_old_data()?;
        Ok(())
    }
}

/// Handle to a running maintenance thread.
pub(crate) struct MaintenanceHandle {
    thread: JoinHandle<()>,
    token: CancellationToken,
    ready_rx: Receiver<io::Result<()>>,
    done_rx: Receiver<()>,
}

impl MaintenanceHandle {
    /// Blocks until the loop is ready.
    ///
    /// # Errors
    /// `Timeout` if the loop is not ready within `timeout`, `Io` if its
    /// runtime could not be built.
    pub(crate) fn wait_ready(&self, timeout: Duration) -> Result<()> {
        match self.ready_rx.recv_timeout(timeout) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(CoordinationError::Io(e)),
            Err(RecvTimeoutError::Timeout) => Err(CoordinationError::Timeout {
                operation: "start".to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(CoordinationError::Io(io::Error::other("maintenance thread exited before ready")))
            }
        }
    }

    /// Cancels the loop and waits up to `timeout` for it to finish.
    ///
    /// # Returns
    /// `true` if the thread was joined, `false` if it was left detached.
    pub(crate) fn shutdown(self, timeout: Duration) -> bool {
        self.token.cancel();
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.thread.join().is_err() {
                    warn!("Maintenance thread panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Maintenance thread did not stop in time, detaching"
                );
                false
            }
        }
    }
}
