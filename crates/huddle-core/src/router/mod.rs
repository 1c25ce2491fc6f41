//! Point-to-point message routing between registered workers.
//!
//! Accepted messages wait in a bounded per-recipient queue until the
//! server's maintenance tick drains them through
//! [`MessageRouter::process_pending_messages`].

mod message;

pub use message::{
    DEFAULT_MAX_DELIVERY_ATTEMPTS, DeliveryRecord, DeliveryStatus, Envelope, MessagePriority,
    MessageType, RoutedMessage,
};

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CoordinationError, Result, poisoned};
use crate::notify::{self, Callback};
use crate::registry::WorkerRegistry;

/// Messages drained per recipient per processing pass.
pub const DELIVERY_BATCH_SIZE: usize = 10;

const DELIVERY_HISTORY_CAP: usize = 1000;

#[derive(Debug, Default)]
struct RoutingCounters {
    total_messages: u64,
    by_type: BTreeMap<String, u64>,
    by_priority: BTreeMap<String, u64>,
    delivered: u64,
    failed: u64,
    expired: u64,
    rejected: u64,
    total_latency_ms: f64,
}

#[derive(Default)]
struct RouterState {
    queues: HashMap<String, VecDeque<RoutedMessage>>,
    subscribers: HashMap<String, Callback<RoutedMessage>>,
    deliveries: VecDeque<DeliveryRecord>,
    counters: RoutingCounters,
}

impl RouterState {
    fn record_delivery(&mut self, message: &RoutedMessage, status: DeliveryStatus) {
        let now = Utc::now();
        let latency_ms = (now - message.created_at).num_microseconds().unwrap_or(0) as f64 / 1000.0;
        match status {
            DeliveryStatus::Delivered => {
                self.counters.delivered += 1;
                self.counters.total_latency_ms += latency_ms;
            }
            DeliveryStatus::Failed => self.counters.failed += 1,
            DeliveryStatus::Expired => self.counters.expired += 1,
            DeliveryStatus::Pending => {}
        }
        if self.deliveries.len() >= DELIVERY_HISTORY_CAP {
            self.deliveries.pop_front();
        }
        self.deliveries.push_back(DeliveryRecord {
            message_id: message.message_id.clone(),
            from_worker: message.from_worker.clone(),
            to_worker: message.to_worker.clone(),
            status,
            attempts: message.delivery_attempts,
            latency_ms,
            recorded_at: now,
        });
    }
}

/// Inserts behind every message of equal or higher priority.
fn enqueue(queue: &mut VecDeque<RoutedMessage>, message: RoutedMessage) {
    let position = queue.iter().position(|m| m.priority < message.priority).unwrap_or(queue.len());
    queue.insert(position, message);
}

/// Outcome of one [`MessageRouter::process_pending_messages`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    /// Messages handed to recipients.
    pub delivered: usize,
    /// Messages whose callback failed and were put back.
    pub requeued: usize,
    /// Messages abandoned after the last attempt.
    pub failed: usize,
    /// Messages dropped because they expired.
    pub expired: usize,
}

/// Read-only routing statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutingStatistics {
    /// Messages accepted.
    pub total_messages: u64,
    /// Accepted messages per type.
    pub messages_by_type: BTreeMap<String, u64>,
    /// Accepted messages per priority.
    pub messages_by_priority: BTreeMap<String, u64>,
    /// Messages delivered.
    pub delivered_messages: u64,
    /// Messages abandoned.
    pub failed_messages: u64,
    /// Messages expired.
    pub expired_messages: u64,
    /// Messages rejected because a queue was full.
    pub rejected_messages: u64,
    /// Messages waiting in queues.
    pub pending_messages: usize,
    /// Recipients with a subscriber callback.
    pub subscribed_workers: usize,
    /// Mean acceptance-to-delivery latency, in milliseconds.
    pub average_delivery_time_ms: f64,
    /// Whether the router accepts new messages.
    pub accepting: bool,
}

/// Routes messages between workers known to the registry.
pub struct MessageRouter {
    registry: Arc<WorkerRegistry>,
    state: Mutex<RouterState>,
    queue_capacity: usize,
    accepting: AtomicBool,
}

impl fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRouter")
            .field("queue_capacity", &self.queue_capacity)
            .field("accepting", &self.accepting.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl MessageRouter {
    /// Creates a router that accepts messages immediately.
    ///
    /// # Arguments
    /// * `registry` - Registry used to validate senders and recipients
    /// * `queue_capacity` - Maximum pending messages per recipient
    #[must_use]
    pub fn new(registry: Arc<WorkerRegistry>, queue_capacity: usize) -> Self {
        Self {
            registry,
            state: Mutex::new(RouterState::default()),
            queue_capacity: queue_capacity.max(1),
            accepting: AtomicBool::new(true),
        }
    }

    /// Returns `true` until [`shutdown`](Self::shutdown) is called.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Queues a message for a recipient.
    ///
    /// # Returns
    /// `Ok(true)` if queued, `Ok(false)` if the recipient's queue is full.
    pub fn route(&self, from: &str, to: &str, envelope: Envelope) -> Result<bool> {
        if !self.is_accepting() {
            return Err(CoordinationError::invalid_state("route message", "shut down"));
        }
        if !self.registry.is_active(from)? {
            return Err(CoordinationError::not_found("worker", from));
        }
        if !self.registry.is_active(to)? {
            return Err(CoordinationError::not_found("worker", to));
        }

        let message = RoutedMessage::new(from, to, envelope);
        let mut state = self.state.lock().map_err(poisoned)?;
        let queue = state.queues.entry(to.to_string()).or_default();
        if queue.len() >= self.queue_capacity {
            state.counters.rejected += 1;
            warn!(from = %from, to = %to, capacity = self.queue_capacity, "Recipient queue full");
            return Ok(false);
        }

        let message_id = message.message_id.clone();
        let type_key = message.message_type.as_str().to_string();
        let priority_key = message.priority.as_str().to_string();
        enqueue(queue, message);

        let counters = &mut state.counters;
        counters.total_messages += 1;
        *counters.by_type.entry(type_key).or_insert(0) += 1;
        *counters.by_priority.entry(priority_key).or_insert(0) += 1;

        debug!(message_id = %message_id, from = %from, to = %to, "Message queued");
        Ok(true)
    }

    /// Queues a message for every other active worker.
    ///
    /// # Returns
    /// Number of recipients the message was queued for.
    pub fn broadcast(&self, from: &str, envelope: &Envelope) -> Result<usize> {
        let recipients = self.registry.active_workers(Some(from))?;
        let mut queued = 0;
        for recipient in recipients {
            match self.route(from, &recipient.worker_id, envelope.clone()) {
                Ok(true) => queued += 1,
                Ok(false) => {}
                Err(e) if e.kind() == crate::error::ErrorKind::NotFound => {
                    debug!(worker_id = %recipient.worker_id, "Broadcast recipient vanished");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(queued)
    }

    /// Registers the delivery callback for a worker, replacing any previous one.
    pub fn subscribe(&self, worker_id: &str, callback: Callback<RoutedMessage>) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        state.subscribers.insert(worker_id.to_string(), callback);
        debug!(worker_id = %worker_id, "Subscribed to routed messages");
        Ok(())
    }

    /// Removes a worker's delivery callback.
    ///
    /// # Returns
    /// `true` if a callback was registered.
    pub fn unsubscribe(&self, worker_id: &str) -> Result<bool> {
        let mut state = self.state.lock().map_err(poisoned)?;
        Ok(state.subscribers.remove(worker_id).is_some())
    }

    /// Returns the messages waiting for a worker, in delivery order.
    pub fn pending_messages(&self, worker_id: &str) -> Result<Vec<RoutedMessage>> {
        let state = self.state.lock().map_err(poisoned)?;
        Ok(state.queues.get(worker_id).map(|q| q.iter().cloned().collect()).unwrap_or_default())
    }

    /// Delivers up to [`DELIVERY_BATCH_SIZE`] messages per recipient.
    ///
    /// Callbacks run without the router lock held. A recipient without a
    /// callback counts as delivered. A failing callback puts the message back
    /// until its attempts are exhausted.
    pub fn process_pending_messages(&self) -> Result<ProcessReport> {
        let batch: Vec<(RoutedMessage, Option<Callback<RoutedMessage>>)> = {
            let mut state = self.state.lock().map_err(poisoned)?;
            let RouterState { queues, subscribers, .. } = &mut *state;
            let mut batch = Vec::new();
            for (recipient, queue) in queues.iter_mut() {
                let take = queue.len().min(DELIVERY_BATCH_SIZE);
                let callback = subscribers.get(recipient).cloned();
                batch.extend(queue.drain(..take).map(|m| (m, callback.clone())));
            }
            batch
        };

        if batch.is_empty() {
            return Ok(ProcessReport::default());
        }

        let now = Utc::now();
        let mut report = ProcessReport::default();
        let mut outcomes: Vec<(RoutedMessage, DeliveryStatus)> = Vec::with_capacity(batch.len());

        for (mut message, callback) in batch {
            if message.is_expired_at(now) {
                message.status = DeliveryStatus::Expired;
                report.expired += 1;
                outcomes.push((message, DeliveryStatus::Expired));
                continue;
            }

            message.delivery_attempts += 1;
            let delivered = match &callback {
                None => true,
                Some(callback) => {
                    let subscriber = [(message.to_worker.clone(), Arc::clone(callback))];
                    notify::fan_out("message_router", &subscriber, &message).is_clean()
                }
            };

            if delivered {
                message.status = DeliveryStatus::Delivered;
                report.delivered += 1;
                outcomes.push((message, DeliveryStatus::Delivered));
            } else if message.delivery_attempts >= message.max_delivery_attempts {
                message.status = DeliveryStatus::Failed;
                report.failed += 1;
                warn!(
                    message_id = %message.message_id,
                    to = %message.to_worker,
                    attempts = message.delivery_attempts,
                    "Message delivery failed permanently"
                );
                outcomes.push((message, DeliveryStatus::Failed));
            } else {
                report.requeued += 1;
                outcomes.push((message, DeliveryStatus::Pending));
            }
        }

        let mut state = self.state.lock().map_err(poisoned)?;
        for (message, status) in outcomes {
            if status == DeliveryStatus::Pending {
                let queue = state.queues.entry(message.to_worker.clone()).or_default();
                enqueue(queue, message);
            } else {
                state.record_delivery(&message, status);
            }
        }

        debug!(
            delivered = report.delivered,
            requeued = report.requeued,
            failed = report.failed,
            expired = report.expired,
            "Processed pending messages"
        );
        Ok(report)
    }

    /// Drops expired messages from every queue.
    ///
    /// # Returns
    /// Number of messages dropped.
    pub fn cleanup_expired_messages(&self) -> Result<usize> {
        let now = Utc::now();
        let mut state = self.state.lock().map_err(poisoned)?;
        let mut expired = Vec::new();
        for queue in state.queues.values_mut() {
            let (stale, fresh): (Vec<_>, Vec<_>) =
                queue.drain(..).partition(|m| m.is_expired_at(now));
            queue.extend(fresh);
            expired.extend(stale);
        }
        for mut message in expired.iter().cloned() {
            message.status = DeliveryStatus::Expired;
            state.record_delivery(&message, DeliveryStatus::Expired);
        }
        state.queues.retain(|_, queue| !queue.is_empty());
        if !expired.is_empty() {
            debug!(count = expired.len(), "Dropped expired messages");
        }
        Ok(expired.len())
    }

    /// Returns the most recent delivery records, newest first.
    pub fn delivery_history(&self, limit: usize) -> Result<Vec<DeliveryRecord>> {
        let state = self.state.lock().map_err(poisoned)?;
        Ok(state.deliveries.iter().rev().take(limit).cloned().collect())
    }

    /// Returns routing statistics.
    pub fn statistics(&self) -> Result<RoutingStatistics> {
        let state = self.state.lock().map_err(poisoned)?;
        let counters = &state.counters;
        let average_delivery_time_ms = if counters.delivered == 0 {
            0.0
        } else {
            counters.total_latency_ms / counters.delivered as f64
        };
        Ok(RoutingStatistics {
            total_messages: counters.total_messages,
            messages_by_type: counters.by_type.clone(),
            messages_by_priority: counters.by_priority.clone(),
            delivered_messages: counters.delivered,
            failed_messages: counters.failed,
            expired_messages: counters.expired,
            rejected_messages: counters.rejected,
            pending_messages: state.queues.values().map(VecDeque::len).sum(),
            subscribed_workers: state.subscribers.len(),
            average_delivery_time_ms,
            accepting: self.is_accepting(),
        })
    }

    /// Stops accepting messages and drops queues and subscriptions.
    pub fn shutdown(&self) -> Result<()> {
        self.accepting.store(false, Ordering::SeqCst);
        let mut state = self.state.lock().map_err(poisoned)?;
        let dropped: usize = state.queues.values().map(VecDeque::len).sum();
        state.queues.clear();
        state.subscribers.clear();
        info!(dropped_messages = dropped, "Message router shut down");
        Ok(())
    }
}
