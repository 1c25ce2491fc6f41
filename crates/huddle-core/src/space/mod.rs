//! Collaborative spaces: named rooms with participants, messaging and
//! optional shared resources.

mod manager;
mod participant;

pub use manager::{SpaceManager, SpaceManagerStatistics};
pub use participant::{
    ActivityEntry, Participant, ParticipantRole, SYSTEM_SENDER, SpaceMessage, SpacePermission,
    SpaceState,
};

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::{FileSystemConfig, WhiteboardConfig};
use crate::error::{CoordinationError, Result, poisoned};
use crate::filesystem::SharedFileSystem;
use crate::notify::{self, Callback};
use crate::whiteboard::SharedWhiteboard;

/// Messages retained per space.
pub const MESSAGE_HISTORY_CAP: usize = 1000;
/// Activity entries retained per space.
pub const ACTIVITY_LOG_CAP: usize = 1000;

type Recipients = Vec<(String, Callback<SpaceMessage>)>;

#[derive(Debug, Default)]
struct SpaceCounters {
    total_participants: u64,
    messages_sent: u64,
    resources_created: u64,
}

struct SpaceInner {
    state: SpaceState,
    participants: HashMap<String, Participant>,
    history: VecDeque<SpaceMessage>,
    activity: VecDeque<ActivityEntry>,
    subscribers: BTreeMap<String, Callback<SpaceMessage>>,
    counters: SpaceCounters,
    last_activity: DateTime<Utc>,
    whiteboard: Option<Arc<SharedWhiteboard>>,
    files: Option<Arc<SharedFileSystem>>,
}

impl SpaceInner {
    fn log_activity(&mut self, activity: &str, worker_id: Option<&str>, details: Value) {
        if self.activity.len() >= ACTIVITY_LOG_CAP {
            self.activity.pop_front();
        }
        self.activity.push_back(ActivityEntry {
            activity: activity.to_string(),
            worker_id: worker_id.map(str::to_string),
            details,
            timestamp: Utc::now(),
        });
    }

    fn append_message(&mut self, message: SpaceMessage) {
        if !message.is_system {
            self.counters.messages_sent += 1;
        }
        self.last_activity = message.timestamp;
        if let Some(sender) = self.participants.get_mut(&message.sender_id) {
            sender.last_activity = message.timestamp;
        }
        if self.history.len() >= MESSAGE_HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(message);
    }

    /// Subscribers other than `exclude`.
    fn recipients(&self, exclude: &str) -> Recipients {
        self.subscribers
            .iter()
            .filter(|(worker_id, _)| worker_id.as_str() != exclude)
            .map(|(worker_id, callback)| (worker_id.clone(), Arc::clone(callback)))
            .collect()
    }
}

/// Space statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpaceStatistics {
    pub space_id: String,
    pub name: String,
    pub state: SpaceState,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub total_participants: u64,
    pub active_participants: usize,
    pub messages_sent: u64,
    pub total_messages: usize,
    pub resources_created: u64,
    pub subscribers: usize,
    pub has_shared_whiteboard: bool,
    pub has_shared_files: bool,
}

/// A collaboration room.
pub struct CollaborativeSpace {
    space_id: String,
    name: String,
    description: String,
    created_by: String,
    created_at: DateTime<Utc>,
    whiteboard_config: WhiteboardConfig,
    filesystem_config: FileSystemConfig,
    inner: RwLock<SpaceInner>,
}

impl fmt::Debug for CollaborativeSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollaborativeSpace")
            .field("space_id", &self.space_id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl CollaborativeSpace {
    /// Creates an empty, active space.
    pub fn new(
        space_id: impl Into<String>,
        name: impl Into<String>,
        created_by: impl Into<String>,
        description: impl Into<String>,
        whiteboard_config: WhiteboardConfig,
        filesystem_config: FileSystemConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            space_id: space_id.into(),
            name: name.into(),
            description: description.into(),
            created_by: created_by.into(),
            created_at: now,
            whiteboard_config,
            filesystem_config,
            inner: RwLock::new(SpaceInner {
                state: SpaceState::Active,
                participants: HashMap::new(),
                history: VecDeque::new(),
                activity: VecDeque::new(),
                subscribers: BTreeMap::new(),
                counters: SpaceCounters::default(),
                last_activity: now,
                whiteboard: None,
                files: None,
            }),
        }
    }

    pub fn space_id(&self) -> &str {
        &self.space_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> Result<SpaceState> {
        Ok(self.inner.read().map_err(poisoned)?.state)
    }

    fn ensure_writable(&self, inner: &SpaceInner, operation: &str) -> Result<()> {
        if inner.state.is_writable() {
            Ok(())
        } else {
            Err(CoordinationError::invalid_state(
                format!("{} in space {}", operation, self.space_id),
                inner.state,
            ))
        }
    }

    fn message(
        &self,
        sender_id: &str,
        sender_name: &str,
        message_type: &str,
        content: Value,
        response_to: Option<String>,
    ) -> SpaceMessage {
        SpaceMessage {
            message_id: uuid::Uuid::new_v4().to_string(),
            space_id: self.space_id.clone(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            message_type: message_type.to_string(),
            content,
            timestamp: Utc::now(),
            response_to,
            is_system: sender_id == SYSTEM_SENDER,
        }
    }

    /// Records a system message and returns it with its recipients.
    fn post_system(
        &self,
        inner: &mut SpaceInner,
        message_type: &str,
        content: Value,
    ) -> (SpaceMessage, Recipients) {
        let message = self.message(SYSTEM_SENDER, "System", message_type, content, None);
        inner.append_message(message.clone());
        (message, inner.recipients(SYSTEM_SENDER))
    }

    fn deliver(&self, recipients: &Recipients, message: &SpaceMessage) -> usize {
        if recipients.is_empty() {
            return 0;
        }
        notify::fan_out("collaborative_space", recipients, message).delivered
    }

    /// Adds a participant and announces it to the space.
    ///
    /// # Returns
    /// `false` if the worker already participates.
    pub fn add_participant(
        &self,
        worker_id: &str,
        worker_name: &str,
        worker_type: &str,
        role: ParticipantRole,
        permissions: Option<BTreeSet<SpacePermission>>,
    ) -> Result<bool> {
        let (notice, recipients) = {
            let mut inner = self.inner.write().map_err(poisoned)?;
            self.ensure_writable(&inner, "add participant")?;
            if inner.participants.contains_key(worker_id) {
                warn!(space_id = %self.space_id, worker_id = %worker_id, "Already a participant");
                return Ok(false);
            }

            let participant = Participant::new(worker_id, worker_name, worker_type, role, permissions);
            inner.participants.insert(worker_id.to_string(), participant);
            inner.counters.total_participants += 1;
            inner.log_activity(
                "participant_joined",
                Some(worker_id),
                json!({ "worker_name": worker_name, "role": role.as_str() }),
            );
            self.post_system(
                &mut inner,
                "participant_joined",
                json!({
                    "worker_id": worker_id,
                    "worker_name": worker_name,
                    "worker_type": worker_type,
                    "role": role.as_str(),
                }),
            )
        };

        info!(space_id = %self.space_id, worker_id = %worker_id, role = %role, "Participant joined");
        self.deliver(&recipients, &notice);
        Ok(true)
    }

    /// Removes a participant and announces it to the remaining ones.
    ///
    /// # Returns
    /// `false` if the worker is not a participant.
    pub fn remove_participant(&self, worker_id: &str, reason: &str) -> Result<bool> {
        let (notice, recipients) = {
            let mut inner = self.inner.write().map_err(poisoned)?;
            self.ensure_writable(&inner, "remove participant")?;
            let Some(participant) = inner.participants.remove(worker_id) else {
                return Ok(false);
            };
            inner.subscribers.remove(worker_id);
            inner.log_activity(
                "participant_left",
                Some(worker_id),
                json!({ "worker_name": participant.worker_name, "reason": reason }),
            );
            self.post_system(
                &mut inner,
                "participant_left",
                json!({
                    "worker_id": worker_id,
                    "worker_name": participant.worker_name,
                    "reason": reason,
                }),
            )
        };

        info!(space_id = %self.space_id, worker_id = %worker_id, reason = %reason, "Participant left");
        self.deliver(&recipients, &notice);
        Ok(true)
    }

    pub fn participants(&self, active_only: bool) -> Result<Vec<Participant>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut participants: Vec<Participant> = inner
            .participants
            .values()
            .filter(|p| !active_only || p.is_active)
            .cloned()
            .collect();
        participants.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        Ok(participants)
    }

    pub fn participant(&self, worker_id: &str) -> Result<Option<Participant>> {
        Ok(self.inner.read().map_err(poisoned)?.participants.get(worker_id).cloned())
    }

    pub fn is_participant(&self, worker_id: &str) -> Result<bool> {
        Ok(self.inner.read().map_err(poisoned)?.participants.contains_key(worker_id))
    }

    pub fn has_permission(&self, worker_id: &str, permission: SpacePermission) -> Result<bool> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.participants.get(worker_id).is_some_and(|p| p.has_permission(permission)))
    }

    /// Refreshes a participant's activity timestamp.
    pub fn touch_participant(&self, worker_id: &str) -> Result<bool> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let now = Utc::now();
        let Some(participant) = inner.participants.get_mut(worker_id) else {
            return Ok(false);
        };
        participant.last_activity = now;
        inner.last_activity = now;
        Ok(true)
    }

    /// Posts a message to every subscribed participant except the sender.
    ///
    /// # Returns
    /// Number of callbacks that accepted the message.
    ///
    /// # Errors
    /// `PermissionDenied` if the sender is not a participant allowed to send.
    pub fn broadcast_message(
        &self,
        sender_id: &str,
        message_type: &str,
        content: Value,
    ) -> Result<usize> {
        let (message, recipients) = {
            let mut inner = self.inner.write().map_err(poisoned)?;
            self.ensure_writable(&inner, "broadcast message")?;
            let sender_name = self.sender_name(&inner, sender_id)?;
            let message = self.message(sender_id, &sender_name, message_type, content, None);
            inner.append_message(message.clone());
            (message, inner.recipients(sender_id))
        };

        let delivered = self.deliver(&recipients, &message);
        debug!(
            space_id = %self.space_id,
            worker_id = %sender_id,
            message_type = %message_type,
            delivered,
            "Broadcast sent"
        );
        Ok(delivered)
    }

    /// Sends a message to one participant. History is recorded regardless of
    /// delivery.
    ///
    /// # Returns
    /// `false` if either party is not a participant or the recipient's
    /// callback failed.
    pub fn send_direct_message(
        &self,
        sender_id: &str,
        recipient_id: &str,
        message_type: &str,
        content: Value,
        response_to: Option<&str>,
    ) -> Result<bool> {
        let (message, callback) = {
            let mut inner = self.inner.write().map_err(poisoned)?;
            self.ensure_writable(&inner, "send direct message")?;
            if !inner.participants.contains_key(sender_id)
                || !inner.participants.contains_key(recipient_id)
            {
                warn!(
                    space_id = %self.space_id,
                    worker_id = %sender_id,
                    recipient = %recipient_id,
                    "Direct message between non-participants"
                );
                return Ok(false);
            }
            let sender_name = self.sender_name(&inner, sender_id)?;
            let message = self.message(
                sender_id,
                &sender_name,
                message_type,
                content,
                response_to.map(str::to_string),
            );
            inner.append_message(message.clone());
            (message, inner.subscribers.get(recipient_id).cloned())
        };

        let Some(callback) = callback else {
            return Ok(true);
        };
        let report = notify::fan_out(
            "collaborative_space",
            &[(recipient_id.to_string(), callback)],
            &message,
        );
        Ok(report.is_clean())
    }

    fn sender_name(&self, inner: &SpaceInner, sender_id: &str) -> Result<String> {
        match inner.participants.get(sender_id) {
            Some(p) if p.has_permission(SpacePermission::SendMessages) => Ok(p.worker_name.clone()),
            _ => Err(CoordinationError::PermissionDenied {
                worker_id: sender_id.to_string(),
                resource: format!("space {}", self.space_id),
                permission: SpacePermission::SendMessages.to_string(),
            }),
        }
    }

    /// Registers a participant's message callback.
    ///
    /// # Returns
    /// `false` if the worker is not a participant.
    pub fn subscribe(&self, worker_id: &str, callback: Callback<SpaceMessage>) -> Result<bool> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        self.ensure_writable(&inner, "subscribe")?;
        if !inner.participants.contains_key(worker_id) {
            warn!(space_id = %self.space_id, worker_id = %worker_id, "Subscribe by non-participant");
            return Ok(false);
        }
        inner.subscribers.insert(worker_id.to_string(), callback);
        Ok(true)
    }

    pub fn unsubscribe(&self, worker_id: &str) -> Result<bool> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        Ok(inner.subscribers.remove(worker_id).is_some())
    }

    /// Returns messages newest first, optionally only those after `since`.
    pub fn message_history(
        &self,
        limit: Option<usize>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SpaceMessage>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner
            .history
            .iter()
            .rev()
            .filter(|m| since.is_none_or(|since| m.timestamp > since))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    /// Returns activity entries newest first.
    pub fn activity_log(&self, limit: usize) -> Result<Vec<ActivityEntry>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.activity.iter().rev().take(limit).cloned().collect())
    }

    /// Moves an active space to paused and announces it.
    pub fn pause(&self) -> Result<()> {
        self.transition(SpaceState::Active, SpaceState::Paused, "space_paused", "pause space")
    }

    /// Moves a paused space back to active and announces it.
    pub fn resume(&self) -> Result<()> {
        self.transition(SpaceState::Paused, SpaceState::Active, "space_resumed", "resume space")
    }

    fn transition(
        &self,
        from: SpaceState,
        to: SpaceState,
        notice_type: &str,
        operation: &str,
    ) -> Result<()> {
        let (notice, recipients) = {
            let mut inner = self.inner.write().map_err(poisoned)?;
            if inner.state != from {
                return Err(CoordinationError::invalid_state(operation, inner.state));
            }
            inner.state = to;
            inner.log_activity(notice_type, None, Value::Null);
            self.post_system(&mut inner, notice_type, json!({ "state": to.as_str() }))
        };
        info!(space_id = %self.space_id, state = %to, "Space state changed");
        self.deliver(&recipients, &notice);
        Ok(())
    }

    /// Makes the space read-only. Subscriptions are kept.
    pub fn archive(&self) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        self.ensure_writable(&inner, "archive space")?;
        inner.state = SpaceState::Archived;
        inner.log_activity("space_archived", None, Value::Null);
        info!(space_id = %self.space_id, "Space archived");
        Ok(())
    }

    /// Closes the space for good, notifying subscribers one last time.
    pub fn close(&self) -> Result<()> {
        let (notice, recipients) = {
            let mut inner = self.inner.write().map_err(poisoned)?;
            if inner.state == SpaceState::Closed {
                return Err(CoordinationError::invalid_state("close space", inner.state));
            }
            let notice = self.post_system(
                &mut inner,
                "space_closed",
                json!({ "reason": "Space has been closed" }),
            );
            inner.state = SpaceState::Closed;
            inner.subscribers.clear();
            inner.log_activity("space_closed", None, Value::Null);
            notice
        };
        info!(space_id = %self.space_id, "Space closed");
        self.deliver(&recipients, &notice);
        Ok(())
    }

    /// Attaches a new whiteboard owned by this space.
    ///
    /// # Errors
    /// `AlreadyExists` if the space already has one.
    pub fn create_shared_whiteboard(&self, name: &str) -> Result<Arc<SharedWhiteboard>> {
        let (whiteboard, notice, recipients) = {
            let mut inner = self.inner.write().map_err(poisoned)?;
            self.ensure_writable(&inner, "create shared whiteboard")?;
            if let Some(existing) = &inner.whiteboard {
                return Err(CoordinationError::AlreadyExists {
                    entity: "whiteboard",
                    id: existing.whiteboard_id().to_string(),
                });
            }

            let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect();
            let whiteboard_id = format!("{}_whiteboard_{}", self.space_id, suffix);
            let whiteboard = Arc::new(SharedWhiteboard::new(
                whiteboard_id.clone(),
                name,
                self.created_by.clone(),
                &self.whiteboard_config,
            ));
            inner.whiteboard = Some(Arc::clone(&whiteboard));
            inner.counters.resources_created += 1;
            inner.log_activity(
                "shared_whiteboard_created",
                None,
                json!({ "whiteboard_id": whiteboard_id, "name": name }),
            );
            let (notice, recipients) = self.post_system(
                &mut inner,
                "shared_whiteboard_created",
                json!({ "whiteboard_id": whiteboard_id, "name": name }),
            );
            (whiteboard, notice, recipients)
        };

        info!(space_id = %self.space_id, whiteboard_id = %whiteboard.whiteboard_id(), "Whiteboard created");
        self.deliver(&recipients, &notice);
        Ok(whiteboard)
    }

    /// Attaches a new file system owned by this space.
    ///
    /// # Errors
    /// `AlreadyExists` if the space already has one.
    pub fn create_shared_files(&self) -> Result<Arc<SharedFileSystem>> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        self.ensure_writable(&inner, "create shared files")?;
        if inner.files.is_some() {
            return Err(CoordinationError::AlreadyExists {
                entity: "file system",
                id: self.space_id.clone(),
            });
        }
        let files = Arc::new(SharedFileSystem::new(self.space_id.clone(), &self.filesystem_config));
        inner.files = Some(Arc::clone(&files));
        inner.counters.resources_created += 1;
        inner.log_activity("shared_files_created", None, Value::Null);
        info!(space_id = %self.space_id, "Shared file system created");
        Ok(files)
    }

    pub fn whiteboard(&self) -> Result<Option<Arc<SharedWhiteboard>>> {
        Ok(self.inner.read().map_err(poisoned)?.whiteboard.clone())
    }

    pub fn files(&self) -> Result<Option<Arc<SharedFileSystem>>> {
        Ok(self.inner.read().map_err(poisoned)?.files.clone())
    }

    pub fn statistics(&self) -> Result<SpaceStatistics> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(SpaceStatistics {
            space_id: self.space_id.clone(),
            name: self.name.clone(),
            state: inner.state,
            created_at: self.created_at,
            last_activity: inner.last_activity,
            total_participants: inner.counters.total_participants,
            active_participants: inner.participants.values().filter(|p| p.is_active).count(),
            messages_sent: inner.counters.messages_sent,
            total_messages: inner.history.len(),
            resources_created: inner.counters.resources_created,
            subscribers: inner.subscribers.len(),
            has_shared_whiteboard: inner.whiteboard.is_some(),
            has_shared_files: inner.files.is_some(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::notify::callback;
    use std::sync::Mutex;

    fn space() -> CollaborativeSpace {
        let space = CollaborativeSpace::new(
            "space-1",
            "Design review",
            "owner",
            "",
            WhiteboardConfig::default(),
            FileSystemConfig::default(),
        );
        space.add_participant("owner", "Owner", "planner", ParticipantRole::Owner, None).unwrap();
        space
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, Callback<SpaceMessage>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb = callback(move |message: &SpaceMessage| {
            sink.lock().unwrap().push(message.message_type.clone());
            Ok(())
        });
        (seen, cb)
    }

    #[test]
    fn test_add_participant_is_guarded() {
        let space = space();
        assert!(space.add_participant("w2", "Two", "executor", ParticipantRole::Participant, None).unwrap());
        assert!(!space.add_participant("w2", "Two", "executor", ParticipantRole::Participant, None).unwrap());
        assert_eq!(space.participants(true).unwrap().len(), 2);
        assert_eq!(space.activity_log(10).unwrap()[0].activity, "participant_joined");
    }

    #[test]
    fn test_existing_participants_see_joins_and_leaves() {
        let space = space();
        let (seen, cb) = recorder();
        assert!(space.subscribe("owner", cb).unwrap());

        space.add_participant("w2", "Two", "executor", ParticipantRole::Participant, None).unwrap();
        assert!(space.remove_participant("w2", "done").unwrap());
        assert!(!space.remove_participant("w2", "done").unwrap());

        assert_eq!(*seen.lock().unwrap(), vec!["participant_joined", "participant_left"]);
        assert_eq!(space.statistics().unwrap().messages_sent, 0);
    }

    #[test]
    fn test_broadcast_excludes_sender() {
        let space = space();
        space.add_participant("w2", "Two", "executor", ParticipantRole::Participant, None).unwrap();
        space.add_participant("w3", "Three", "verifier", ParticipantRole::Participant, None).unwrap();
        let (owner_seen, owner_cb) = recorder();
        let (w2_seen, w2_cb) = recorder();
        let (w3_seen, w3_cb) = recorder();
        space.subscribe("owner", owner_cb).unwrap();
        space.subscribe("w2", w2_cb).unwrap();
        space.subscribe("w3", w3_cb).unwrap();

        let delivered = space.broadcast_message("owner", "task_assignment", json!({ "task": "x" })).unwrap();

        assert_eq!(delivered, 2);
        assert!(owner_seen.lock().unwrap().is_empty());
        assert_eq!(*w2_seen.lock().unwrap(), vec!["task_assignment"]);
        assert_eq!(w3_seen.lock().unwrap().len(), 1);
        assert_eq!(space.statistics().unwrap().messages_sent, 1);
    }

    #[test]
    fn test_broadcast_continues_past_failing_callback() {
        let space = space();
        space.add_participant("w2", "Two", "executor", ParticipantRole::Participant, None).unwrap();
        space.add_participant("w3", "Three", "executor", ParticipantRole::Participant, None).unwrap();
        space.subscribe("w2", callback(|_: &SpaceMessage| anyhow::bail!("gone"))).unwrap();
        let (seen, cb) = recorder();
        space.subscribe("w3", cb).unwrap();

        assert_eq!(space.broadcast_message("owner", "note", Value::Null).unwrap(), 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_observer_cannot_broadcast() {
        let space = space();
        space.add_participant("obs", "Obs", "verifier", ParticipantRole::Observer, None).unwrap();
        let err = space.broadcast_message("obs", "note", Value::Null).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);
        let err = space.broadcast_message("stranger", "note", Value::Null).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);
    }

    #[test]
    fn test_direct_message_rules() {
        let space = space();
        space.add_participant("w2", "Two", "executor", ParticipantRole::Participant, None).unwrap();

        assert!(!space.send_direct_message("owner", "stranger", "ping", Value::Null, None).unwrap());
        assert!(space.send_direct_message("owner", "w2", "ping", Value::Null, None).unwrap());

        space.subscribe("w2", callback(|_: &SpaceMessage| anyhow::bail!("busy"))).unwrap();
        assert!(!space.send_direct_message("owner", "w2", "ping", Value::Null, None).unwrap());

        let (seen, cb) = recorder();
        space.subscribe("w2", cb).unwrap();
        let original = space.message_history(Some(1), None).unwrap()[0].message_id.clone();
        assert!(space.send_direct_message("owner", "w2", "pong", Value::Null, Some(&original)).unwrap());
        assert_eq!(*seen.lock().unwrap(), vec!["pong"]);

        let history = space.message_history(None, None).unwrap();
        let direct: Vec<_> = history.iter().filter(|m| !m.is_system).collect();
        assert_eq!(direct.len(), 3);
        assert_eq!(direct[0].response_to.as_deref(), Some(original.as_str()));
    }

    #[test]
    fn test_history_newest_first_with_limit_and_since() {
        let space = space();
        space.broadcast_message("owner", "first", Value::Null).unwrap();
        let cutoff = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        space.broadcast_message("owner", "second", Value::Null).unwrap();
        space.broadcast_message("owner", "third", Value::Null).unwrap();

        let newest = space.message_history(Some(1), None).unwrap();
        assert_eq!(newest[0].message_type, "third");
        let recent = space.message_history(None, Some(cutoff)).unwrap();
        let types: Vec<&str> = recent.iter().map(|m| m.message_type.as_str()).collect();
        assert_eq!(types, vec!["third", "second"]);
    }

    #[test]
    fn test_pause_resume_and_close() {
        let space = space();
        let (seen, cb) = recorder();
        space.subscribe("owner", cb).unwrap();

        space.pause().unwrap();
        assert!(space.pause().is_err());
        space.broadcast_message("owner", "still_talking", Value::Null).unwrap();
        space.resume().unwrap();
        space.close().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["space_paused", "space_resumed", "space_closed"]);
        assert_eq!(space.statistics().unwrap().subscribers, 0);

        let err = space.broadcast_message("owner", "late", Value::Null).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        let err = space
            .add_participant("w9", "Nine", "executor", ParticipantRole::Participant, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        assert!(space.close().is_err());
    }

    #[test]
    fn test_archived_space_is_read_only() {
        let space = space();
        space.broadcast_message("owner", "note", Value::Null).unwrap();
        space.archive().unwrap();

        assert_eq!(space.state().unwrap(), SpaceState::Archived);
        assert!(space.broadcast_message("owner", "note", Value::Null).is_err());
        assert!(space.create_shared_files().is_err());
        assert_eq!(space.message_history(None, None).unwrap().len(), 2);
        space.close().unwrap();
    }

    #[test]
    fn test_shared_resources_attach_once() {
        let space = space();
        let (seen, cb) = recorder();
        space.subscribe("owner", cb).unwrap();

        let whiteboard = space.create_shared_whiteboard("Sketches").unwrap();
        assert!(whiteboard.whiteboard_id().starts_with("space-1_whiteboard_"));
        assert_eq!(whiteboard.whiteboard_id().len(), "space-1_whiteboard_".len() + 8);
        assert!(space.create_shared_whiteboard("Again").is_err());
        assert_eq!(*seen.lock().unwrap(), vec!["shared_whiteboard_created"]);

        let files = space.create_shared_files().unwrap();
        assert_eq!(files.space_id(), "space-1");
        assert!(space.create_shared_files().is_err());

        let stats = space.statistics().unwrap();
        assert!(stats.has_shared_whiteboard && stats.has_shared_files);
        assert_eq!(stats.resources_created, 2);
        assert!(space.whiteboard().unwrap().is_some());
    }

    #[test]
    fn test_subscribe_requires_participation() {
        let space = space();
        let (_, cb) = recorder();
        assert!(!space.subscribe("stranger", cb).unwrap());
        assert!(!space.unsubscribe("stranger").unwrap());
    }
}
