//! Shared whiteboard: versioned, lockable visual content with change history.
//!
//! Locks are advisory per item. A lock older than the configured timeout no
//! longer blocks other workers and is cleared by whichever operation touches
//! the item next, or eagerly by [`SharedWhiteboard::release_expired_locks`].

mod content;

pub use content::{
    ChangeOperation, ContentChange, ContentType, ContentUpdate, NewContent, Position, Size,
    WhiteboardContent, WhiteboardEvent, WhiteboardEventKind,
};

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::config::WhiteboardConfig;
use crate::error::{CoordinationError, Result, poisoned};
use crate::notify::{self, Callback};

const CLEAR_TARGET: &str = "all";

#[derive(Default)]
struct BoardState {
    contents: HashMap<String, WhiteboardContent>,
    history: VecDeque<ContentChange>,
    subscribers: BTreeMap<String, Callback<WhiteboardEvent>>,
    last_activity: Option<DateTime<Utc>>,
}

/// Board statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhiteboardStatistics {
    pub whiteboard_id: String,
    pub name: String,
    pub total_content: usize,
    pub content_by_type: BTreeMap<String, usize>,
    pub locked_content: usize,
    pub total_changes: usize,
    pub subscribers: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
}

/// A whiteboard shared by the participants of a space.
pub struct SharedWhiteboard {
    whiteboard_id: String,
    name: String,
    created_by: String,
    created_at: DateTime<Utc>,
    lock_timeout: chrono::Duration,
    max_history: usize,
    state: RwLock<BoardState>,
}

impl fmt::Debug for SharedWhiteboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedWhiteboard")
            .field("whiteboard_id", &self.whiteboard_id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl SharedWhiteboard {
    /// Creates an empty board.
    pub fn new(
        whiteboard_id: impl Into<String>,
        name: impl Into<String>,
        created_by: impl Into<String>,
        config: &WhiteboardConfig,
    ) -> Self {
        let lock_timeout = i64::try_from(config.lock_timeout_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX);
        Self {
            whiteboard_id: whiteboard_id.into(),
            name: name.into(),
            created_by: created_by.into(),
            created_at: Utc::now(),
            lock_timeout,
            max_history: config.max_history.max(1),
            state: RwLock::new(BoardState::default()),
        }
    }

    pub fn whiteboard_id(&self) -> &str {
        &self.whiteboard_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    /// Adds a content item and notifies every subscriber.
    ///
    /// # Returns
    /// The content id.
    pub fn add_content(&self, worker_id: &str, new: NewContent) -> Result<String> {
        let now = Utc::now();
        let (content, subscribers) = {
            let mut state = self.state.write().map_err(poisoned)?;
            let content_id = new.content_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            if state.contents.contains_key(&content_id) {
                return Err(CoordinationError::AlreadyExists { entity: "content", id: content_id });
            }

            let content = WhiteboardContent {
                content_id: content_id.clone(),
                content_type: new.content_type,
                position: new.position,
                size: new.size,
                data: new.data,
                style: new.style,
                version: 1,
                created_by: worker_id.to_string(),
                created_at: now,
                last_modified_by: worker_id.to_string(),
                last_modified_at: now,
                is_locked: false,
                locked_by: None,
                locked_at: None,
                tags: new.tags,
            };
            let after = serde_json::to_value(&content)?;
            self.record_change(
                &mut state,
                &content_id,
                ChangeOperation::Create,
                worker_id,
                None,
                Some(after),
            );
            state.contents.insert(content_id, content.clone());
            (content, Self::subscriber_snapshot(&state))
        };

        debug!(
            whiteboard_id = %self.whiteboard_id,
            content_id = %content.content_id,
            worker_id = %worker_id,
            "Content added"
        );
        let content_id = content.content_id.clone();
        self.notify(&subscribers, WhiteboardEventKind::ContentAdded, worker_id, Some(content));
        Ok(content_id)
    }

    /// Applies a partial update.
    ///
    /// # Returns
    /// `Ok(false)` if another worker holds a live lock on the item.
    pub fn update_content(
        &self,
        worker_id: &str,
        content_id: &str,
        update: ContentUpdate,
    ) -> Result<bool> {
        let now = Utc::now();
        let (content, subscribers) = {
            let mut state = self.state.write().map_err(poisoned)?;
            let operation = update.operation();
            let Some(content) = state.contents.get_mut(content_id) else {
                return Err(CoordinationError::not_found("content", content_id));
            };
            if content.blocked_for(worker_id, now, self.lock_timeout) {
                debug!(content_id = %content_id, worker_id = %worker_id, "Update blocked by lock");
                return Ok(false);
            }
            if content.is_locked && content.locked_by.as_deref() != Some(worker_id) {
                content.clear_lock();
            }

            let before = serde_json::to_value(&*content)?;
            update.apply(content);
            content.version += 1;
            content.last_modified_by = worker_id.to_string();
            content.last_modified_at = now;
            let updated = content.clone();
            let after = serde_json::to_value(&updated)?;

            self.record_change(
                &mut state,
                content_id,
                operation,
                worker_id,
                Some(before),
                Some(after),
            );
            (updated, Self::subscriber_snapshot(&state))
        };

        debug!(
            content_id = %content_id,
            version = content.version,
            worker_id = %worker_id,
            "Content updated"
        );
        self.notify(&subscribers, WhiteboardEventKind::ContentUpdated, worker_id, Some(content));
        Ok(true)
    }

    /// Deletes an item.
    ///
    /// # Returns
    /// `Ok(false)` if another worker holds a live lock on the item.
    pub fn delete_content(&self, worker_id: &str, content_id: &str) -> Result<bool> {
        let now = Utc::now();
        let (mut removed, subscribers) = {
            let mut state = self.state.write().map_err(poisoned)?;
            let Some(content) = state.contents.get(content_id) else {
                return Err(CoordinationError::not_found("content", content_id));
            };
            if content.blocked_for(worker_id, now, self.lock_timeout) {
                return Ok(false);
            }
            let before = serde_json::to_value(content)?;
            let Some(removed) = state.contents.remove(content_id) else {
                return Err(CoordinationError::not_found("content", content_id));
            };
            self.record_change(
                &mut state,
                content_id,
                ChangeOperation::Delete,
                worker_id,
                Some(before),
                None,
            );
            (removed, Self::subscriber_snapshot(&state))
        };
        removed.clear_lock();

        debug!(content_id = %content_id, worker_id = %worker_id, "Content deleted");
        self.notify(&subscribers, WhiteboardEventKind::ContentDeleted, worker_id, Some(removed));
        Ok(true)
    }

    /// Locks an item for exclusive editing.
    ///
    /// # Returns
    /// `Ok(true)` if the caller holds the lock afterwards, `Ok(false)` if
    /// another worker holds a live lock.
    pub fn lock_content(&self, worker_id: &str, content_id: &str) -> Result<bool> {
        let now = Utc::now();
        let (content, subscribers) = {
            let mut state = self.state.write().map_err(poisoned)?;
            let Some(content) = state.contents.get_mut(content_id) else {
                return Err(CoordinationError::not_found("content", content_id));
            };
            if content.is_locked && content.locked_by.as_deref() == Some(worker_id) {
                return Ok(true);
            }
            if content.blocked_for(worker_id, now, self.lock_timeout) {
                return Ok(false);
            }
            content.is_locked = true;
            content.locked_by = Some(worker_id.to_string());
            content.locked_at = Some(now);
            let locked = content.clone();
            state.last_activity = Some(now);
            (locked, Self::subscriber_snapshot(&state))
        };

        debug!(content_id = %content_id, worker_id = %worker_id, "Content locked");
        self.notify(&subscribers, WhiteboardEventKind::ContentLocked, worker_id, Some(content));
        Ok(true)
    }

    /// Releases the caller's lock on an item.
    ///
    /// # Returns
    /// `Ok(false)` if the item is not locked by the caller.
    pub fn unlock_content(&self, worker_id: &str, content_id: &str) -> Result<bool> {
        let (content, subscribers) = {
            let mut state = self.state.write().map_err(poisoned)?;
            let Some(content) = state.contents.get_mut(content_id) else {
                return Err(CoordinationError::not_found("content", content_id));
            };
            if !content.is_locked || content.locked_by.as_deref() != Some(worker_id) {
                return Ok(false);
            }
            content.clear_lock();
            let unlocked = content.clone();
            state.last_activity = Some(Utc::now());
            (unlocked, Self::subscriber_snapshot(&state))
        };

        debug!(content_id = %content_id, worker_id = %worker_id, "Content unlocked");
        self.notify(&subscribers, WhiteboardEventKind::ContentUnlocked, worker_id, Some(content));
        Ok(true)
    }

    /// Clears locks older than the lock timeout.
    ///
    /// # Returns
    /// Number of locks released.
    pub fn release_expired_locks(&self) -> Result<usize> {
        let now = Utc::now();
        let mut state = self.state.write().map_err(poisoned)?;
        let mut released = 0;
        for content in state.contents.values_mut() {
            if content.is_locked && content.lock_expired(now, self.lock_timeout) {
                content.clear_lock();
                released += 1;
            }
        }
        if released > 0 {
            info!(whiteboard_id = %self.whiteboard_id, released, "Released expired content locks");
        }
        Ok(released)
    }

    /// Removes every item.
    ///
    /// # Returns
    /// `Ok(false)` if any item is locked by another worker.
    pub fn clear_whiteboard(&self, worker_id: &str) -> Result<bool> {
        let now = Utc::now();
        let subscribers = {
            let mut state = self.state.write().map_err(poisoned)?;
            if state.contents.values().any(|c| c.blocked_for(worker_id, now, self.lock_timeout)) {
                return Ok(false);
            }
            let cleared = state.contents.len();
            state.contents.clear();
            self.record_change(
                &mut state,
                CLEAR_TARGET,
                ChangeOperation::Delete,
                worker_id,
                Some(json!({ "cleared_items": cleared })),
                None,
            );
            Self::subscriber_snapshot(&state)
        };

        info!(whiteboard_id = %self.whiteboard_id, worker_id = %worker_id, "Whiteboard cleared");
        self.notify(&subscribers, WhiteboardEventKind::WhiteboardCleared, worker_id, None);
        Ok(true)
    }

    pub fn get_content(&self, content_id: &str) -> Result<Option<WhiteboardContent>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state.contents.get(content_id).cloned())
    }

    /// Returns items matching the optional filters, oldest first.
    pub fn all_content(
        &self,
        content_type: Option<ContentType>,
        created_by: Option<&str>,
    ) -> Result<Vec<WhiteboardContent>> {
        let state = self.state.read().map_err(poisoned)?;
        let mut items: Vec<WhiteboardContent> = state
            .contents
            .values()
            .filter(|c| content_type.is_none_or(|t| c.content_type == t))
            .filter(|c| created_by.is_none_or(|w| c.created_by == w))
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            a.created_at.cmp(&b.created_at).then_with(|| a.content_id.cmp(&b.content_id))
        });
        Ok(items)
    }

    /// Returns recorded changes, newest first.
    pub fn change_history(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
        content_id: Option<&str>,
    ) -> Result<Vec<ContentChange>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(state
            .history
            .iter()
            .rev()
            .filter(|c| since.is_none_or(|since| c.timestamp >= since))
            .filter(|c| content_id.is_none_or(|id| c.content_id == id))
            .take(limit)
            .cloned()
            .collect())
    }

    /// Registers a callback for board events, replacing any previous one.
    pub fn subscribe(&self, worker_id: &str, callback: Callback<WhiteboardEvent>) -> Result<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        state.subscribers.insert(worker_id.to_string(), callback);
        Ok(())
    }

    pub fn unsubscribe(&self, worker_id: &str) -> Result<bool> {
        let mut state = self.state.write().map_err(poisoned)?;
        Ok(state.subscribers.remove(worker_id).is_some())
    }

    pub fn statistics(&self) -> Result<WhiteboardStatistics> {
        let state = self.state.read().map_err(poisoned)?;
        let mut content_by_type = BTreeMap::new();
        for content in state.contents.values() {
            *content_by_type.entry(content.content_type.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(WhiteboardStatistics {
            whiteboard_id: self.whiteboard_id.clone(),
            name: self.name.clone(),
            total_content: state.contents.len(),
            content_by_type,
            locked_content: state.contents.values().filter(|c| c.is_locked).count(),
            total_changes: state.history.len(),
            subscribers: state.subscribers.len(),
            created_at: self.created_at,
            last_activity: state.last_activity,
        })
    }

    /// Exports the board and its items as JSON.
    pub fn export_json(&self) -> Result<Value> {
        let contents = self.all_content(None, None)?;
        let total_changes = self.state.read().map_err(poisoned)?.history.len();
        Ok(json!({
            "whiteboard_id": self.whiteboard_id,
            "name": self.name,
            "created_by": self.created_by,
            "created_at": self.created_at,
            "exported_at": Utc::now(),
            "contents": serde_json::to_value(&contents)?,
            "total_changes": total_changes,
        }))
    }

    fn record_change(
        &self,
        state: &mut BoardState,
        content_id: &str,
        operation: ChangeOperation,
        worker_id: &str,
        before: Option<Value>,
        after: Option<Value>,
    ) {
        let timestamp = Utc::now();
        if state.history.len() >= self.max_history {
            state.history.pop_front();
        }
        state.history.push_back(ContentChange {
            change_id: uuid::Uuid::new_v4().to_string(),
            content_id: content_id.to_string(),
            operation,
            worker_id: worker_id.to_string(),
            timestamp,
            before,
            after,
        });
        state.last_activity = Some(timestamp);
    }

    fn subscriber_snapshot(state: &BoardState) -> Vec<(String, Callback<WhiteboardEvent>)> {
        state.subscribers.iter().map(|(id, cb)| (id.clone(), cb.clone())).collect()
    }

    fn notify(
        &self,
        subscribers: &[(String, Callback<WhiteboardEvent>)],
        kind: WhiteboardEventKind,
        worker_id: &str,
        content: Option<WhiteboardContent>,
    ) {
        if subscribers.is_empty() {
            return;
        }
        let event = WhiteboardEvent {
            kind,
            whiteboard_id: self.whiteboard_id.clone(),
            worker_id: worker_id.to_string(),
            content_id: content.as_ref().map(|c| c.content_id.clone()),
            content,
            timestamp: Utc::now(),
        };
        notify::fan_out("shared_whiteboard", subscribers, &event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::callback;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn board() -> SharedWhiteboard {
        SharedWhiteboard::new("wb", "Board", "owner", &WhiteboardConfig::default())
    }

    fn note(id: &str) -> NewContent {
        NewContent::new(ContentType::Note).with_id(id).with_data("text", json!("hello"))
    }

    #[test]
    fn test_add_and_get_content() {
        let wb = board();
        let id = wb.add_content("alice", note("n1")).unwrap();
        assert_eq!(id, "n1");

        let content = wb.get_content("n1").unwrap().unwrap();
        assert_eq!(content.version, 1);
        assert_eq!(content.created_by, "alice");
        assert_eq!(wb.change_history(10, None, None).unwrap()[0].operation, ChangeOperation::Create);
    }

    #[test]
    fn test_duplicate_content_id_rejected() {
        let wb = board();
        wb.add_content("alice", note("n1")).unwrap();
        let err = wb.add_content("bob", note("n1")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Conflict);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let wb = board();
        let a = wb.add_content("alice", NewContent::new(ContentType::Text)).unwrap();
        let b = wb.add_content("alice", NewContent::new(ContentType::Text)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_update_increments_version_and_records_move() {
        let wb = board();
        wb.add_content("alice", note("n1")).unwrap();
        assert!(
            wb.update_content("bob", "n1", ContentUpdate::move_to(Position { x: 5.0, y: 6.0, z: 0.0 }))
                .unwrap()
        );

        let content = wb.get_content("n1").unwrap().unwrap();
        assert_eq!(content.version, 2);
        assert_eq!(content.last_modified_by, "bob");
        assert!((content.position.x - 5.0).abs() < f64::EPSILON);
        let latest = &wb.change_history(1, None, Some("n1")).unwrap()[0];
        assert_eq!(latest.operation, ChangeOperation::Move);
        assert!(latest.before.is_some() && latest.after.is_some());
    }

    #[test]
    fn test_update_unknown_content_is_not_found() {
        let wb = board();
        let err = wb.update_content("alice", "nope", ContentUpdate::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn test_lock_blocks_other_workers() {
        let wb = board();
        wb.add_content("alice", note("n1")).unwrap();
        assert!(wb.lock_content("alice", "n1").unwrap());
        assert!(wb.lock_content("alice", "n1").unwrap());
        assert!(!wb.lock_content("bob", "n1").unwrap());

        let update = ContentUpdate::default().with_data("text", json!("bob was here"));
        assert!(!wb.update_content("bob", "n1", update.clone()).unwrap());
        assert!(!wb.delete_content("bob", "n1").unwrap());
        assert!(wb.update_content("alice", "n1", update).unwrap());

        assert!(!wb.unlock_content("bob", "n1").unwrap());
        assert!(wb.unlock_content("alice", "n1").unwrap());
        assert!(wb.lock_content("bob", "n1").unwrap());
    }

    #[test]
    fn test_lock_unknown_content_is_not_found() {
        let wb = board();
        assert!(wb.lock_content("alice", "ghost").is_err());
    }

    #[test]
    fn test_expired_lock_can_be_taken_over() {
        let config = WhiteboardConfig { lock_timeout_secs: 0, ..WhiteboardConfig::default() };
        let wb = SharedWhiteboard::new("wb", "Board", "owner", &config);
        wb.add_content("alice", note("n1")).unwrap();
        assert!(wb.lock_content("alice", "n1").unwrap());
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert!(wb.lock_content("bob", "n1").unwrap());
        assert_eq!(wb.get_content("n1").unwrap().unwrap().locked_by.as_deref(), Some("bob"));
    }

    #[test]
    fn test_release_expired_locks() {
        let config = WhiteboardConfig { lock_timeout_secs: 0, ..WhiteboardConfig::default() };
        let wb = SharedWhiteboard::new("wb", "Board", "owner", &config);
        wb.add_content("alice", note("n1")).unwrap();
        wb.lock_content("alice", "n1").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert_eq!(wb.release_expired_locks().unwrap(), 1);
        assert!(!wb.get_content("n1").unwrap().unwrap().is_locked);
    }

    #[test]
    fn test_clear_respects_foreign_locks() {
        let wb = board();
        wb.add_content("alice", note("n1")).unwrap();
        wb.add_content("alice", note("n2")).unwrap();
        wb.lock_content("alice", "n1").unwrap();

        assert!(!wb.clear_whiteboard("bob").unwrap());
        assert!(wb.clear_whiteboard("alice").unwrap());
        assert!(wb.all_content(None, None).unwrap().is_empty());

        let latest = &wb.change_history(1, None, None).unwrap()[0];
        assert_eq!(latest.content_id, "all");
        assert_eq!(latest.operation, ChangeOperation::Delete);
    }

    #[test]
    fn test_subscribers_receive_events_including_actor() {
        let wb = board();
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&kinds);
        wb.subscribe(
            "alice",
            callback(move |event: &WhiteboardEvent| {
                sink.lock().unwrap().push(event.kind);
                Ok(())
            }),
        )
        .unwrap();

        wb.add_content("alice", note("n1")).unwrap();
        wb.lock_content("alice", "n1").unwrap();
        wb.delete_content("alice", "n1").unwrap();

        assert_eq!(
            *kinds.lock().unwrap(),
            vec![
                WhiteboardEventKind::ContentAdded,
                WhiteboardEventKind::ContentLocked,
                WhiteboardEventKind::ContentDeleted,
            ]
        );
    }

    #[test]
    fn test_failing_subscriber_does_not_block_others() {
        let wb = board();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        wb.subscribe("broken", callback(|_: &WhiteboardEvent| anyhow::bail!("boom"))).unwrap();
        wb.subscribe(
            "healthy",
            callback(move |_: &WhiteboardEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();

        wb.add_content("alice", note("n1")).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_reenter_board() {
        let wb = Arc::new(board());
        let inner = Arc::clone(&wb);
        wb.subscribe(
            "reader",
            callback(move |_: &WhiteboardEvent| {
                inner.statistics()?;
                Ok(())
            }),
        )
        .unwrap();
        wb.add_content("alice", note("n1")).unwrap();
    }

    #[test]
    fn test_filters_and_statistics() {
        let wb = board();
        wb.add_content("alice", note("n1")).unwrap();
        wb.add_content("bob", NewContent::new(ContentType::Shape)).unwrap();
        wb.lock_content("alice", "n1").unwrap();

        assert_eq!(wb.all_content(Some(ContentType::Note), None).unwrap().len(), 1);
        assert_eq!(wb.all_content(None, Some("bob")).unwrap().len(), 1);

        let stats = wb.statistics().unwrap();
        assert_eq!(stats.total_content, 2);
        assert_eq!(stats.locked_content, 1);
        assert_eq!(stats.content_by_type["shape"], 1);

        let export = wb.export_json().unwrap();
        assert_eq!(export["contents"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_history_is_bounded() {
        let config = WhiteboardConfig { max_history: 3, ..WhiteboardConfig::default() };
        let wb = SharedWhiteboard::new("wb", "Board", "owner", &config);
        for i in 0..5 {
            wb.add_content("alice", note(&format!("n{}", i))).unwrap();
        }
        let history = wb.change_history(10, None, None).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content_id, "n4");
    }
}
