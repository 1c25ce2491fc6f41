//! Whiteboard content, change records and notifications.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of visual content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Free text.
    Text,
    /// Freehand drawing.
    Drawing,
    /// Geometric shape.
    Shape,
    /// Embedded image.
    Image,
    /// Structured diagram.
    Diagram,
    /// Sticky note.
    Note,
    /// Flowchart.
    Flowchart,
    /// Mind map.
    Mindmap,
}

impl ContentType {
    /// Returns the string representation of the content type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Drawing => "drawing",
            Self::Shape => "shape",
            Self::Image => "image",
            Self::Diagram => "diagram",
            Self::Note => "note",
            Self::Flowchart => "flowchart",
            Self::Mindmap => "mindmap",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position on the board. `z` orders overlapping items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

/// Width and height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Default for Size {
    fn default() -> Self {
        Self { width: 100.0, height: 100.0 }
    }
}

/// A piece of content on the board.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhiteboardContent {
    pub content_id: String,
    pub content_type: ContentType,
    pub position: Position,
    pub size: Size,
    pub data: Map<String, Value>,
    pub style: Map<String, Value>,
    /// Starts at 1 and grows by one per update.
    pub version: u64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_modified_by: String,
    pub last_modified_at: DateTime<Utc>,
    pub is_locked: bool,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub tags: BTreeSet<String>,
}

impl WhiteboardContent {
    pub(crate) fn clear_lock(&mut self) {
        self.is_locked = false;
        self.locked_by = None;
        self.locked_at = None;
    }

    pub(crate) fn lock_expired(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        self.locked_at.is_some_and(|at| now - at > timeout)
    }

    /// Returns `true` if a live lock held by someone other than `worker_id` exists.
    pub(crate) fn blocked_for(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        timeout: chrono::Duration,
    ) -> bool {
        self.is_locked
            && self.locked_by.as_deref() != Some(worker_id)
            && !self.lock_expired(now, timeout)
    }
}

/// Content to add to a board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewContent {
    /// Caller-chosen id; a UUID is allocated when absent.
    #[serde(default)]
    pub content_id: Option<String>,
    pub content_type: ContentType,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub size: Size,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub style: Map<String, Value>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl NewContent {
    /// Creates content of the given type at the origin with default size.
    pub fn new(content_type: ContentType) -> Self {
        Self {
            content_id: None,
            content_type,
            position: Position::default(),
            size: Size::default(),
            data: Map::new(),
            style: Map::new(),
            tags: BTreeSet::new(),
        }
    }

    /// Uses a caller-chosen id.
    #[must_use]
    pub fn with_id(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    /// Sets the position.
    #[must_use]
    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position { x, y, z: self.position.z };
        self
    }

    /// Adds one data field.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

/// Partial update of a content item. Maps are merged, tags replaced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentUpdate {
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub size: Option<Size>,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    #[serde(default)]
    pub style: Option<Map<String, Value>>,
    #[serde(default)]
    pub tags: Option<BTreeSet<String>>,
}

impl ContentUpdate {
    /// Moves the item.
    #[must_use]
    pub fn move_to(position: Position) -> Self {
        Self { position: Some(position), ..Self::default() }
    }

    /// Merges one data field.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.get_or_insert_with(Map::new).insert(key.into(), value);
        self
    }

    /// The change operation this update is recorded as.
    pub(crate) fn operation(&self) -> ChangeOperation {
        let touched = (
            self.position.is_some(),
            self.size.is_some(),
            self.style.is_some(),
            self.data.is_some() || self.tags.is_some(),
        );
        match touched {
            (true, false, false, false) => ChangeOperation::Move,
            (false, true, false, false) => ChangeOperation::Resize,
            (false, false, true, false) => ChangeOperation::StyleChange,
            _ => ChangeOperation::Update,
        }
    }

    pub(crate) fn apply(self, content: &mut WhiteboardContent) {
        if let Some(position) = self.position {
            content.position = position;
        }
        if let Some(size) = self.size {
            content.size = size;
        }
        if let Some(data) = self.data {
            content.data.extend(data);
        }
        if let Some(style) = self.style {
            content.style.extend(style);
        }
        if let Some(tags) = self.tags {
            content.tags = tags;
        }
    }
}

/// Kind of recorded change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Create,
    Update,
    Delete,
    Move,
    Resize,
    StyleChange,
}

/// One entry of the append-only change history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentChange {
    pub change_id: String,
    /// Affected item, or `"all"` for a clear.
    pub content_id: String,
    pub operation: ChangeOperation,
    pub worker_id: String,
    pub timestamp: DateTime<Utc>,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

/// Kind of board notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WhiteboardEventKind {
    ContentAdded,
    ContentUpdated,
    ContentDeleted,
    ContentLocked,
    ContentUnlocked,
    WhiteboardCleared,
}

/// Notification sent to board subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhiteboardEvent {
    pub kind: WhiteboardEventKind,
    pub whiteboard_id: String,
    pub worker_id: String,
    pub content_id: Option<String>,
    pub content: Option<WhiteboardContent>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_operation_classification() {
        assert_eq!(ContentUpdate::move_to(Position::default()).operation(), ChangeOperation::Move);
        let resize = ContentUpdate { size: Some(Size::default()), ..ContentUpdate::default() };
        assert_eq!(resize.operation(), ChangeOperation::Resize);
        let style = ContentUpdate { style: Some(Map::new()), ..ContentUpdate::default() };
        assert_eq!(style.operation(), ChangeOperation::StyleChange);
        let mixed = ContentUpdate::move_to(Position::default()).with_data("text", json!("x"));
        assert_eq!(mixed.operation(), ChangeOperation::Update);
    }

    #[test]
    fn test_new_content_deserializes_with_defaults() {
        let content: NewContent = serde_json::from_value(json!({ "content_type": "note" })).unwrap();
        assert_eq!(content.content_type, ContentType::Note);
        assert_eq!(content.size, Size::default());
        assert!(content.content_id.is_none());
    }
}
