//! Participants, roles, permissions and space messages.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sender id used for messages the space posts itself.
pub const SYSTEM_SENDER: &str = "system";

/// Lifecycle state of a space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpaceState {
    Active,
    Paused,
    Archived,
    Closed,
}

impl SpaceState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Archived => "archived",
            Self::Closed => "closed",
        }
    }

    /// Returns `true` if participants, messages and resources may change.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        matches!(self, Self::Active | Self::Paused)
    }
}

impl fmt::Display for SpaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a participant may do in a space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpacePermission {
    ManageParticipants,
    SendMessages,
    AccessWhiteboard,
    AccessFiles,
    ModifySpace,
    CloseSpace,
}

impl SpacePermission {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManageParticipants => "manage_participants",
            Self::SendMessages => "send_messages",
            Self::AccessWhiteboard => "access_whiteboard",
            Self::AccessFiles => "access_files",
            Self::ModifySpace => "modify_space",
            Self::CloseSpace => "close_space",
        }
    }
}

impl fmt::Display for SpacePermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a participant. Each role's permissions include the next one's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Owner,
    Moderator,
    #[default]
    Participant,
    Observer,
}

impl ParticipantRole {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Moderator => "moderator",
            Self::Participant => "participant",
            Self::Observer => "observer",
        }
    }

    /// Permissions granted to the role when none are given explicitly.
    #[must_use]
    pub fn default_permissions(&self) -> BTreeSet<SpacePermission> {
        use SpacePermission::{
            AccessFiles, AccessWhiteboard, CloseSpace, ManageParticipants, ModifySpace,
            SendMessages,
        };
        let granted: &[SpacePermission] = match self {
            Self::Owner => &[
                ManageParticipants,
                SendMessages,
                AccessWhiteboard,
                AccessFiles,
                ModifySpace,
                CloseSpace,
            ],
            Self::Moderator => {
                &[ManageParticipants, SendMessages, AccessWhiteboard, AccessFiles, ModifySpace]
            }
            Self::Participant => &[SendMessages, AccessWhiteboard, AccessFiles],
            Self::Observer => &[AccessWhiteboard, AccessFiles],
        };
        granted.iter().copied().collect()
    }
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A worker's membership in a space.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Participant {
    pub worker_id: String,
    pub worker_name: String,
    pub worker_type: String,
    pub role: ParticipantRole,
    pub permissions: BTreeSet<SpacePermission>,
    pub is_active: bool,
    pub joined_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Participant {
    pub(crate) fn new(
        worker_id: &str,
        worker_name: &str,
        worker_type: &str,
        role: ParticipantRole,
        permissions: Option<BTreeSet<SpacePermission>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            worker_id: worker_id.to_string(),
            worker_name: worker_name.to_string(),
            worker_type: worker_type.to_string(),
            role,
            permissions: permissions.unwrap_or_else(|| role.default_permissions()),
            is_active: true,
            joined_at: now,
            last_activity: now,
        }
    }

    #[must_use]
    pub fn has_permission(&self, permission: SpacePermission) -> bool {
        self.permissions.contains(&permission)
    }
}

/// A message posted in a space. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpaceMessage {
    pub message_id: String,
    pub space_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub message_type: String,
    pub content: Value,
    pub timestamp: DateTime<Utc>,
    pub response_to: Option<String>,
    pub is_system: bool,
}

/// One entry of a space's activity log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEntry {
    pub activity: String,
    pub worker_id: Option<String>,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}
