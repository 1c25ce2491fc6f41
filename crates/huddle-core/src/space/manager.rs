//! Creates and tracks collaborative spaces.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{info, warn};

use super::{CollaborativeSpace, ParticipantRole, SpaceState};
use crate::config::{FileSystemConfig, WhiteboardConfig};
use crate::error::{CoordinationError, Result, poisoned};

/// Aggregate statistics across spaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpaceManagerStatistics {
    pub total_spaces_created: u64,
    pub total_spaces: usize,
    pub active_spaces: usize,
    pub total_participants: usize,
    pub total_messages: usize,
}

#[derive(Default)]
struct ManagerState {
    spaces: HashMap<String, Arc<CollaborativeSpace>>,
    total_created: u64,
}

/// Registry of every collaborative space of a server.
pub struct SpaceManager {
    whiteboard_config: WhiteboardConfig,
    filesystem_config: FileSystemConfig,
    state: RwLock<ManagerState>,
}

impl fmt::Debug for SpaceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpaceManager").finish_non_exhaustive()
    }
}

impl Default for SpaceManager {
    fn default() -> Self {
        Self::new(WhiteboardConfig::default(), FileSystemConfig::default())
    }
}

impl SpaceManager {
    /// Creates a manager whose spaces build resources from the given configs.
    pub fn new(whiteboard_config: WhiteboardConfig, filesystem_config: FileSystemConfig) -> Self {
        Self { whiteboard_config, filesystem_config, state: RwLock::new(ManagerState::default()) }
    }

    /// Creates a space and adds its creator as owner.
    ///
    /// # Arguments
    /// * `space_id` - Caller-chosen id; a UUID is allocated when `None`
    ///
    /// # Errors
    /// `AlreadyExists` if `space_id` is taken.
    pub fn create_space(
        &self,
        name: &str,
        created_by: &str,
        description: Option<&str>,
        space_id: Option<&str>,
    ) -> Result<Arc<CollaborativeSpace>> {
        let space_id = space_id.map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);
        let mut state = self.state.write().map_err(poisoned)?;
        if state.spaces.contains_key(&space_id) {
            return Err(CoordinationError::AlreadyExists { entity: "space", id: space_id });
        }

        let space = Arc::new(CollaborativeSpace::new(
            space_id.clone(),
            name,
            created_by,
            description.unwrap_or_default(),
            self.whiteboard_config.clone(),
            self.filesystem_config.clone(),
        ));
        let owner_name = format!("Worker-{}", created_by.chars().take(8).collect::<String>());
        space.add_participant(created_by, &owner_name, "unknown", ParticipantRole::Owner, None)?;

        state.spaces.insert(space_id.clone(), Arc::clone(&space));
        state.total_created += 1;
        info!(space_id = %space_id, name = %name, worker_id = %created_by, "Space created");
        Ok(space)
    }

    pub fn get_space(&self, space_id: &str) -> Result<Option<Arc<CollaborativeSpace>>> {
        Ok(self.state.read().map_err(poisoned)?.spaces.get(space_id).cloned())
    }

    /// Lists spaces, oldest first.
    pub fn list_spaces(&self, active_only: bool) -> Result<Vec<Arc<CollaborativeSpace>>> {
        let spaces: Vec<Arc<CollaborativeSpace>> =
            self.state.read().map_err(poisoned)?.spaces.values().cloned().collect();
        let mut listed = Vec::with_capacity(spaces.len());
        for space in spaces {
            if !active_only || space.state()? == SpaceState::Active {
                listed.push(space);
            }
        }
        listed.sort_by_key(|s| s.created_at());
        Ok(listed)
    }

    /// Closes a space. The space stays listed in its closed state.
    ///
    /// # Returns
    /// `false` if the space is unknown or already closed.
    pub fn close_space(&self, space_id: &str) -> Result<bool> {
        let Some(space) = self.get_space(space_id)? else {
            return Ok(false);
        };
        if space.state()? == SpaceState::Closed {
            return Ok(false);
        }
        space.close()?;
        Ok(true)
    }

    /// Closes every open space. Failures are logged and skipped.
    ///
    /// # Returns
    /// Number of spaces closed.
    pub fn close_all(&self) -> Result<usize> {
        let ids: Vec<String> = self.state.read().map_err(poisoned)?.spaces.keys().cloned().collect();
        let mut closed = 0;
        for space_id in ids {
            match self.close_space(&space_id) {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(e) => warn!(space_id = %space_id, error = %e, "Failed to close space"),
            }
        }
        Ok(closed)
    }

    /// Spaces the worker participates in.
    pub fn spaces_for_worker(&self, worker_id: &str) -> Result<Vec<Arc<CollaborativeSpace>>> {
        let mut spaces = Vec::new();
        for space in self.list_spaces(false)? {
            if space.is_participant(worker_id)? {
                spaces.push(space);
            }
        }
        Ok(spaces)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.state.read().map_err(poisoned)?.spaces.len())
    }

    pub fn statistics(&self) -> Result<SpaceManagerStatistics> {
        let (spaces, total_spaces_created) = {
            let state = self.state.read().map_err(poisoned)?;
            (state.spaces.values().cloned().collect::<Vec<_>>(), state.total_created)
        };
        let mut stats = SpaceManagerStatistics {
            total_spaces_created,
            total_spaces: spaces.len(),
            active_spaces: 0,
            total_participants: 0,
            total_messages: 0,
        };
        for space in spaces {
            let space_stats = space.statistics()?;
            if space_stats.state == SpaceState::Active {
                stats.active_spaces += 1;
            }
            stats.total_participants += space_stats.active_participants;
            stats.total_messages += space_stats.total_messages;
        }
        Ok(stats)
    }
}
