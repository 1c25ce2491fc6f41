//! Server lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    /// Not running; the initial state.
    #[default]
    Stopped,
    /// Building components and waiting for the maintenance loop.
    Starting,
    /// Accepting registrations, messages and spaces.
    Running,
    /// Tearing down.
    Stopping,
    /// A start or stop failed. The server may be started again.
    Error,
}

impl ServerState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }

    /// Checks if the server can move to the given state.
    ///
    /// # Arguments
    /// * `to` - The target state
    #[must_use]
    #[allow(clippy::match_same_arms)]
    pub fn can_transition_to(&self, to: Self) -> bool {
        match (self, to) {
            (Self::Stopped | Self::Error, Self::Starting) => true,
            (Self::Starting, Self::Running) => true,
            (Self::Running, Self::Stopping) => true,
            (Self::Stopping, Self::Stopped) => true,
            // Any in-flight transition may fail
            (Self::Starting | Self::Running | Self::Stopping, Self::Error) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            ServerState::Stopped,
            ServerState::Starting,
            ServerState::Running,
            ServerState::Stopping,
            ServerState::Stopped,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_error_is_reachable_and_restartable() {
        assert!(ServerState::Starting.can_transition_to(ServerState::Error));
        assert!(ServerState::Stopping.can_transition_to(ServerState::Error));
        assert!(ServerState::Error.can_transition_to(ServerState::Starting));
        assert!(!ServerState::Stopped.can_transition_to(ServerState::Error));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!ServerState::Stopped.can_transition_to(ServerState::Running));
        assert!(!ServerState::Running.can_transition_to(ServerState::Starting));
        assert!(!ServerState::Running.can_transition_to(ServerState::Running));
        assert_eq!(ServerState::default(), ServerState::Stopped);
    }
}
