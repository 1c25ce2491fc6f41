//! Error types for the coordination engine.
//!
//! Every boundary-crossing failure carries a machine-checkable [`ErrorKind`]
//! and a context map so callers can branch without matching on strings.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Coarse classification of a [`CoordinationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Operation attempted in an invalid lifecycle state.
    State,
    /// Unknown worker, space, content, file or message.
    NotFound,
    /// Access without the required grant.
    Permission,
    /// Resource held by another party.
    LockConflict,
    /// Startup or shutdown bound exceeded.
    Timeout,
    /// Delegation target unavailable or its execution failed.
    Delegation,
    /// Resource with the same identity already exists.
    Conflict,
    /// Malformed caller input.
    InvalidInput,
    /// Internal failure (poisoned lock, I/O, serialization).
    Internal,
}

impl ErrorKind {
    /// Returns the string representation of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::State => "state",
            Self::NotFound => "not_found",
            Self::Permission => "permission",
            Self::LockConflict => "lock_conflict",
            Self::Timeout => "timeout",
            Self::Delegation => "delegation",
            Self::Conflict => "conflict",
            Self::InvalidInput => "invalid_input",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the coordination engine.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Operation attempted in a lifecycle state that does not allow it.
    #[error("cannot {operation} in state: {state}")]
    InvalidState {
        /// Name of the attempted operation.
        operation: String,
        /// Current state at the time of the attempt.
        state: String,
    },

    /// Referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind (worker, space, content, file, ...).
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Worker lacks a permission on a resource.
    #[error("worker {worker_id} lacks {permission} permission on {resource}")]
    PermissionDenied {
        /// Worker that attempted the access.
        worker_id: String,
        /// Resource being accessed.
        resource: String,
        /// Permission that was required.
        permission: String,
    },

    /// Resource is locked by another worker.
    #[error("{resource} is locked by {holder} (requested by {requested_by})")]
    LockConflict {
        /// Locked resource.
        resource: String,
        /// Current lock holder.
        holder: String,
        /// Worker whose request was blocked.
        requested_by: String,
    },

    /// Bounded wait elapsed.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// Bound that was exceeded, in milliseconds.
        timeout_ms: u64,
    },

    /// Delegation failed before or during execution.
    #[error("delegation from {from_worker} to {to_worker} failed: {reason}")]
    Delegation {
        /// Delegating worker.
        from_worker: String,
        /// Target worker.
        to_worker: String,
        /// Failure reason.
        reason: String,
    },

    /// Entity with the same identity already exists.
    #[error("{entity} already exists: {id}")]
    AlreadyExists {
        /// Entity kind.
        entity: &'static str,
        /// Conflicting identifier.
        id: String,
    },

    /// A bounded collection is full.
    #[error("{resource} is at capacity ({limit})")]
    CapacityExceeded {
        /// Collection that is full.
        resource: String,
        /// Configured limit.
        limit: usize,
    },

    /// Caller supplied a malformed value.
    #[error("invalid {field}: {reason}")]
    InvalidInput {
        /// Offending field or argument.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Lock poisoned by a panicking thread.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// Configuration could not be loaded or validated.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoordinationError {
    /// Builds an [`InvalidState`](Self::InvalidState) error.
    pub fn invalid_state(operation: impl Into<String>, state: impl fmt::Display) -> Self {
        Self::InvalidState { operation: operation.into(), state: state.to_string() }
    }

    /// Builds a [`NotFound`](Self::NotFound) error.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    /// Builds an [`InvalidInput`](Self::InvalidInput) error.
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput { field: field.into(), reason: reason.into() }
    }

    /// Returns the machine-checkable kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidState { .. } => ErrorKind::State,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::PermissionDenied { .. } => ErrorKind::Permission,
            Self::LockConflict { .. } => ErrorKind::LockConflict,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Delegation { .. } => ErrorKind::Delegation,
            Self::AlreadyExists { .. } | Self::CapacityExceeded { .. } => ErrorKind::Conflict,
            Self::InvalidInput { .. } | Self::Config(_) => ErrorKind::InvalidInput,
            Self::LockPoisoned(_) | Self::Io(_) | Self::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Returns the structured context of this error.
    ///
    /// Keys are stable field names (`operation`, `worker_id`, `resource`, ...).
    #[must_use]
    pub fn context(&self) -> BTreeMap<String, String> {
        let mut context = BTreeMap::new();
        let mut put = |key: &str, value: &str| {
            context.insert(key.to_string(), value.to_string());
        };

        match self {
            Self::InvalidState { operation, state } => {
                put("operation", operation);
                put("state", state);
            }
            Self::NotFound { entity, id } | Self::AlreadyExists { entity, id } => {
                put("entity", entity);
                put("id", id);
            }
            Self::PermissionDenied { worker_id, resource, permission } => {
                put("worker_id", worker_id);
                put("resource", resource);
                put("permission", permission);
            }
            Self::LockConflict { resource, holder, requested_by } => {
                put("resource", resource);
                put("holder", holder);
                put("worker_id", requested_by);
            }
            Self::Timeout { operation, timeout_ms } => {
                put("operation", operation);
                put("timeout_ms", &timeout_ms.to_string());
            }
            Self::Delegation { from_worker, to_worker, reason } => {
                put("operation", "delegate_task");
                put("worker_id", from_worker);
                put("to_worker", to_worker);
                put("reason", reason);
            }
            Self::CapacityExceeded { resource, limit } => {
                put("resource", resource);
                put("limit", &limit.to_string());
            }
            Self::InvalidInput { field, reason } => {
                put("field", field);
                put("reason", reason);
            }
            Self::LockPoisoned(detail) | Self::Config(detail) => put("detail", detail),
            Self::Io(e) => put("detail", &e.to_string()),
            Self::Serialization(e) => put("detail", &e.to_string()),
        }

        context
    }
}

/// Result type for coordination operations.
pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Maps a poisoned-lock error into [`CoordinationError::LockPoisoned`].
pub(crate) fn poisoned<E: fmt::Display>(e: E) -> CoordinationError {
    CoordinationError::LockPoisoned(e.to_string())
}
