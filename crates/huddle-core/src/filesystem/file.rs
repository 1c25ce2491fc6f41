//! Files, versions, permissions and lock state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Per-file permission. `Admin` implies every other permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilePermission {
    Read,
    Write,
    Delete,
    Admin,
}

impl FilePermission {
    /// Every permission; granted to a file's creator.
    pub const ALL: [Self; 4] = [Self::Read, Self::Write, Self::Delete, Self::Admin];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for FilePermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockType {
    /// Shared with other readers.
    Read,
    /// Exclusive.
    Write,
}

impl LockType {
    /// Permission needed to take a lock of this type.
    pub(crate) fn required_permission(self) -> FilePermission {
        match self {
            Self::Read => FilePermission::Read,
            Self::Write => FilePermission::Write,
        }
    }
}

/// Acquisition and expiry times of one lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockLease {
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LockLease {
    pub(crate) fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Lock state of a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum FileLock {
    #[default]
    Unlocked,
    Exclusive { holder: String, lease: LockLease },
    Shared { readers: BTreeMap<String, LockLease> },
}

impl FileLock {
    /// Drops expired leases.
    pub(crate) fn prune(&mut self, now: DateTime<Utc>) -> usize {
        match self {
            Self::Unlocked => 0,
            Self::Exclusive { lease, .. } => {
                if lease.is_expired_at(now) {
                    *self = Self::Unlocked;
                    1
                } else {
                    0
                }
            }
            Self::Shared { readers } => {
                let before = readers.len();
                readers.retain(|_, lease| !lease.is_expired_at(now));
                let pruned = before - readers.len();
                if readers.is_empty() {
                    *self = Self::Unlocked;
                }
                pruned
            }
        }
    }

    /// First lock holder other than `worker_id`, if any.
    pub(crate) fn foreign_holder(&self, worker_id: &str) -> Option<&str> {
        match self {
            Self::Unlocked => None,
            Self::Exclusive { holder, .. } => (holder != worker_id).then_some(holder.as_str()),
            Self::Shared { readers } => {
                readers.keys().find(|reader| *reader != worker_id).map(String::as_str)
            }
        }
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        !matches!(self, Self::Unlocked)
    }
}

/// One immutable version of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileVersion {
    pub version_id: String,
    pub content: String,
    /// Lowercase hex SHA-256 of `content`.
    pub content_hash: String,
    pub author: String,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Content length in bytes.
    pub size: usize,
}

impl FileVersion {
    pub(crate) fn new(content: String, author: &str, comment: Option<String>) -> Self {
        let content_hash = format!("{:x}", Sha256::digest(content.as_bytes()));
        Self {
            version_id: uuid::Uuid::new_v4().to_string(),
            size: content.len(),
            content,
            content_hash,
            author: author.to_string(),
            comment,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct SharedFile {
    pub(crate) filename: String,
    pub(crate) created_by: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) last_modified_by: String,
    pub(crate) last_modified_at: DateTime<Utc>,
    /// Oldest first; never empty.
    pub(crate) versions: Vec<FileVersion>,
    pub(crate) permissions: BTreeMap<String, BTreeSet<FilePermission>>,
    pub(crate) lock: FileLock,
}

impl SharedFile {
    pub(crate) fn new(filename: &str, creator: &str, first: FileVersion) -> Self {
        let now = first.created_at;
        Self {
            filename: filename.to_string(),
            created_by: creator.to_string(),
            created_at: now,
            last_modified_by: creator.to_string(),
            last_modified_at: now,
            versions: vec![first],
            permissions: BTreeMap::from([(
                creator.to_string(),
                FilePermission::ALL.into_iter().collect(),
            )]),
            lock: FileLock::Unlocked,
        }
    }

    pub(crate) fn has_permission(&self, worker_id: &str, permission: FilePermission) -> bool {
        self.permissions.get(worker_id).is_some_and(|granted| {
            granted.contains(&permission) || granted.contains(&FilePermission::Admin)
        })
    }

    pub(crate) fn current(&self) -> Option<&FileVersion> {
        self.versions.last()
    }
}

/// Metadata view of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub filename: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_modified_by: String,
    pub last_modified_at: DateTime<Utc>,
    pub current_version_id: String,
    pub version_count: usize,
    pub size: usize,
    pub lock: FileLock,
    /// Only present for callers holding `Admin`.
    pub permissions: Option<BTreeMap<String, BTreeSet<FilePermission>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(secs: i64) -> LockLease {
        let now = Utc::now();
        LockLease { acquired_at: now, expires_at: now + chrono::Duration::seconds(secs) }
    }

    #[test]
    fn test_version_hash_is_sha256_hex() {
        let version = FileVersion::new("abc".to_string(), "alice", None);
        assert_eq!(
            version.content_hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(version.size, 3);
    }

    #[test]
    fn test_admin_implies_everything() {
        let mut file = SharedFile::new("a.txt", "alice", FileVersion::new(String::new(), "alice", None));
        file.permissions.insert("bob".to_string(), BTreeSet::from([FilePermission::Admin]));
        assert!(file.has_permission("bob", FilePermission::Delete));
        assert!(!file.has_permission("carol", FilePermission::Read));
    }

    #[test]
    fn test_prune_drops_expired_leases() {
        let mut lock = FileLock::Shared {
            readers: BTreeMap::from([("a".to_string(), lease(-1)), ("b".to_string(), lease(60))]),
        };
        assert_eq!(lock.prune(Utc::now()), 1);
        assert_eq!(lock.foreign_holder("a"), Some("b"));

        let mut exclusive = FileLock::Exclusive { holder: "a".to_string(), lease: lease(-1) };
        exclusive.prune(Utc::now());
        assert_eq!(exclusive, FileLock::Unlocked);
    }
}
