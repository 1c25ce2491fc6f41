//! Shared file system: versioned, permissioned and lockable text documents.
//!
//! Every file keeps an append-only list of versions. Permissions are per
//! worker and per file. Locks are either one exclusive writer or any number
//! of shared readers, each with an expiry.

mod file;

pub use file::{FileInfo, FileLock, FilePermission, FileVersion, LockLease, LockType};

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::FileSystemConfig;
use crate::error::{CoordinationError, Result, poisoned};
use file::SharedFile;

/// File system statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSystemStatistics {
    pub space_id: String,
    pub total_files: usize,
    pub total_versions: usize,
    pub locked_files: usize,
    pub total_size_bytes: usize,
    pub active_locks: usize,
}

/// Document store shared by the participants of a space.
pub struct SharedFileSystem {
    space_id: String,
    default_lock_timeout: Duration,
    files: RwLock<HashMap<String, SharedFile>>,
}

impl fmt::Debug for SharedFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedFileSystem").field("space_id", &self.space_id).finish_non_exhaustive()
    }
}

fn validate_filename(filename: &str) -> Result<()> {
    if filename.trim().is_empty() {
        return Err(CoordinationError::invalid_input("filename", "must not be empty"));
    }
    if filename.contains('/') || filename.contains('\\') {
        return Err(CoordinationError::invalid_input(
            "filename",
            format!("'{}' must not contain path separators", filename),
        ));
    }
    Ok(())
}

fn require(file: &SharedFile, worker_id: &str, permission: FilePermission) -> Result<()> {
    if file.has_permission(worker_id, permission) {
        Ok(())
    } else {
        Err(CoordinationError::PermissionDenied {
            worker_id: worker_id.to_string(),
            resource: file.filename.clone(),
            permission: permission.to_string(),
        })
    }
}

fn lock_conflict(file: &SharedFile, worker_id: &str) -> Result<()> {
    match file.lock.foreign_holder(worker_id) {
        Some(holder) => Err(CoordinationError::LockConflict {
            resource: file.filename.clone(),
            holder: holder.to_string(),
            requested_by: worker_id.to_string(),
        }),
        None => Ok(()),
    }
}

impl SharedFileSystem {
    /// Creates an empty file system for a space.
    pub fn new(space_id: impl Into<String>, config: &FileSystemConfig) -> Self {
        Self {
            space_id: space_id.into(),
            default_lock_timeout: Duration::from_secs(config.lock_timeout_secs),
            files: RwLock::new(HashMap::new()),
        }
    }

    pub fn space_id(&self) -> &str {
        &self.space_id
    }

    /// Creates a file. The creator receives every permission.
    ///
    /// # Errors
    /// `InvalidInput` for empty names or names with path separators,
    /// `AlreadyExists` if the name is taken.
    pub fn create_file(&self, worker_id: &str, filename: &str, content: &str) -> Result<FileVersion> {
        validate_filename(filename)?;
        let mut files = self.files.write().map_err(poisoned)?;
        if files.contains_key(filename) {
            return Err(CoordinationError::AlreadyExists { entity: "file", id: filename.to_string() });
        }

        let version = FileVersion::new(content.to_string(), worker_id, None);
        files.insert(filename.to_string(), SharedFile::new(filename, worker_id, version.clone()));

        debug!(space_id = %self.space_id, filename = %filename, worker_id = %worker_id, "File created");
        Ok(version)
    }

    /// Reads the current version, or a specific one.
    pub fn read_file(
        &self,
        filename: &str,
        worker_id: &str,
        version_id: Option<&str>,
    ) -> Result<FileVersion> {
        let files = self.files.read().map_err(poisoned)?;
        let file = files.get(filename).ok_or_else(|| CoordinationError::not_found("file", filename))?;
        require(file, worker_id, FilePermission::Read)?;

        let version = match version_id {
            Some(id) => file.versions.iter().find(|v| v.version_id == id),
            None => file.current(),
        };
        version.cloned().ok_or_else(|| {
            CoordinationError::not_found("file version", version_id.unwrap_or(filename))
        })
    }

    /// Appends a new version.
    ///
    /// # Errors
    /// `PermissionDenied` without `Write`, `LockConflict` if another worker
    /// holds any unexpired lock on the file.
    pub fn update_file(
        &self,
        worker_id: &str,
        filename: &str,
        content: &str,
        comment: Option<&str>,
    ) -> Result<FileVersion> {
        let now = Utc::now();
        let mut files = self.files.write().map_err(poisoned)?;
        let file =
            files.get_mut(filename).ok_or_else(|| CoordinationError::not_found("file", filename))?;
        require(file, worker_id, FilePermission::Write)?;
        file.lock.prune(now);
        lock_conflict(file, worker_id)?;

        let version = FileVersion::new(content.to_string(), worker_id, comment.map(str::to_string));
        file.versions.push(version.clone());
        file.last_modified_by = worker_id.to_string();
        file.last_modified_at = version.created_at;

        debug!(
            filename = %filename,
            worker_id = %worker_id,
            versions = file.versions.len(),
            "File updated"
        );
        Ok(version)
    }

    /// Deletes a file and its history.
    pub fn delete_file(&self, worker_id: &str, filename: &str) -> Result<()> {
        let now = Utc::now();
        let mut files = self.files.write().map_err(poisoned)?;
        let file =
            files.get_mut(filename).ok_or_else(|| CoordinationError::not_found("file", filename))?;
        require(file, worker_id, FilePermission::Delete)?;
        file.lock.prune(now);
        lock_conflict(file, worker_id)?;

        files.remove(filename);
        info!(space_id = %self.space_id, filename = %filename, worker_id = %worker_id, "File deleted");
        Ok(())
    }

    /// Names of the files a worker can read, sorted.
    pub fn list_files(&self, worker_id: &str) -> Result<Vec<String>> {
        let files = self.files.read().map_err(poisoned)?;
        let mut names: Vec<String> = files
            .values()
            .filter(|f| f.has_permission(worker_id, FilePermission::Read))
            .map(|f| f.filename.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Versions of a file, newest first.
    pub fn file_history(&self, filename: &str) -> Result<Vec<FileVersion>> {
        let files = self.files.read().map_err(poisoned)?;
        let file = files.get(filename).ok_or_else(|| CoordinationError::not_found("file", filename))?;
        Ok(file.versions.iter().rev().cloned().collect())
    }

    /// Takes a lock.
    ///
    /// # Returns
    /// `Ok(false)` if the lock conflicts with another worker's lock.
    pub fn lock_file(
        &self,
        worker_id: &str,
        filename: &str,
        lock_type: LockType,
        timeout: Option<Duration>,
    ) -> Result<bool> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(timeout.unwrap_or(self.default_lock_timeout))
            .unwrap_or(chrono::Duration::MAX);
        let lease = file::LockLease {
            acquired_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(chrono::DateTime::<Utc>::MAX_UTC),
        };

        let mut files = self.files.write().map_err(poisoned)?;
        let file =
            files.get_mut(filename).ok_or_else(|| CoordinationError::not_found("file", filename))?;
        require(file, worker_id, lock_type.required_permission())?;
        file.lock.prune(now);

        let (granted, replacement) = match (&mut file.lock, lock_type) {
            (FileLock::Unlocked, LockType::Write) => {
                (true, Some(FileLock::Exclusive { holder: worker_id.to_string(), lease }))
            }
            (FileLock::Unlocked, LockType::Read) => {
                let readers = std::iter::once((worker_id.to_string(), lease)).collect();
                (true, Some(FileLock::Shared { readers }))
            }
            (FileLock::Exclusive { holder, lease: held }, _) if holder.as_str() == worker_id => {
                *held = lease;
                (true, None)
            }
            (FileLock::Exclusive { .. }, _) => (false, None),
            (FileLock::Shared { readers }, LockType::Read) => {
                readers.insert(worker_id.to_string(), lease);
                (true, None)
            }
            (FileLock::Shared { readers }, LockType::Write) => {
                if readers.keys().all(|reader| reader == worker_id) {
                    (true, Some(FileLock::Exclusive { holder: worker_id.to_string(), lease }))
                } else {
                    (false, None)
                }
            }
        };
        if let Some(replacement) = replacement {
            file.lock = replacement;
        }

        debug!(filename = %filename, worker_id = %worker_id, ?lock_type, granted, "Lock requested");
        Ok(granted)
    }

    /// Releases the caller's lock.
    ///
    /// # Returns
    /// `Ok(false)` if the caller holds no lock on the file.
    pub fn unlock_file(&self, worker_id: &str, filename: &str) -> Result<bool> {
        let mut files = self.files.write().map_err(poisoned)?;
        let file =
            files.get_mut(filename).ok_or_else(|| CoordinationError::not_found("file", filename))?;

        let released = match &mut file.lock {
            FileLock::Unlocked => false,
            FileLock::Exclusive { holder, .. } => holder.as_str() == worker_id,
            FileLock::Shared { readers } => readers.remove(worker_id).is_some(),
        };
        let now_empty = match &file.lock {
            FileLock::Exclusive { .. } => released,
            FileLock::Shared { readers } => readers.is_empty(),
            FileLock::Unlocked => false,
        };
        if now_empty {
            file.lock = FileLock::Unlocked;
        }
        Ok(released)
    }

    /// Grants a permission. The granter needs `Admin`.
    pub fn grant_permission(
        &self,
        admin_id: &str,
        filename: &str,
        target_id: &str,
        permission: FilePermission,
    ) -> Result<()> {
        let mut files = self.files.write().map_err(poisoned)?;
        let file =
            files.get_mut(filename).ok_or_else(|| CoordinationError::not_found("file", filename))?;
        require(file, admin_id, FilePermission::Admin)?;
        file.permissions.entry(target_id.to_string()).or_default().insert(permission);
        debug!(filename = %filename, worker_id = %target_id, %permission, "Permission granted");
        Ok(())
    }

    /// Revokes a permission. The revoker needs `Admin`.
    ///
    /// # Returns
    /// `true` if the target held the permission.
    pub fn revoke_permission(
        &self,
        admin_id: &str,
        filename: &str,
        target_id: &str,
        permission: FilePermission,
    ) -> Result<bool> {
        let mut files = self.files.write().map_err(poisoned)?;
        let file =
            files.get_mut(filename).ok_or_else(|| CoordinationError::not_found("file", filename))?;
        require(file, admin_id, FilePermission::Admin)?;
        let Some(granted) = file.permissions.get_mut(target_id) else {
            return Ok(false);
        };
        let revoked = granted.remove(&permission);
        if granted.is_empty() {
            file.permissions.remove(target_id);
        }
        Ok(revoked)
    }

    /// File metadata. Permissions are included only for `Admin` holders.
    pub fn file_info(&self, filename: &str, worker_id: &str) -> Result<FileInfo> {
        let files = self.files.read().map_err(poisoned)?;
        let file = files.get(filename).ok_or_else(|| CoordinationError::not_found("file", filename))?;
        require(file, worker_id, FilePermission::Read)?;

        let mut lock = file.lock.clone();
        lock.prune(Utc::now());
        Ok(FileInfo {
            filename: file.filename.clone(),
            created_by: file.created_by.clone(),
            created_at: file.created_at,
            last_modified_by: file.last_modified_by.clone(),
            last_modified_at: file.last_modified_at,
            current_version_id: file.current().map(|v| v.version_id.clone()).unwrap_or_default(),
            version_count: file.versions.len(),
            size: file.current().map_or(0, |v| v.size),
            lock,
            permissions: file
                .has_permission(worker_id, FilePermission::Admin)
                .then(|| file.permissions.clone()),
        })
    }

    /// Drops expired locks.
    ///
    /// # Returns
    /// Number of leases dropped.
    pub fn release_expired_locks(&self) -> Result<usize> {
        let now = Utc::now();
        let mut files = self.files.write().map_err(poisoned)?;
        let released: usize = files.values_mut().map(|f| f.lock.prune(now)).sum();
        if released > 0 {
            info!(space_id = %self.space_id, released, "Released expired file locks");
        }
        Ok(released)
    }

    pub fn statistics(&self) -> Result<FileSystemStatistics> {
        let files = self.files.read().map_err(poisoned)?;
        let active_locks = files
            .values()
            .map(|f| match &f.lock {
                FileLock::Unlocked => 0,
                FileLock::Exclusive { .. } => 1,
                FileLock::Shared { readers } => readers.len(),
            })
            .sum();
        Ok(FileSystemStatistics {
            space_id: self.space_id.clone(),
            total_files: files.len(),
            total_versions: files.values().map(|f| f.versions.len()).sum(),
            locked_files: files.values().filter(|f| f.lock.is_locked()).count(),
            total_size_bytes: files.values().flat_map(|f| &f.versions).map(|v| v.size).sum(),
            active_locks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn fs() -> SharedFileSystem {
        SharedFileSystem::new("space", &FileSystemConfig::default())
    }

    #[test]
    fn test_create_and_read() {
        let fs = fs();
        let version = fs.create_file("alice", "notes.md", "# Notes").unwrap();
        assert_eq!(version.size, 7);

        let read = fs.read_file("notes.md", "alice", None).unwrap();
        assert_eq!(read.content, "# Notes");
        assert_eq!(read.content_hash, version.content_hash);
    }

    #[test]
    fn test_duplicate_file_rejected() {
        let fs = fs();
        fs.create_file("alice", "a.txt", "one").unwrap();
        let err = fs.create_file("bob", "a.txt", "two").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(fs.read_file("a.txt", "alice", None).unwrap().content, "one");
    }

    #[test]
    fn test_invalid_filenames() {
        let fs = fs();
        for name in ["", "  ", "dir/a.txt", "dir\\a.txt"] {
            let err = fs.create_file("alice", name, "x").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{name:?}");
        }
    }

    #[test]
    fn test_permissions_gate_reads_and_writes() {
        let fs = fs();
        fs.create_file("alice", "a.txt", "v1").unwrap();

        let err = fs.read_file("a.txt", "bob", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);

        fs.grant_permission("alice", "a.txt", "bob", FilePermission::Read).unwrap();
        assert!(fs.read_file("a.txt", "bob", None).is_ok());
        let err = fs.update_file("bob", "a.txt", "v2", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);

        let err = fs.grant_permission("bob", "a.txt", "carol", FilePermission::Read).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);

        assert!(fs.revoke_permission("alice", "a.txt", "bob", FilePermission::Read).unwrap());
        assert!(fs.read_file("a.txt", "bob", None).is_err());
    }

    #[test]
    fn test_versions_accumulate() {
        let fs = fs();
        let first = fs.create_file("alice", "a.txt", "v1").unwrap();
        fs.update_file("alice", "a.txt", "v2", Some("second")).unwrap();
        fs.update_file("alice", "a.txt", "v3", None).unwrap();

        let history = fs.file_history("a.txt").unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "v3");
        assert_eq!(history[1].comment.as_deref(), Some("second"));

        let old = fs.read_file("a.txt", "alice", Some(&first.version_id)).unwrap();
        assert_eq!(old.content, "v1");
        assert!(fs.read_file("a.txt", "alice", Some("missing")).is_err());
    }

    #[test]
    fn test_write_lock_is_exclusive() {
        let fs = fs();
        fs.create_file("alice", "a.txt", "v1").unwrap();
        fs.grant_permission("alice", "a.txt", "bob", FilePermission::Write).unwrap();

        assert!(fs.lock_file("alice", "a.txt", LockType::Write, None).unwrap());
        assert!(fs.lock_file("alice", "a.txt", LockType::Write, None).unwrap());
        assert!(!fs.lock_file("bob", "a.txt", LockType::Write, None).unwrap());
        assert!(!fs.lock_file("bob", "a.txt", LockType::Read, None).unwrap());

        let err = fs.update_file("bob", "a.txt", "v2", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockConflict);
        fs.update_file("alice", "a.txt", "v2", None).unwrap();

        assert!(!fs.unlock_file("bob", "a.txt").unwrap());
        assert!(fs.unlock_file("alice", "a.txt").unwrap());
        fs.update_file("bob", "a.txt", "v3", None).unwrap();
    }

    #[test]
    fn test_read_locks_are_shared_and_block_writers() {
        let fs = fs();
        fs.create_file("alice", "a.txt", "v1").unwrap();
        fs.grant_permission("alice", "a.txt", "bob", FilePermission::Read).unwrap();
        fs.grant_permission("alice", "a.txt", "carol", FilePermission::Write).unwrap();
        fs.grant_permission("alice", "a.txt", "carol", FilePermission::Read).unwrap();

        assert!(fs.lock_file("alice", "a.txt", LockType::Read, None).unwrap());
        assert!(fs.lock_file("bob", "a.txt", LockType::Read, None).unwrap());
        assert!(!fs.lock_file("carol", "a.txt", LockType::Write, None).unwrap());
        assert!(fs.update_file("carol", "a.txt", "v2", None).is_err());

        fs.unlock_file("alice", "a.txt").unwrap();
        fs.unlock_file("bob", "a.txt").unwrap();
        assert!(fs.lock_file("carol", "a.txt", LockType::Write, None).unwrap());
    }

    #[test]
    fn test_lock_requires_permission() {
        let fs = fs();
        fs.create_file("alice", "a.txt", "v1").unwrap();
        let err = fs.lock_file("bob", "a.txt", LockType::Read, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);
    }

    #[test]
    fn test_expired_lock_no_longer_blocks() {
        let fs = fs();
        fs.create_file("alice", "a.txt", "v1").unwrap();
        fs.grant_permission("alice", "a.txt", "bob", FilePermission::Write).unwrap();
        assert!(fs.lock_file("alice", "a.txt", LockType::Write, Some(Duration::ZERO)).unwrap());
        std::thread::sleep(Duration::from_millis(5));

        assert!(fs.lock_file("bob", "a.txt", LockType::Write, None).unwrap());
        assert_eq!(fs.release_expired_locks().unwrap(), 0);
    }

    #[test]
    fn test_file_info_hides_permissions_from_non_admins() {
        let fs = fs();
        fs.create_file("alice", "a.txt", "hello").unwrap();
        fs.grant_permission("alice", "a.txt", "bob", FilePermission::Read).unwrap();

        let admin_view = fs.file_info("a.txt", "alice").unwrap();
        assert_eq!(admin_view.size, 5);
        assert_eq!(admin_view.version_count, 1);
        assert!(admin_view.permissions.is_some());

        let reader_view = fs.file_info("a.txt", "bob").unwrap();
        assert!(reader_view.permissions.is_none());
    }

    #[test]
    fn test_delete_and_list() {
        let fs = fs();
        fs.create_file("alice", "a.txt", "1").unwrap();
        fs.create_file("alice", "b.txt", "2").unwrap();
        fs.create_file("bob", "c.txt", "3").unwrap();
        assert_eq!(fs.list_files("alice").unwrap(), vec!["a.txt", "b.txt"]);

        let err = fs.delete_file("bob", "a.txt").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);
        fs.delete_file("alice", "a.txt").unwrap();
        assert_eq!(fs.list_files("alice").unwrap(), vec!["b.txt"]);

        let stats = fs.statistics().unwrap();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_size_bytes, 2);
    }
}
