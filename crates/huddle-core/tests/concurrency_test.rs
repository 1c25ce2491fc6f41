//! Concurrent access to shared resources from many worker threads.

use std::sync::Arc;
use std::thread;

use huddle_core::config::{FileSystemConfig, WhiteboardConfig};
use huddle_core::filesystem::{FilePermission, LockType};
use huddle_core::registry::WorkerInfo;
use huddle_core::space::ParticipantRole;
use huddle_core::whiteboard::{ContentType, ContentUpdate, NewContent};
use huddle_core::{SharedFileSystem, SharedWhiteboard, SpaceManager, WorkerRegistry};
use serde_json::json;

const WORKERS: usize = 8;

#[test]
fn test_concurrent_whiteboard_updates_bump_version_once_each() {
    let board = Arc::new(SharedWhiteboard::new("wb", "Board", "w0", &WhiteboardConfig::default()));
    let id = board.add_content("w0", NewContent::new(ContentType::Text).with_id("note")).unwrap();

    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let board = Arc::clone(&board);
            let id = id.clone();
            thread::spawn(move || {
                for step in 0..10 {
                    let update = ContentUpdate::default().with_data("text", json!(format!("{i}-{step}")));
                    assert!(board.update_content(&format!("w{i}"), &id, update).unwrap());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let content = board.get_content(&id).unwrap().unwrap();
    assert_eq!(content.version, 1 + (WORKERS as u64) * 10);
}

#[test]
fn test_only_one_worker_wins_a_content_lock() {
    let board = Arc::new(SharedWhiteboard::new("wb", "Board", "w0", &WhiteboardConfig::default()));
    let id = board.add_content("w0", NewContent::new(ContentType::Shape)).unwrap();

    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let board = Arc::clone(&board);
            let id = id.clone();
            thread::spawn(move || board.lock_content(&format!("w{i}"), &id).unwrap())
        })
        .collect();
    let winners = handles.into_iter().map(|h| h.join().unwrap()).filter(|won| *won).count();

    assert_eq!(winners, 1);
}

#[test]
fn test_only_one_worker_wins_a_write_lock() {
    let files = Arc::new(SharedFileSystem::new("space", &FileSystemConfig::default()));
    files.create_file("owner", "plan.md", "# Plan").unwrap();
    for i in 0..WORKERS {
        files.grant_permission("owner", "plan.md", &format!("w{i}"), FilePermission::Write).unwrap();
    }

    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let files = Arc::clone(&files);
            thread::spawn(move || {
                files.lock_file(&format!("w{i}"), "plan.md", LockType::Write, None).unwrap()
            })
        })
        .collect();
    let winners = handles.into_iter().map(|h| h.join().unwrap()).filter(|won| *won).count();

    assert_eq!(winners, 1);
}

#[test]
fn test_concurrent_file_updates_keep_every_version() {
    let files = Arc::new(SharedFileSystem::new("space", &FileSystemConfig::default()));
    files.create_file("owner", "log.txt", "start").unwrap();
    for i in 0..WORKERS {
        files.grant_permission("owner", "log.txt", &format!("w{i}"), FilePermission::Write).unwrap();
    }

    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let files = Arc::clone(&files);
            thread::spawn(move || {
                files.update_file(&format!("w{i}"), "log.txt", &format!("entry {i}"), None).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(files.file_history("log.txt").unwrap().len(), WORKERS + 1);
}

#[test]
fn test_concurrent_registration_and_participation() {
    let registry = Arc::new(WorkerRegistry::new());
    let spaces = Arc::new(SpaceManager::new(WhiteboardConfig::default(), FileSystemConfig::default()));
    let space = spaces.create_space("Shared", "owner", None, Some("shared")).unwrap();

    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let registry = Arc::clone(&registry);
            let space = Arc::clone(&space);
            thread::spawn(move || {
                let id = format!("w{i}");
                registry.register(&id, WorkerInfo::new(&id, "Worker"), None).unwrap();
                space.add_participant(&id, &id, "executor", ParticipantRole::Participant, None).unwrap()
            })
        })
        .collect();
    let joined = handles.into_iter().map(|h| h.join().unwrap()).filter(|added| *added).count();

    assert_eq!(joined, WORKERS);
    assert_eq!(registry.count().unwrap(), WORKERS);
    assert_eq!(space.participants(false).unwrap().len(), WORKERS + 1);
}
