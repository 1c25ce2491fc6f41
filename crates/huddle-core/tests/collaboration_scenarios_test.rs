//! End-to-end collaboration scenarios against a running server.

use std::sync::{Arc, Mutex};

use huddle_core::error::ErrorKind;
use huddle_core::filesystem::{FilePermission, LockType};
use huddle_core::registry::WorkerInfo;
use huddle_core::space::{ParticipantRole, SpaceMessage};
use huddle_core::whiteboard::{ContentType, ContentUpdate, NewContent, Size};
use huddle_core::{CollaborativeServer, CollaborativeSpace, HuddleConfig, callback};
use serde_json::json;

fn running_server() -> CollaborativeServer {
    let server = CollaborativeServer::new(HuddleConfig::default());
    server.start().unwrap();
    for (id, name) in [("w1", "Planner"), ("w2", "Builder")] {
        server.register_worker(id, WorkerInfo::new(name, "Worker"), None).unwrap();
    }
    server
}

fn space_with_two(server: &CollaborativeServer) -> Arc<CollaborativeSpace> {
    let space = server.create_collaborative_space("Release", "w1", Some("Ship it"), None).unwrap();
    assert!(space.add_participant("w2", "Builder", "developer", ParticipantRole::Participant, None).unwrap());
    space
}

#[test]
fn test_broadcast_reaches_other_participant_once() {
    let server = running_server();
    let space = space_with_two(&server);

    let received: Arc<Mutex<Vec<SpaceMessage>>> = Arc::default();
    let sink = Arc::clone(&received);
    space
        .subscribe(
            "w2",
            callback(move |message: &SpaceMessage| {
                sink.lock().unwrap().push(message.clone());
                Ok(())
            }),
        )
        .unwrap();

    let delivered = space
        .broadcast_message("w1", "task_assignment", json!({ "task": "write release notes" }))
        .unwrap();

    assert_eq!(delivered, 1);
    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].message_type, "task_assignment");
    assert_eq!(received[0].sender_id, "w1");
    server.stop().unwrap();
}

#[test]
fn test_whiteboard_lock_blocks_other_editors() {
    let server = running_server();
    let space = space_with_two(&server);
    let board = space.create_shared_whiteboard("Plan").unwrap();

    let mut new = NewContent::new(ContentType::Text).at(100.0, 100.0).with_data("text", json!("Goals"));
    new.size = Size { width: 200.0, height: 50.0 };
    let content_id = board.add_content("w1", new).unwrap();
    assert_eq!(board.get_content(&content_id).unwrap().unwrap().version, 1);

    let edit = || ContentUpdate::default().with_data("text", json!("Goals v2"));
    assert!(board.lock_content("w1", &content_id).unwrap());
    assert!(!board.update_content("w2", &content_id, edit()).unwrap());
    assert!(board.unlock_content("w1", &content_id).unwrap());
    assert!(board.update_content("w2", &content_id, edit()).unwrap());

    let content = board.get_content(&content_id).unwrap().unwrap();
    assert_eq!(content.version, 2);
    assert_eq!(content.last_modified_by, "w2");
    server.stop().unwrap();
}

#[test]
fn test_file_history_is_newest_first() {
    let server = running_server();
    let space = space_with_two(&server);
    let files = space.create_shared_files().unwrap();

    files.create_file("w1", "doc.txt", "v1").unwrap();
    files.update_file("w1", "doc.txt", "v2", None).unwrap();
    files.grant_permission("w1", "doc.txt", "w2", FilePermission::Write).unwrap();
    files.update_file("w2", "doc.txt", "v3", Some("edits")).unwrap();

    let history = files.file_history("doc.txt").unwrap();
    let contents: Vec<&str> = history.iter().map(|v| v.content.as_str()).collect();
    assert_eq!(contents, ["v3", "v2", "v1"]);
    assert_eq!(history[0].author, "w2");
    server.stop().unwrap();
}

#[test]
fn test_write_lock_conflict_is_not_permission_error() {
    let server = running_server();
    let space = space_with_two(&server);
    let files = space.create_shared_files().unwrap();
    files.create_file("w1", "doc.txt", "v1").unwrap();
    files.grant_permission("w1", "doc.txt", "w2", FilePermission::Write).unwrap();

    assert!(files.lock_file("w1", "doc.txt", LockType::Write, None).unwrap());
    assert!(!files.lock_file("w2", "doc.txt", LockType::Write, None).unwrap());

    let err = files.update_file("w2", "doc.txt", "v2", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LockConflict);
    assert_eq!(err.context()["holder"], "w1");

    assert!(files.unlock_file("w1", "doc.txt").unwrap());
    files.update_file("w2", "doc.txt", "v2", None).unwrap();
    server.stop().unwrap();
}

#[test]
fn test_double_start_reports_state_and_idle_stop_is_quiet() {
    let idle = CollaborativeServer::new(HuddleConfig::default());
    idle.stop().unwrap();

    let server = CollaborativeServer::new(HuddleConfig::default());
    server.start().unwrap();
    let err = server.start().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    assert!(err.to_string().contains("running"));
    server.stop().unwrap();
}
