//! Demo command implementation.
//!
//! Drives one server through a short collaboration session: delegation,
//! space messaging, whiteboard locking, shared file versions, routing and a
//! recovered connection failure.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use colored::Colorize;
use huddle_core::filesystem::{FilePermission, LockType};
use huddle_core::registry::{TaskParams, TaskResult};
use huddle_core::space::{ParticipantRole, SpaceMessage};
use huddle_core::whiteboard::{ContentType, ContentUpdate, NewContent};
use huddle_core::{
    CollaborativeServer, Envelope, HuddleConfig, MessageType, TaskExecutor, WorkerInfo,
    WorkerType, callback,
};
use serde_json::{Value, json};

use super::status::print_status;

/// Executor that reports every task as done.
struct BuilderExecutor;

impl TaskExecutor for BuilderExecutor {
    fn execute(&self, task: &str, params: &TaskParams) -> anyhow::Result<TaskResult> {
        Ok(TaskResult::success(format!("built {task}"))
            .with_field("inputs", json!(params.keys().collect::<Vec<_>>())))
    }
}

struct Transcript {
    steps: Vec<Value>,
    json_output: bool,
}

impl Transcript {
    fn record(&mut self, step: &str, outcome: Value) {
        if !self.json_output {
            println!("  {} {}: {}", "✓".green(), step.bold(), outcome);
        }
        self.steps.push(json!({ "step": step, "outcome": outcome }));
    }
}

/// Execute the demo command.
pub fn execute(config: HuddleConfig, json_output: bool) -> anyhow::Result<()> {
    let server = CollaborativeServer::new(config);
    server.start()?;
    let mut log = Transcript { steps: Vec::new(), json_output };
    if !json_output {
        println!("{}", "Huddle Demo".bold().cyan());
        println!();
    }

    let executor: Arc<dyn TaskExecutor> = Arc::new(BuilderExecutor);
    server.register_worker(
        "planner",
        WorkerInfo::new("Planner", "Lead").with_type(WorkerType::Planner),
        None,
    )?;
    server.register_worker(
        "builder",
        WorkerInfo::new("Builder", "Developer").with_type(WorkerType::Executor),
        Some(&executor),
    )?;
    server.register_worker(
        "reviewer",
        WorkerInfo::new("Reviewer", "QA").with_type(WorkerType::Verifier),
        None,
    )?;
    log.record("register_workers", json!(["planner", "builder", "reviewer"]));

    let mut params = TaskParams::new();
    params.insert("target".to_string(), json!("release"));
    let result = server.registry()?.delegate_task("planner", "builder", "package", params)?;
    log.record("delegate_task", json!({ "success": result.success, "summary": result.summary }));

    let space = server.create_collaborative_space("Release", "planner", Some("Ship v1"), None)?;
    space.add_participant("builder", "Builder", "executor", ParticipantRole::Participant, None)?;
    space.add_participant("reviewer", "Reviewer", "verifier", ParticipantRole::Observer, None)?;
    let heard = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&heard);
    space.subscribe(
        "builder",
        callback(move |_: &SpaceMessage| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    )?;
    let delivered =
        space.broadcast_message("planner", "task_assignment", json!({ "task": "cut release" }))?;
    log.record(
        "broadcast",
        json!({ "space": space.space_id(), "delivered": delivered, "heard": heard.load(Ordering::SeqCst) }),
    );

    let board = space.create_shared_whiteboard("Release plan")?;
    let note = board.add_content(
        "planner",
        NewContent::new(ContentType::Text).at(100.0, 100.0).with_data("text", json!("Checklist")),
    )?;
    let edit = || ContentUpdate::default().with_data("text", json!("Checklist (reviewed)"));
    let locked = board.lock_content("planner", &note)?;
    let blocked = !board.update_content("builder", &note, edit())?;
    board.unlock_content("planner", &note)?;
    board.update_content("builder", &note, edit())?;
    let version = board.get_content(&note)?.map_or(0, |c| c.version);
    log.record(
        "whiteboard_lock",
        json!({ "locked": locked, "blocked_while_locked": blocked, "version": version }),
    );

    let files = space.create_shared_files()?;
    files.create_file("planner", "CHANGELOG.md", "v1")?;
    files.grant_permission("planner", "CHANGELOG.md", "builder", FilePermission::Write)?;
    files.lock_file("planner", "CHANGELOG.md", LockType::Write, None)?;
    let conflict = files
        .update_file("builder", "CHANGELOG.md", "v2", None)
        .err()
        .map(|e| e.kind().to_string());
    files.unlock_file("planner", "CHANGELOG.md")?;
    files.update_file("builder", "CHANGELOG.md", "v2", Some("release notes"))?;
    let history: Vec<String> =
        files.file_history("CHANGELOG.md")?.into_iter().map(|v| v.content).collect();
    log.record("file_versions", json!({ "conflict": conflict, "history": history }));

    let envelope = Envelope::new(MessageType::VerificationRequest, json!({ "file": "CHANGELOG.md" }));
    let routed = server.route_message("builder", "reviewer", envelope)?;
    thread::sleep(server.config().server.maintenance_interval() + Duration::from_millis(50));
    let pending = server.router()?.pending_messages("reviewer")?.len();
    log.record("route_message", json!({ "queued": routed, "pending_after_tick": pending }));

    let recovery = server.recovery()?;
    let strategy = recovery.handle_connection_failure("reviewer", "network blip", Default::default())?;
    recovery.record_heartbeat("reviewer", 12.0)?;
    log.record("connection_failure", json!({ "strategy": strategy.as_str() }));

    let status = server.status()?;
    server.stop()?;

    if json_output {
        let report = json!({ "steps": log.steps, "status": status });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        print_status(&status);
    }
    Ok(())
}
