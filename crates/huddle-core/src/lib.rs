//! Huddle Core - coordination engine for collaborating workers.
//!
//! This crate provides:
//! - A worker registry with load-aware task assignment
//! - Point-to-point message routing with retries and expiry
//! - Collaborative spaces with shared whiteboards and file systems
//! - Failure detection and recovery
//! - Metrics, alerts and optimization recommendations
//!
//! # Example
//!
//! ```rust,no_run
//! use huddle_core::{CollaborativeServer, HuddleConfig};
//! use huddle_core::registry::WorkerInfo;
//!
//! fn main() -> huddle_core::Result<()> {
//!     let server = CollaborativeServer::new(HuddleConfig::default());
//!     server.start()?;
//!     server.register_worker("planner-1", WorkerInfo::new("Planner", "Lead"), None)?;
//!     let space = server.create_collaborative_space("Design", "planner-1", None, None)?;
//!     space.create_shared_whiteboard("Sketches")?;
//!     server.stop()
//! }
//! ```

pub mod config;
pub mod error;
pub mod filesystem;
pub mod logging;
pub mod monitoring;
pub mod notify;
pub mod recovery;
pub mod registry;
pub mod router;
pub mod server;
pub mod space;
pub mod whiteboard;

pub use config::HuddleConfig;
pub use error::{CoordinationError, ErrorKind, Result};
pub use filesystem::SharedFileSystem;
pub use monitoring::MonitoringSystem;
pub use notify::{Callback, callback};
pub use recovery::ErrorRecoverySystem;
pub use registry::{TaskExecutor, WorkerInfo, WorkerRegistry, WorkerStatus, WorkerType};
pub use router::{Envelope, MessageRouter, MessageType};
pub use server::{CollaborativeServer, ServerState, ServerStatus};
pub use space::{CollaborativeSpace, SpaceManager, SpaceState};
pub use whiteboard::SharedWhiteboard;
