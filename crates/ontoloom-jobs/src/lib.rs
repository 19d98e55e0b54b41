//! # ontoloom-jobs
//!
//! Background task management for ontoloom.
//!
//! This crate provides:
//! - Task ids of the form `{kind}_{uuid}` with status strings, a done flag
//!   and cooperative cancellation
//! - Status sinks that turn a run's progress messages into task status
//! - Handlers for relation population, expansion strings, code summary
//!   vectors and code matching runs
//! - Task events via a broadcast channel
//!
//! ## Example
//!
//! ```ignore
//! use ontoloom_jobs::{PopulateHandler, PopulateRequest, TaskKind, TaskManager};
//!
//! let manager = TaskManager::new().with_handler(PopulateHandler::new(populator));
//! let task_id = manager.launch(
//!     TaskKind::PopulateRels,
//!     serde_json::to_value(PopulateRequest::FullRun { definition })?,
//! )?;
//! let done = manager.wait(&task_id).await;
//! ```

pub mod handler;
pub mod handlers;
pub mod manager;

// Re-export core types
pub use ontoloom_core::*;

pub use handler::{TaskContext, TaskHandler, TaskKind, TaskResult};
pub use handlers::{
    CodeSummaryHandler, ExpansionHandler, MatchHandler, PopulateHandler, PopulateRequest,
};
pub use manager::{
    error_status, TaskEvent, TaskManager, TaskSnapshot, STATUS_CANCELLED, STATUS_COMPLETED,
    STATUS_PENDING,
};
