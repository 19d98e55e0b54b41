//! Task manager for launching, observing and cancelling background runs.
//!
//! Each launched task gets an id of the form `{kind}_{uuid}`, a status
//! string (starting at "Pending...", then the run's own progress messages,
//! and finally "Completed.", "Cancelled." or an error line), a done flag and
//! a cancellation handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use ontoloom_core::{CancellationFlag, Error, Result, StatusSink};

use crate::handler::{TaskContext, TaskHandler, TaskKind, TaskResult};

/// Initial status of every task.
pub const STATUS_PENDING: &str = "Pending...";
/// Status of a task that finished normally.
pub const STATUS_COMPLETED: &str = "Completed.";
/// Status of a task that stopped on its cancellation flag.
pub const STATUS_CANCELLED: &str = "Cancelled.";

const EVENT_BUS_CAPACITY: usize = 256;

/// Status line of a failed task.
pub fn error_status(kind: TaskKind, error: &str) -> String {
    format!("Error from wrapper doing {}: {}", kind, error)
}

/// Event emitted by the task manager.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Started { task_id: String, kind: TaskKind },
    Status { task_id: String, message: String },
    Finished { task_id: String, status: String },
}

/// Point-in-time view of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub kind: TaskKind,
    pub status: String,
    pub done: bool,
    pub result: Option<JsonValue>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

struct TaskEntry {
    cancel: CancellationFlag,
    state: Mutex<TaskSnapshot>,
    done_tx: watch::Sender<bool>,
}

impl TaskEntry {
    fn snapshot(&self) -> TaskSnapshot {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn set_status(&self, message: &str) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.status = message.to_string();
    }

    fn finish(&self, status: String, result: Option<JsonValue>) {
        {
            let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            state.status = status;
            state.result = result;
            state.done = true;
            state.finished_at = Some(Utc::now());
        }
        self.done_tx.send_replace(true);
    }
}

/// Feeds a run's status messages into its task entry.
struct TaskStatusSink {
    task_id: String,
    entry: Arc<TaskEntry>,
    event_tx: broadcast::Sender<TaskEvent>,
}

impl StatusSink for TaskStatusSink {
    fn emit_status(&self, message: &str) {
        info!(task_id = %self.task_id, status = message, "Task status");
        self.entry.set_status(message);
        let _ = self.event_tx.send(TaskEvent::Status {
            task_id: self.task_id.clone(),
            message: message.to_string(),
        });
    }
}

/// Launches tasks on the tokio runtime and tracks their status.
pub struct TaskManager {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
    tasks: Arc<Mutex<HashMap<String, Arc<TaskEntry>>>>,
    event_tx: broadcast::Sender<TaskEvent>,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            handlers: HashMap::new(),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            event_tx,
        }
    }

    /// Register the handler for its task kind (replacing any previous one).
    pub fn with_handler<H: TaskHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.insert(handler.kind(), Arc::new(handler));
        self
    }

    /// Get a receiver for task events.
    pub fn events(&self) -> broadcast::Receiver<TaskEvent> {
        self.event_tx.subscribe()
    }

    fn entry(&self, task_id: &str) -> Option<Arc<TaskEntry>> {
        self.tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(task_id)
            .cloned()
    }

    /// Start a task of `kind` with `payload`; returns its id immediately.
    pub fn launch(&self, kind: TaskKind, payload: JsonValue) -> Result<String> {
        let handler = self
            .handlers
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no handler registered for {}", kind)))?;

        let task_id = format!("{}_{}", kind, Uuid::new_v4());
        let (done_tx, _) = watch::channel(false);
        let entry = Arc::new(TaskEntry {
            cancel: CancellationFlag::new(),
            state: Mutex::new(TaskSnapshot {
                id: task_id.clone(),
                kind,
                status: STATUS_PENDING.to_string(),
                done: false,
                result: None,
                started_at: Utc::now(),
                finished_at: None,
            }),
            done_tx,
        });
        self.tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(task_id.clone(), entry.clone());

        let sink = Arc::new(TaskStatusSink {
            task_id: task_id.clone(),
            entry: entry.clone(),
            event_tx: self.event_tx.clone(),
        });
        let ctx = TaskContext::new(task_id.clone(), kind, payload, entry.cancel.clone(), sink);
        let event_tx = self.event_tx.clone();
        let id = task_id.clone();

        info!(task_id = %id, %kind, "Launching task");
        let _ = event_tx.send(TaskEvent::Started {
            task_id: id.clone(),
            kind,
        });

        tokio::spawn(async move {
            let start = Instant::now();
            let result = match tokio::spawn(async move { handler.execute(ctx).await }).await {
                Ok(result) => result,
                Err(e) => {
                    error!(task_id = %id, error = ?e, "Task panicked");
                    TaskResult::Failed(format!("task panicked: {}", e))
                }
            };

            let (status, data) = match result {
                TaskResult::Success(data) => (STATUS_COMPLETED.to_string(), data),
                TaskResult::Cancelled => (STATUS_CANCELLED.to_string(), None),
                TaskResult::Failed(err) => {
                    warn!(task_id = %id, error = %err, "Task failed");
                    (error_status(kind, &err), None)
                }
            };
            info!(
                task_id = %id,
                %kind,
                status = %status,
                duration_ms = start.elapsed().as_millis() as u64,
                "Task finished"
            );
            entry.finish(status.clone(), data);
            let _ = event_tx.send(TaskEvent::Finished {
                task_id: id,
                status,
            });
        });

        Ok(task_id)
    }

    /// Current view of a task.
    pub fn status(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.entry(task_id).map(|e| e.snapshot())
    }

    /// All known tasks, oldest first.
    pub fn list(&self) -> Vec<TaskSnapshot> {
        let mut all: Vec<TaskSnapshot> = self
            .tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .map(|e| e.snapshot())
            .collect();
        all.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        all
    }

    /// Request cancellation; the run stops before its next item.
    ///
    /// Returns false for unknown or already finished tasks.
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.entry(task_id) {
            Some(entry) if !entry.snapshot().done => {
                info!(task_id, "Cancellation requested");
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Wait until the task is done and return its final view.
    pub async fn wait(&self, task_id: &str) -> Option<TaskSnapshot> {
        let entry = self.entry(task_id)?;
        let mut done_rx = entry.done_tx.subscribe();
        let _ = done_rx.wait_for(|done| *done).await;
        Some(entry.snapshot())
    }

    /// Drop finished tasks from the registry; returns how many were removed.
    pub fn prune_finished(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        let before = tasks.len();
        tasks.retain(|_, e| !e.snapshot().done);
        before - tasks.len()
    }
}
