//! Task handlers for each task kind.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use ontoloom_core::{CancellationFlag, StatusSink};

/// Kind of background task; also the task id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Relationship population (full or test run).
    PopulateRels,
    /// Vector candidate matching.
    CodeMatches,
    /// Expansion-string sets and their summary vectors.
    PopulateExpansionStrs,
    /// Per-code summary vectors.
    CodeSummaryVectors,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::PopulateRels => "populate_rels",
            TaskKind::CodeMatches => "code_matches",
            TaskKind::PopulateExpansionStrs => "populate_expansion_strs",
            TaskKind::CodeSummaryVectors => "code_summary_vectors",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context provided to task handlers.
pub struct TaskContext {
    /// Task id (`{kind}_{uuid}`).
    pub task_id: String,
    pub kind: TaskKind,
    /// Handler-specific request.
    pub payload: JsonValue,
    cancel: CancellationFlag,
    status: Arc<dyn StatusSink>,
}

impl TaskContext {
    pub fn new(
        task_id: impl Into<String>,
        kind: TaskKind,
        payload: JsonValue,
        cancel: CancellationFlag,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            kind,
            payload,
            cancel,
            status,
        }
    }

    /// Cancellation flag the handler's loop must honour.
    pub fn cancel_flag(&self) -> &CancellationFlag {
        &self.cancel
    }

    /// Sink whose messages become the task's status string.
    pub fn status_sink(&self) -> Arc<dyn StatusSink> {
        self.status.clone()
    }

    pub fn report_status(&self, message: &str) {
        self.status.emit_status(message);
    }
}

/// Result of task execution.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskResult {
    /// Task finished; optional report data.
    Success(Option<JsonValue>),
    /// Task observed its cancellation flag and stopped.
    Cancelled,
    /// Task failed with an error message.
    Failed(String),
}

/// Trait for task handlers.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The task kind this handler processes.
    fn kind(&self) -> TaskKind;

    /// Execute the task.
    async fn execute(&self, ctx: TaskContext) -> TaskResult;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ontoloom_core::NoOpStatusSink;

    #[test]
    fn test_task_kind_names() {
        assert_eq!(TaskKind::PopulateRels.to_string(), "populate_rels");
        assert_eq!(TaskKind::CodeMatches.as_str(), "code_matches");
        assert_eq!(
            serde_json::to_string(&TaskKind::CodeMatches).unwrap(),
            "\"code_matches\""
        );
        assert_eq!(
            TaskKind::PopulateExpansionStrs.to_string(),
            "populate_expansion_strs"
        );
        assert_eq!(
            serde_json::from_str::<TaskKind>("\"code_summary_vectors\"").unwrap(),
            TaskKind::CodeSummaryVectors
        );
    }

    #[test]
    fn test_context_exposes_cancel_flag() {
        let cancel = CancellationFlag::new();
        let ctx = TaskContext::new(
            "populate_rels_1",
            TaskKind::PopulateRels,
            JsonValue::Null,
            cancel.clone(),
            Arc::new(NoOpStatusSink),
        );
        cancel.cancel();
        assert!(ctx.cancel_flag().is_cancelled());
        assert_eq!(ctx.task_id, "populate_rels_1");
    }
}
