//! Handlers running relation population, expansion strings, code
//! summaries and code matching as tasks.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use ontoloom_core::{
    ExpansionDefinition, MatchQuerySpec, MatchRepository, RelationSetSpec, StrSelection,
};
use ontoloom_relations::{
    CodeSummarizer, ExpansionPopulator, PopulatorDefinition, RelationPopulator,
};
use ontoloom_search::{MatchingConfig, MatchingEngine};

use crate::handler::{TaskContext, TaskHandler, TaskKind, TaskResult};

/// Payload of a [`TaskKind::PopulateRels`] task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PopulateRequest {
    /// Select concepts and persist triples.
    FullRun { definition: PopulatorDefinition },
    /// Newline-separated literal terms; nothing is written.
    Test {
        relation_set: RelationSetSpec,
        terms: String,
    },
}

fn to_result<T: Serialize>(report: &T, cancelled: bool) -> TaskResult {
    if cancelled {
        return TaskResult::Cancelled;
    }
    match serde_json::to_value(report) {
        Ok(value) => TaskResult::Success(Some(value)),
        Err(e) => TaskResult::Failed(format!("report serialization failed: {}", e)),
    }
}

fn parse<T: for<'de> Deserialize<'de>>(payload: &JsonValue) -> Result<T, TaskResult> {
    serde_json::from_value(payload.clone())
        .map_err(|e| TaskResult::Failed(format!("invalid task payload: {}", e)))
}

/// Runs [`RelationPopulator`] with the task's status sink and cancel flag.
pub struct PopulateHandler {
    populator: RelationPopulator,
}

impl PopulateHandler {
    pub fn new(populator: RelationPopulator) -> Self {
        Self { populator }
    }
}

#[async_trait]
impl TaskHandler for PopulateHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::PopulateRels
    }

    async fn execute(&self, ctx: TaskContext) -> TaskResult {
        let request: PopulateRequest = match parse(&ctx.payload) {
            Ok(r) => r,
            Err(failed) => return failed,
        };
        let populator = self
            .populator
            .clone()
            .with_status_sink(ctx.status_sink());

        let outcome = match &request {
            PopulateRequest::FullRun { definition } => {
                debug!(task_id = %ctx.task_id, populator = %definition.name, "Full population run");
                populator.populate(definition, ctx.cancel_flag()).await
            }
            PopulateRequest::Test {
                relation_set,
                terms,
            } => {
                debug!(task_id = %ctx.task_id, "Test population run");
                populator
                    .test_terms(relation_set, terms, ctx.cancel_flag())
                    .await
            }
        };

        match outcome {
            Ok(report) => to_result(&report, report.cancelled),
            Err(e) => {
                warn!(task_id = %ctx.task_id, error = %e, "Population failed");
                TaskResult::Failed(e.to_string())
            }
        }
    }
}

/// Runs [`MatchingEngine`] for a [`MatchQuerySpec`] payload.
pub struct MatchHandler {
    repo: Arc<dyn MatchRepository>,
    config: MatchingConfig,
}

impl MatchHandler {
    pub fn new(repo: Arc<dyn MatchRepository>) -> Self {
        Self {
            repo,
            config: MatchingConfig::default(),
        }
    }

    pub fn with_config(mut self, config: MatchingConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl TaskHandler for MatchHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::CodeMatches
    }

    async fn execute(&self, ctx: TaskContext) -> TaskResult {
        let spec: MatchQuerySpec = match parse(&ctx.payload) {
            Ok(s) => s,
            Err(failed) => return failed,
        };
        let engine = MatchingEngine::new(self.repo.clone())
            .with_config(self.config.clone())
            .with_status_sink(ctx.status_sink());

        match engine.run(&spec, ctx.cancel_flag()).await {
            Ok(report) => to_result(&report, report.cancelled),
            Err(e) => {
                warn!(task_id = %ctx.task_id, error = %e, "Matching failed");
                TaskResult::Failed(e.to_string())
            }
        }
    }
}

/// Runs [`ExpansionPopulator`] for an [`ExpansionDefinition`] payload.
pub struct ExpansionHandler {
    populator: ExpansionPopulator,
}

impl ExpansionHandler {
    pub fn new(populator: ExpansionPopulator) -> Self {
        Self { populator }
    }
}

#[async_trait]
impl TaskHandler for ExpansionHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::PopulateExpansionStrs
    }

    async fn execute(&self, ctx: TaskContext) -> TaskResult {
        let definition: ExpansionDefinition = match parse(&ctx.payload) {
            Ok(d) => d,
            Err(failed) => return failed,
        };
        debug!(task_id = %ctx.task_id, style = %definition.style, "Expansion run");
        let populator = self
            .populator
            .clone()
            .with_status_sink(ctx.status_sink());

        match populator.populate(&definition, ctx.cancel_flag()).await {
            Ok(report) => to_result(&report, report.cancelled),
            Err(e) => {
                warn!(task_id = %ctx.task_id, error = %e, "Expansion failed");
                TaskResult::Failed(e.to_string())
            }
        }
    }
}

/// Runs [`CodeSummarizer`] for a [`StrSelection`] payload.
pub struct CodeSummaryHandler {
    summarizer: CodeSummarizer,
}

impl CodeSummaryHandler {
    pub fn new(summarizer: CodeSummarizer) -> Self {
        Self { summarizer }
    }
}

#[async_trait]
impl TaskHandler for CodeSummaryHandler {
    fn kind(&self) -> TaskKind {
        TaskKind::CodeSummaryVectors
    }

    async fn execute(&self, ctx: TaskContext) -> TaskResult {
        let selection: StrSelection = match parse(&ctx.payload) {
            Ok(s) => s,
            Err(failed) => return failed,
        };
        let summarizer = self
            .summarizer
            .clone()
            .with_status_sink(ctx.status_sink());

        match summarizer.summarize(&selection, ctx.cancel_flag()).await {
            Ok(report) => to_result(&report, report.cancelled),
            Err(e) => {
                warn!(task_id = %ctx.task_id, error = %e, "Code summaries failed");
                TaskResult::Failed(e.to_string())
            }
        }
    }
}
