//! Command implementations.
//!
//! Population and matching runs go through a [`TaskManager`] so they share
//! the status strings and cancellation path of background tasks; Ctrl-C
//! cancels the running task before its next item.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use ontoloom_core::defaults;
use ontoloom_db::{create_pool_with_config, log_pool_metrics, Database, PoolConfig};
use ontoloom_inference::{EmbedderRegistry, LlmConfig};
use ontoloom_jobs::{
    CodeSummaryHandler, ExpansionHandler, MatchHandler, PopulateHandler, PopulateRequest,
    TaskKind, TaskManager, TaskSnapshot, STATUS_CANCELLED, STATUS_COMPLETED,
};
use ontoloom_relations::{
    protocol, CodeSummarizer, EmbeddingTarget, ExpansionPopulator, LlmSession, RelationPopulator,
};
use ontoloom_search::MatchingConfig;

use crate::config::{
    load_relation_set, CodeSummaryConfig, DatabaseSettings, ExpansionConfig, MatcherConfig,
    PopulatorConfig,
};

async fn connect(settings: &DatabaseSettings) -> anyhow::Result<Database> {
    let pool = create_pool_with_config(&settings.url, PoolConfig::from_env())
        .await
        .context("connecting to the database")?;
    Ok(Database::with_schema(pool, &settings.schema)?)
}

fn session(llm: &LlmConfig) -> anyhow::Result<LlmSession> {
    let backend = llm.backend.build_generator()?;
    Ok(LlmSession::new(backend, llm.max_spend))
}

/// Launch a task and wait for it, cancelling on Ctrl-C.
pub async fn run_task(
    manager: &TaskManager,
    kind: TaskKind,
    payload: JsonValue,
) -> anyhow::Result<TaskSnapshot> {
    let task_id = manager.launch(kind, payload)?;

    let finished = tokio::select! {
        done = manager.wait(&task_id) => done,
        _ = tokio::signal::ctrl_c() => {
            warn!(task_id = %task_id, "Interrupted, cancelling task");
            manager.cancel(&task_id);
            manager.wait(&task_id).await
        }
    };
    let snapshot = finished.ok_or_else(|| anyhow!("task {} is no longer tracked", task_id))?;

    if snapshot.status != STATUS_COMPLETED && snapshot.status != STATUS_CANCELLED {
        bail!("{}", snapshot.status);
    }
    info!(task_id = %task_id, status = %snapshot.status, "Task done");
    Ok(snapshot)
}

/// Full population run from a populator file.
pub async fn populate(path: &Path, fail_fast: Option<bool>) -> anyhow::Result<TaskSnapshot> {
    let config = PopulatorConfig::from_file(path)?;
    let definition = config.definition()?;
    let llm = config.llm_config()?;
    let db = connect(&DatabaseSettings::from_env()?).await?;

    let mut populator = RelationPopulator::new(Arc::new(session(&llm)?))
        .with_store(Arc::new(db.selector.clone()), Arc::new(db.relations.clone()))
        .with_specificity_store(Arc::new(db.specificity.clone()))
        .with_fail_fast(fail_fast.unwrap_or(config.fail_fast))
        .with_report_increment(config.report_increment);

    // the handle keeps the embedder alive for the whole run
    let registry = EmbedderRegistry::new();
    let _embedder = match &config.embedder {
        Some(embedder_config) => {
            let handle = registry.acquire(embedder_config)?;
            populator = populator.with_embedding(EmbeddingTarget {
                name: handle.name().to_string(),
                embedder: handle.backend(),
                vectors: Arc::new(db.vectors.clone()),
            });
            Some(handle)
        }
        None => None,
    };

    info!(
        populator = %definition.name,
        backend = llm.backend.name(),
        max_spend = llm.max_spend,
        "Starting population run"
    );
    let manager = TaskManager::new().with_handler(PopulateHandler::new(populator));
    let done = run_task(
        &manager,
        TaskKind::PopulateRels,
        serde_json::to_value(PopulateRequest::FullRun { definition })?,
    )
    .await;
    log_pool_metrics(db.pool());
    done
}

/// Test run over literal terms; nothing is persisted.
pub async fn test_terms(
    relation_set: &Path,
    terms: &str,
    llm: Option<&Path>,
) -> anyhow::Result<TaskSnapshot> {
    let relation_set = load_relation_set(relation_set)?;
    let llm = match llm {
        Some(path) => LlmConfig::from_file(path)?,
        None => LlmConfig::from_env()?,
    };

    let populator = RelationPopulator::new(Arc::new(session(&llm)?));
    let manager = TaskManager::new().with_handler(PopulateHandler::new(populator));
    run_task(
        &manager,
        TaskKind::PopulateRels,
        serde_json::to_value(PopulateRequest::Test {
            relation_set,
            terms: terms.to_string(),
        })?,
    )
    .await
}

/// Expansion-string run from an expansion file; writes set summaries too.
pub async fn expand(path: &Path, fail_fast: Option<bool>) -> anyhow::Result<TaskSnapshot> {
    let config = ExpansionConfig::from_file(path)?;
    let llm = config.llm_config()?;
    let db = connect(&DatabaseSettings::from_env()?).await?;

    let registry = EmbedderRegistry::new();
    let embedder = registry.acquire(&config.embedder)?;
    let target = EmbeddingTarget {
        name: embedder.name().to_string(),
        embedder: embedder.backend(),
        vectors: Arc::new(db.vectors.clone()),
    };
    let populator = ExpansionPopulator::new(
        Arc::new(session(&llm)?),
        Arc::new(db.expansions.clone()),
        target,
    )
    .with_fail_fast(fail_fast.unwrap_or(config.fail_fast))
    .with_report_increment(config.report_increment);

    info!(
        populator = %config.definition.populator_name(),
        style = %config.definition.style,
        backend = llm.backend.name(),
        embedder = embedder.name(),
        "Starting expansion run"
    );
    let manager = TaskManager::new().with_handler(ExpansionHandler::new(populator));
    let done = run_task(
        &manager,
        TaskKind::PopulateExpansionStrs,
        serde_json::to_value(&config.definition)?,
    )
    .await;
    log_pool_metrics(db.pool());
    done
}

/// Code summary vectors for a terminology or code set.
pub async fn summarize_codes(path: &Path) -> anyhow::Result<TaskSnapshot> {
    let config = CodeSummaryConfig::from_file(path)?;
    let db = connect(&DatabaseSettings::from_env()?).await?;

    let registry = EmbedderRegistry::new();
    let embedder = registry.acquire(&config.embedder)?;
    let summarizer = CodeSummarizer::new(
        Arc::new(db.expansions.clone()),
        EmbeddingTarget {
            name: embedder.name().to_string(),
            embedder: embedder.backend(),
            vectors: Arc::new(db.vectors.clone()),
        },
    )
    .with_report_increment(config.report_increment);

    let manager = TaskManager::new().with_handler(CodeSummaryHandler::new(summarizer));
    let done = run_task(
        &manager,
        TaskKind::CodeSummaryVectors,
        serde_json::to_value(&config.selection)?,
    )
    .await;
    log_pool_metrics(db.pool());
    done
}

/// Matching run from a matcher file.
pub async fn match_codes(path: &Path) -> anyhow::Result<TaskSnapshot> {
    let config = MatcherConfig::from_file(path)?;
    let db = connect(&DatabaseSettings::from_env()?).await?;

    let mut matching = MatchingConfig::default()
        .with_schema(db.schema.clone())
        .with_report_increment(config.report_increment);
    if let Some(cutoff) = config.distance_cutoff {
        matching.distance_cutoff = cutoff;
    }

    let handler = MatchHandler::new(Arc::new(db.matches.clone())).with_config(matching);
    let manager = TaskManager::new().with_handler(handler);
    let done = run_task(
        &manager,
        TaskKind::CodeMatches,
        serde_json::to_value(&config.spec)?,
    )
    .await;
    log_pool_metrics(db.pool());
    done
}

/// Apply pending schema migrations.
pub async fn migrate() -> anyhow::Result<()> {
    let settings = DatabaseSettings::from_env()?;
    if settings.schema != defaults::DB_SCHEMA {
        warn!(
            schema = %settings.schema,
            "Migrations create the {} schema only", defaults::DB_SCHEMA
        );
    }
    let db = connect(&settings).await?;
    db.migrate().await?;
    info!("Migrations applied");
    Ok(())
}

/// The prompt template built for a relation-set file.
pub fn show_prompt(relation_set: &Path) -> anyhow::Result<String> {
    let set = load_relation_set(relation_set)?;
    let template = protocol::build(&set)?;
    Ok(template.text)
}
