//! Relationship population orchestrator.
//!
//! Drives one LLM call per subject concept, then adjudication and
//! specificity refinement per returned object string, and finally assigns
//! per-relation priorities and persists the resulting triples.
//!
//! Items are processed strictly in selector order on the calling task; the
//! specificity memo and priority counters belong to one run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use ontoloom_core::{
    CancellationFlag, ConceptItem, ConceptSelection, ConceptSelector, EmbeddingBackend, Error,
    ListProgressReporter, LlmGateway, NewTriple, PlaceholderKey, PopulatorRecord,
    RelationRepository, RelationSetSpec, Result, SpecificityRepository, StatusSink,
    StringVectorRepository, TracingStatusSink, Triple, VectorSlot,
};

use crate::adjudicator::ConfidenceAdjudicator;
use crate::protocol::{self, PromptTemplate};
use crate::specificity::{SpecificityMemo, SpecificityRefiner};

const PROGRESS_LIST_NAME: &str = "populate_rels";

/// A named relation population run over a concept selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulatorDefinition {
    /// Unique populator name; triples are keyed by it.
    pub name: String,
    pub selection: ConceptSelection,
    pub relation_set: RelationSetSpec,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Whether a run persists its triples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    FullRun,
    /// Literal terms; triples are reported, never written.
    Test,
}

/// Outcome of a population run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PopulationReport {
    pub mode: RunMode,
    pub item_count: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
    /// Emitted triples, in persistence order.
    pub triples: Vec<Triple>,
    /// Gateway spend at the end of the run.
    pub spend: f64,
}

/// Embedder used to vectorise persisted object strings.
#[derive(Clone)]
pub struct EmbeddingTarget {
    pub name: String,
    pub embedder: Arc<dyn EmbeddingBackend>,
    pub vectors: Arc<dyn StringVectorRepository>,
}

/// Ordered set of (relation, object) pairs emitted for one subject.
#[derive(Debug, Default)]
pub struct EmittedPairs {
    order: Vec<(String, String)>,
    seen: HashSet<(String, String)>,
}

impl EmittedPairs {
    /// Insert unless already present; returns whether it was new.
    pub fn insert(&mut self, relation: &str, object: &str) -> bool {
        let key = (relation.to_string(), object.to_string());
        if self.seen.contains(&key) {
            return false;
        }
        self.seen.insert(key.clone());
        self.order.push(key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Number each pair 1..=n within its relation, in emission order.
    pub fn into_triples(self, subject: &str) -> Vec<Triple> {
        let mut counters: HashMap<String, u32> = HashMap::new();
        self.order
            .into_iter()
            .map(|(relation, object)| {
                let priority = counters.entry(relation.clone()).or_insert(0);
                *priority += 1;
                Triple {
                    subject: subject.to_string(),
                    relation,
                    object,
                    priority: *priority,
                }
            })
            .collect()
    }
}

/// Where full-run triples go.
struct FullRunTarget {
    relations: Arc<dyn RelationRepository>,
    populator_id: Uuid,
    populator_name: String,
    embedder_id: Option<Uuid>,
}

/// Per-run collaborators shared by every item.
struct RunContext<'a> {
    set: &'a RelationSetSpec,
    template: PromptTemplate,
    adjudicator: ConfidenceAdjudicator,
    refiner: SpecificityRefiner,
    memo: SpecificityMemo,
}

/// Relation population orchestrator.
#[derive(Clone)]
pub struct RelationPopulator {
    gateway: Arc<dyn LlmGateway>,
    status: Arc<dyn StatusSink>,
    selector: Option<Arc<dyn ConceptSelector>>,
    relations: Option<Arc<dyn RelationRepository>>,
    specificity_store: Option<Arc<dyn SpecificityRepository>>,
    embedding: Option<EmbeddingTarget>,
    fail_fast: bool,
    report_increment: usize,
}

impl RelationPopulator {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self {
            gateway,
            status: Arc::new(TracingStatusSink),
            selector: None,
            relations: None,
            specificity_store: None,
            embedding: None,
            fail_fast: true,
            report_increment: ontoloom_core::defaults::PROGRESS_REPORT_INCREMENT,
        }
    }

    pub fn with_status_sink(mut self, status: Arc<dyn StatusSink>) -> Self {
        self.status = status;
        self
    }

    /// Concept selector and triple store; required for full runs.
    pub fn with_store(
        mut self,
        selector: Arc<dyn ConceptSelector>,
        relations: Arc<dyn RelationRepository>,
    ) -> Self {
        self.selector = Some(selector);
        self.relations = Some(relations);
        self
    }

    pub fn with_specificity_store(mut self, store: Arc<dyn SpecificityRepository>) -> Self {
        self.specificity_store = Some(store);
        self
    }

    pub fn with_embedding(mut self, target: EmbeddingTarget) -> Self {
        self.embedding = Some(target);
        self
    }

    /// Stop on the first failed item (default) or count it and move on.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_report_increment(mut self, increment: usize) -> Self {
        self.report_increment = increment.max(1);
        self
    }

    /// Full run: register the populator, select its concepts, and persist
    /// the triples of every concept not already populated.
    #[instrument(skip(self, definition, cancel), fields(
        subsystem = "relations",
        component = "populator",
        op = "populate",
        populator = %definition.name,
    ))]
    pub async fn populate(
        &self,
        definition: &PopulatorDefinition,
        cancel: &CancellationFlag,
    ) -> Result<PopulationReport> {
        let (selector, relations) = match (&self.selector, &self.relations) {
            (Some(s), Some(r)) => (s.clone(), r.clone()),
            _ => {
                return Err(Error::Config(
                    "a full run needs a concept selector and a relation store".into(),
                ))
            }
        };
        definition.relation_set.validate()?;

        let populator_id = relations
            .register_populator(&PopulatorRecord {
                name: definition.name.clone(),
                selection: definition.selection.clone(),
                relation_set_json: serde_json::to_string(&definition.relation_set)?,
                model: self.gateway.model_name().to_string(),
                notes: definition.notes.clone(),
            })
            .await?;

        let embedder_id = match &self.embedding {
            Some(t) => Some(
                t.vectors
                    .register_embedder(&t.name, t.embedder.model_name(), t.embedder.dimension())
                    .await?,
            ),
            None => None,
        };

        let items = selector.select(&definition.selection).await?;
        info!(item_count = items.len(), %populator_id, "Selected concepts");

        let target = FullRunTarget {
            relations,
            populator_id,
            populator_name: definition.name.clone(),
            embedder_id,
        };
        self.run(RunMode::FullRun, &definition.relation_set, &items, Some(&target), cancel)
            .await
    }

    /// Test mode: run newline-separated `terms` without persisting anything.
    #[instrument(skip(self, set, terms, cancel), fields(
        subsystem = "relations",
        component = "populator",
        op = "test_terms",
    ))]
    pub async fn test_terms(
        &self,
        set: &RelationSetSpec,
        terms: &str,
        cancel: &CancellationFlag,
    ) -> Result<PopulationReport> {
        let items: Vec<ConceptItem> = terms
            .split('\n')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(ConceptItem::literal)
            .collect();
        if items.is_empty() {
            return Err(Error::InvalidInput(
                "test mode needs at least one non-blank term".into(),
            ));
        }
        self.run(RunMode::Test, set, &items, None, cancel).await
    }

    async fn run(
        &self,
        mode: RunMode,
        set: &RelationSetSpec,
        items: &[ConceptItem],
        target: Option<&FullRunTarget>,
        cancel: &CancellationFlag,
    ) -> Result<PopulationReport> {
        let start = Instant::now();
        let mut refiner = SpecificityRefiner::new(self.gateway.clone());
        if let Some(store) = &self.specificity_store {
            refiner = refiner.with_store(store.clone());
        }
        let mut ctx = RunContext {
            set,
            template: protocol::build(set)?,
            adjudicator: ConfidenceAdjudicator::new(self.gateway.clone())
                .with_fail_fast(self.fail_fast),
            refiner,
            memo: SpecificityMemo::new(),
        };

        let mut report = PopulationReport {
            mode,
            item_count: items.len(),
            ..Default::default()
        };
        let mut progress =
            ListProgressReporter::new(PROGRESS_LIST_NAME, items.len(), self.status.clone())
                .with_report_increment(self.report_increment);
        self.status.emit_status(&format!(
            "About to process {} using LLM, got {} to process.",
            PROGRESS_LIST_NAME,
            items.len()
        ));

        for (idx, item) in items.iter().enumerate() {
            if cancel.is_cancelled() {
                self.status.emit_status("Cancelled rels population.");
                report.cancelled = true;
                break;
            }
            progress.report_progress(idx);

            if let Some(target) = target {
                let code_id = subject_code_id(item)?;
                if target.relations.has_relations(code_id, target.populator_id).await? {
                    debug!(concept = %item.text, "Already populated, skipping");
                    progress.record_skip();
                    report.skipped += 1;
                    continue;
                }
            }

            let outcome = match self.process_item(&mut ctx, item).await {
                Ok(pairs) => self.emit(item, pairs, target, &mut report).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => report.processed += 1,
                Err(e) if e.is_fatal() || self.fail_fast => {
                    self.status.emit_status(&format!(
                        "Stopped rels population after {} processed and {} skipped of {}: {}",
                        report.processed, report.skipped, report.item_count, e
                    ));
                    return Err(e);
                }
                Err(e) => {
                    warn!(concept = %item.text, error = %e, "Item failed, continuing");
                    report.failed += 1;
                }
            }
        }

        if !report.cancelled {
            progress.report_completion();
        }
        report.spend = self.gateway.total_spend();
        self.status.emit_status(&format!(
            "DONE processing {} using LLM with {} to process.",
            PROGRESS_LIST_NAME,
            items.len()
        ));
        info!(
            item_count = report.item_count,
            processed = report.processed,
            skip_count = report.skipped,
            failed = report.failed,
            triples = report.triples.len(),
            spend = report.spend,
            duration_ms = start.elapsed().as_millis() as u64,
            "Relation population finished"
        );
        Ok(report)
    }

    /// One LLM call for the concept, then adjudication and refinement of
    /// every returned object string.
    async fn process_item(&self, ctx: &mut RunContext<'_>, item: &ConceptItem) -> Result<EmittedPairs> {
        let prompt = ctx
            .template
            .render(&[(PlaceholderKey::Concept, Some(item.text.as_str()))])?;
        let resp = self.gateway.get_response(&prompt, &ctx.template.shape).await?;

        let set = ctx.set;
        let mut emitted = EmittedPairs::default();
        for relation in set.relations() {
            if relation.no_write {
                continue;
            }
            let objects = resp.responses.require(&relation.relation)?;
            if !relation.multi && objects.len() > 1 {
                warn!(
                    concept = %item.text,
                    relation = %relation.relation,
                    count = objects.len(),
                    "More than one response for a single-response relation, keeping the first"
                );
            }
            let take = if relation.multi { objects.len() } else { 1 };

            for candidate in objects.iter().take(take) {
                let verdict = ctx
                    .adjudicator
                    .adjudicate(set, relation, &item.text, &candidate.text)
                    .await?;
                let Some(verdict) = verdict else {
                    debug!(object = %candidate.text, "Rejected by confirmation");
                    continue;
                };
                let top_level = verdict.into_text();

                let refinement = ctx
                    .refiner
                    .refine(
                        set,
                        relation,
                        &item.text,
                        &top_level,
                        candidate.specificity,
                        &mut ctx.memo,
                    )
                    .await?;
                for object in &refinement.adequate {
                    emitted.insert(&relation.relation, object);
                }
            }
        }
        Ok(emitted)
    }

    async fn emit(
        &self,
        item: &ConceptItem,
        pairs: EmittedPairs,
        target: Option<&FullRunTarget>,
        report: &mut PopulationReport,
    ) -> Result<()> {
        for triple in pairs.into_triples(&item.text) {
            match target {
                Some(target) => self.persist(item, &triple, target).await?,
                None => info!(
                    concept = %triple.subject,
                    relation = %triple.relation,
                    object = %triple.object,
                    priority = triple.priority,
                    "(TESTING MODE) LLM-identified relationship"
                ),
            }
            report.triples.push(triple);
        }
        Ok(())
    }

    async fn persist(&self, item: &ConceptItem, triple: &Triple, target: &FullRunTarget) -> Result<()> {
        let saved = target
            .relations
            .save_triple(&NewTriple {
                subject_code_id: subject_code_id(item)?,
                populator_id: target.populator_id,
                populator_name: target.populator_name.clone(),
                relation: triple.relation.clone(),
                object: triple.object.clone(),
                priority: triple.priority,
            })
            .await?;

        if let (Some(embedding), Some(embedder_id)) = (&self.embedding, target.embedder_id) {
            if !embedding.vectors.has_vector(saved.object_str_id, embedder_id).await? {
                let vectors = embedding
                    .embedder
                    .embed_texts(std::slice::from_ref(&triple.object))
                    .await?;
                let vector = vectors.into_iter().next().ok_or_else(|| {
                    Error::Inference(format!("embedder returned no vector for '{}'", triple.object))
                })?;
                embedding
                    .vectors
                    .store_vector(saved.object_str_id, embedder_id, VectorSlot::Mean, vector)
                    .await?;
            }
        }
        Ok(())
    }
}

fn subject_code_id(item: &ConceptItem) -> Result<Uuid> {
    item.code_id.ok_or_else(|| {
        Error::DataIntegrity(format!("selected concept '{}' has no originating code", item.text))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emitted_pairs_dedup_keeps_first_position() {
        let mut pairs = EmittedPairs::default();
        assert!(pairs.insert("causes", "a"));
        assert!(pairs.insert("causes", "b"));
        assert!(!pairs.insert("causes", "a"));
        assert!(pairs.insert("treats", "a"));
        assert_eq!(pairs.len(), 3);
    }

    #[test]
    fn test_priorities_count_per_relation() {
        let mut pairs = EmittedPairs::default();
        pairs.insert("causes", "a");
        pairs.insert("treats", "x");
        pairs.insert("causes", "b");
        pairs.insert("causes", "c");
        let triples = pairs.into_triples("fever");
        let causes: Vec<u32> = triples
            .iter()
            .filter(|t| t.relation == "causes")
            .map(|t| t.priority)
            .collect();
        assert_eq!(causes, vec![1, 2, 3]);
        assert_eq!(triples[1].priority, 1);
        assert!(triples.iter().all(|t| t.subject == "fever"));
    }

    #[test]
    fn test_run_mode_serde() {
        assert_eq!(serde_json::to_string(&RunMode::FullRun).unwrap(), "\"full_run\"");
        assert_eq!(serde_json::from_str::<RunMode>("\"test\"").unwrap(), RunMode::Test);
    }
}
