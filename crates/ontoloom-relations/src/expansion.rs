//! Expansion strings and summary vectors.
//!
//! [`ExpansionPopulator`] asks the model for alternative versions of each
//! selected string, stores them as that string's expansion set, embeds every
//! member, and then writes the mean vector of each complete set. Matching
//! runs read those means through the expansion-summary sources.
//!
//! [`CodeSummarizer`] needs no model: it embeds the strings of the selected
//! codes and writes one mean vector per code.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use ontoloom_core::{
    CancellationFlag, Error, ExpansionDefinition, ExpansionPopulatorRecord, ExpansionRepository,
    ListProgressReporter, LlmGateway, PlaceholderKey, RelationSetSpec, RelationSpec, Result,
    SourceStr, StatusSink, StrSelection, StrSelectorType, TracingStatusSink, VectorSlot,
};

use crate::populator::EmbeddingTarget;
use crate::protocol::{self, PromptTemplate};

const EXPANSION_LIST_NAME: &str = "populate_expansion_strs";
const CODE_SUMMARY_LIST_NAME: &str = "populate_code_summary_vectors";

/// Outcome of an expansion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpansionReport {
    pub populator_id: Uuid,
    pub populator_name: String,
    pub item_count: usize,
    pub processed: usize,
    /// Strings whose set already had expansions.
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub expansions_written: usize,
    pub vectors_written: usize,
    pub summaries_written: u64,
    pub spend: f64,
}

/// Outcome of a code summary run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CodeSummaryReport {
    pub item_count: usize,
    pub vectors_written: usize,
    pub summaries_written: u64,
    pub cancelled: bool,
}

/// Prompt template with a single multi-response relation.
fn expansion_template(definition: &ExpansionDefinition, prompt: &str) -> Result<PromptTemplate> {
    let relation = definition.relation_name();
    let set = RelationSetSpec::new(format!("{}_prompt", relation))
        .with_json_output(true)
        .with_relation(RelationSpec::new(relation, prompt))?;
    protocol::build(&set)
}

/// Embed the strings with no vector from the embedder yet, in one call.
///
/// Vectors go to the mean slot. Returns the number stored.
async fn embed_missing(
    target: &EmbeddingTarget,
    embedder_id: Uuid,
    strs: &[SourceStr],
) -> Result<usize> {
    let mut missing = Vec::new();
    for s in strs {
        if !target.vectors.has_vector(s.str_id, embedder_id).await? {
            missing.push(s);
        }
    }
    if missing.is_empty() {
        return Ok(0);
    }

    let texts: Vec<String> = missing.iter().map(|s| s.text.clone()).collect();
    let vectors = target.embedder.embed_texts(&texts).await?;
    if vectors.len() != missing.len() {
        return Err(Error::Inference(format!(
            "embedder '{}' returned {} vectors for {} strings",
            target.name,
            vectors.len(),
            missing.len()
        )));
    }
    for (s, vector) in missing.iter().zip(vectors) {
        target
            .vectors
            .store_vector(s.str_id, embedder_id, VectorSlot::Mean, vector)
            .await?;
    }
    Ok(missing.len())
}

async fn register_embedder(target: &EmbeddingTarget) -> Result<Uuid> {
    target
        .vectors
        .register_embedder(
            &target.name,
            target.embedder.model_name(),
            target.embedder.dimension(),
        )
        .await
}

/// Per-run state shared by every selected string.
struct ExpansionRun {
    populator_id: Uuid,
    embedder_id: Uuid,
    relation: String,
    template: PromptTemplate,
}

/// Expansion-string populator.
#[derive(Clone)]
pub struct ExpansionPopulator {
    gateway: Arc<dyn LlmGateway>,
    repo: Arc<dyn ExpansionRepository>,
    embedding: EmbeddingTarget,
    status: Arc<dyn StatusSink>,
    fail_fast: bool,
    report_increment: usize,
}

impl ExpansionPopulator {
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        repo: Arc<dyn ExpansionRepository>,
        embedding: EmbeddingTarget,
    ) -> Self {
        Self {
            gateway,
            repo,
            embedding,
            status: Arc::new(TracingStatusSink),
            fail_fast: true,
            report_increment: ontoloom_core::defaults::PROGRESS_REPORT_INCREMENT,
        }
    }

    pub fn with_status_sink(mut self, status: Arc<dyn StatusSink>) -> Self {
        self.status = status;
        self
    }

    /// Stop on the first failed string (default) or count it and move on.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_report_increment(mut self, increment: usize) -> Self {
        self.report_increment = increment.max(1);
        self
    }

    /// Register the populator, expand every selected string whose set is
    /// still empty, then write the missing set summaries.
    #[instrument(skip(self, definition, cancel), fields(
        subsystem = "relations",
        component = "expansion",
        op = "populate",
        style = %definition.style,
    ))]
    pub async fn populate(
        &self,
        definition: &ExpansionDefinition,
        cancel: &CancellationFlag,
    ) -> Result<ExpansionReport> {
        let start = Instant::now();
        definition.validate()?;
        let prompt = definition.request_prompt()?;
        let populator_name = definition.populator_name();

        let populator_id = self
            .repo
            .register_expansion_populator(&ExpansionPopulatorRecord {
                name: populator_name.clone(),
                selection: definition.selection.clone(),
                style: definition.style.clone(),
                style_version: definition.style_version,
                prompt: prompt.clone(),
                model: self.gateway.model_name().to_string(),
                notes: definition.notes.clone(),
            })
            .await?;
        let run = ExpansionRun {
            populator_id,
            embedder_id: register_embedder(&self.embedding).await?,
            relation: definition.relation_name(),
            template: expansion_template(definition, &prompt)?,
        };

        let items = self.repo.select_strs(&definition.selection).await?;
        info!(item_count = items.len(), %populator_id, "Selected strings to expand");

        let mut report = ExpansionReport {
            populator_id,
            populator_name,
            item_count: items.len(),
            ..Default::default()
        };
        let mut progress =
            ListProgressReporter::new(EXPANSION_LIST_NAME, items.len(), self.status.clone())
                .with_report_increment(self.report_increment);
        self.status.emit_status(&format!(
            "About to process {} using LLM, got {} to process.",
            EXPANSION_LIST_NAME,
            items.len()
        ));

        for (idx, item) in items.iter().enumerate() {
            if cancel.is_cancelled() {
                self.status
                    .emit_status("Cancelled population of expansion strings.");
                report.cancelled = true;
                break;
            }
            progress.report_progress(idx);

            let set_id = self.repo.ensure_set(item.str_id, populator_id).await?;
            if self.repo.has_expansions(set_id).await? {
                debug!(text = %item.text, "Already expanded, skipping");
                progress.record_skip();
                report.skipped += 1;
                continue;
            }

            match self.expand(&run, set_id, item, &mut report).await {
                Ok(()) => report.processed += 1,
                Err(e) if e.is_fatal() || self.fail_fast => {
                    self.status.emit_status(&format!(
                        "Stopped expansion after {} processed and {} skipped of {}: {}",
                        report.processed, report.skipped, report.item_count, e
                    ));
                    return Err(e);
                }
                Err(e) => {
                    warn!(text = %item.text, error = %e, "String failed, continuing");
                    report.failed += 1;
                }
            }
        }

        if !report.cancelled {
            progress.report_completion();
            report.summaries_written = self
                .repo
                .summarize_sets(populator_id, run.embedder_id)
                .await?;
        }
        report.spend = self.gateway.total_spend();
        self.status.emit_status(&format!(
            "DONE processing {} using LLM with {} to process.",
            EXPANSION_LIST_NAME,
            items.len()
        ));
        info!(
            item_count = report.item_count,
            processed = report.processed,
            skip_count = report.skipped,
            failed = report.failed,
            expansions = report.expansions_written,
            summaries = report.summaries_written,
            spend = report.spend,
            duration_ms = start.elapsed().as_millis() as u64,
            "Expansion population finished"
        );
        Ok(report)
    }

    /// One LLM call for the string, then its expansions and their vectors.
    async fn expand(
        &self,
        run: &ExpansionRun,
        set_id: Uuid,
        item: &SourceStr,
        report: &mut ExpansionReport,
    ) -> Result<()> {
        let prompt = run
            .template
            .render(&[(PlaceholderKey::Concept, Some(item.text.as_str()))])?;
        let resp = self.gateway.get_response(&prompt, &run.template.shape).await?;
        let objects = resp.responses.require(&run.relation)?;

        let mut members = vec![item.clone()];
        let mut priority = 0;
        for candidate in objects {
            // an echo of the original adds nothing to its set
            if candidate.text.eq_ignore_ascii_case(&item.text) {
                continue;
            }
            priority += 1;
            let str_id = self
                .repo
                .add_expansion(set_id, &candidate.text, priority)
                .await?;
            members.push(SourceStr {
                str_id,
                text: candidate.text.clone(),
            });
        }
        if priority == 0 {
            debug!(text = %item.text, "Model returned no expansions");
        }
        report.expansions_written += priority as usize;
        report.vectors_written += embed_missing(&self.embedding, run.embedder_id, &members).await?;
        Ok(())
    }
}

/// Writes code summary vectors for a terminology or code set.
#[derive(Clone)]
pub struct CodeSummarizer {
    repo: Arc<dyn ExpansionRepository>,
    embedding: EmbeddingTarget,
    status: Arc<dyn StatusSink>,
    report_increment: usize,
}

impl CodeSummarizer {
    pub fn new(repo: Arc<dyn ExpansionRepository>, embedding: EmbeddingTarget) -> Self {
        Self {
            repo,
            embedding,
            status: Arc::new(TracingStatusSink),
            report_increment: ontoloom_core::defaults::PROGRESS_REPORT_INCREMENT,
        }
    }

    pub fn with_status_sink(mut self, status: Arc<dyn StatusSink>) -> Self {
        self.status = status;
        self
    }

    pub fn with_report_increment(mut self, increment: usize) -> Self {
        self.report_increment = increment.max(1);
        self
    }

    /// Embed every string of the selected codes, then summarise each code.
    #[instrument(skip(self, selection, cancel), fields(
        subsystem = "relations",
        component = "code_summary",
        op = "summarize",
        selector_type = selection.selector_type.as_str(),
    ))]
    pub async fn summarize(
        &self,
        selection: &StrSelection,
        cancel: &CancellationFlag,
    ) -> Result<CodeSummaryReport> {
        if selection.selector_type == StrSelectorType::Rel {
            return Err(Error::Config(
                "code summaries need a terminology or code_set selection".into(),
            ));
        }
        let embedder_id = register_embedder(&self.embedding).await?;
        let strs = self.repo.select_strs(selection).await?;

        let mut report = CodeSummaryReport {
            item_count: strs.len(),
            ..Default::default()
        };
        let mut progress =
            ListProgressReporter::new(CODE_SUMMARY_LIST_NAME, strs.len(), self.status.clone())
                .with_report_increment(self.report_increment);

        for (idx, s) in strs.iter().enumerate() {
            if cancel.is_cancelled() {
                self.status.emit_status("Cancelled code summary vectors.");
                report.cancelled = true;
                return Ok(report);
            }
            progress.report_progress(idx);
            report.vectors_written +=
                embed_missing(&self.embedding, embedder_id, std::slice::from_ref(s)).await?;
        }
        progress.report_completion();

        report.summaries_written = self.repo.summarize_codes(selection, embedder_id).await?;
        info!(
            item_count = report.item_count,
            vectors = report.vectors_written,
            summaries = report.summaries_written,
            "Code summary vectors written"
        );
        Ok(report)
    }
}
