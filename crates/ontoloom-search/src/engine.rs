//! Vector candidate-matching engine.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use ontoloom_core::{
    defaults, CancellationFlag, ListProgressReporter, MatchQuerySpec, MatchRecord,
    MatchRepository, MatcherRecord, QueryParam, Result, StatusSink, TracingStatusSink,
};

use crate::params::{compile, NamedParams};
use crate::ranking::{check_ranked, unmatched_sql, RankingQuery};
use crate::subqueries;

const PROGRESS_LIST_NAME: &str = "populate_code_matches";

/// Matching engine configuration.
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    /// Schema holding the vector tables.
    pub schema: String,
    /// Cosine distance a candidate must stay below.
    pub distance_cutoff: f64,
    pub report_increment: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            schema: defaults::DB_SCHEMA.to_string(),
            distance_cutoff: defaults::MATCH_DISTANCE_CUTOFF,
            report_increment: defaults::PROGRESS_REPORT_INCREMENT,
        }
    }
}

impl MatchingConfig {
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn with_report_increment(mut self, increment: usize) -> Self {
        self.report_increment = increment.max(1);
        self
    }
}

/// Outcome of a matching run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchReport {
    pub matcher_id: Uuid,
    pub item_count: usize,
    pub matched: usize,
    /// Items whose ranking query returned nothing.
    pub skipped: usize,
    pub records_written: usize,
    pub cancelled: bool,
}

/// Ranks codes of a target code set against extracted object strings.
pub struct MatchingEngine {
    repo: Arc<dyn MatchRepository>,
    status: Arc<dyn StatusSink>,
    config: MatchingConfig,
}

impl MatchingEngine {
    pub fn new(repo: Arc<dyn MatchRepository>) -> Self {
        Self {
            repo,
            status: Arc::new(TracingStatusSink),
            config: MatchingConfig::default(),
        }
    }

    pub fn with_config(mut self, config: MatchingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_status_sink(mut self, status: Arc<dyn StatusSink>) -> Self {
        self.status = status;
        self
    }

    /// Run one matching configuration to completion or cancellation.
    #[instrument(skip(self, spec, cancel), fields(
        subsystem = "search",
        component = "matching",
        op = "run",
        relation = %spec.from_relation,
        code_set = %spec.target_code_set,
    ))]
    pub async fn run(&self, spec: &MatchQuerySpec, cancel: &CancellationFlag) -> Result<MatchReport> {
        let start = Instant::now();
        let subqueries = subqueries::build(spec, &self.config.schema)?;

        let matcher_id = self
            .repo
            .register_matcher(&MatcherRecord {
                embedder_id: spec.embedder_id,
                spec: spec.clone(),
            })
            .await?;
        let mut report = MatchReport {
            matcher_id,
            ..Default::default()
        };

        let unmatched = compile(
            &unmatched_sql(&self.config.schema),
            &NamedParams::new()
                .with("rel_populator_id", QueryParam::Uuid(spec.from_populator_id))
                .with("rel", QueryParam::Text(spec.from_relation.clone()))
                .with("matcher_id", QueryParam::Uuid(matcher_id)),
        )?;
        let items = self.repo.fetch_unmatched(&unmatched).await?;
        report.item_count = items.len();
        if items.is_empty() {
            self.status
                .emit_status("Nothing found to process, so DONE processing code_matches.");
            return Ok(report);
        }
        info!(%matcher_id, item_count = items.len(), "Matching unmatched items");

        let ranking =
            RankingQuery::prepare(&subqueries, self.config.distance_cutoff, spec.top_hit_count)?;

        let mut progress =
            ListProgressReporter::new(PROGRESS_LIST_NAME, items.len(), self.status.clone())
                .with_report_increment(self.config.report_increment);

        for (idx, item) in items.iter().enumerate() {
            if cancel.is_cancelled() {
                self.status.emit_status("Cancelled code matching.");
                report.cancelled = true;
                break;
            }
            progress.report_progress(idx);

            let query = ranking.bind(*item)?;
            let rows = self.repo.rank(&query).await?;
            if rows.is_empty() {
                debug!(from_item = %item, "No candidate below the cutoff");
                progress.record_skip();
                report.skipped += 1;
                continue;
            }
            check_ranked(&rows, spec.top_hit_count, self.config.distance_cutoff)?;

            for row in &rows {
                self.repo
                    .save_match(&MatchRecord {
                        matcher_id,
                        from_item_id: *item,
                        matched_code_id: row.code_id,
                        rank: row.rank,
                        distance: row.distance,
                    })
                    .await?;
            }
            report.matched += 1;
            report.records_written += rows.len();
        }

        if !report.cancelled {
            progress.report_completion();
        }
        self.status.emit_status(&format!(
            "DONE processing {} with {} to process.",
            PROGRESS_LIST_NAME,
            items.len()
        ));
        info!(
            %matcher_id,
            item_count = report.item_count,
            matched = report.matched,
            skip_count = report.skipped,
            records = report.records_written,
            duration_ms = start.elapsed().as_millis() as u64,
            "Matching finished"
        );
        Ok(report)
    }
}

