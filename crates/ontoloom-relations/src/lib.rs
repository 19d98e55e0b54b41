//! # ontoloom-relations
//!
//! LLM-driven relationship extraction for ontoloom.
//!
//! This crate provides:
//! - Prompt construction from relation sets and the matching response shape
//! - A retrying, spend-limited LLM session
//! - Confidence adjudication of candidate objects (vote, avg, sum, categorical)
//! - Specificity refinement with expansion and second-lookup scoring
//! - The population orchestrator for full runs and literal test terms
//! - Expansion-string sets and the summary vectors built from them
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ontoloom_relations::{CancellationFlag, LlmSession, RelationPopulator, RelationSetSpec, RelationSpec};
//! # async fn run(backend: Arc<dyn ontoloom_relations::GenerationBackend>) -> ontoloom_relations::Result<()> {
//! let set = RelationSetSpec::new("causes")
//!     .with_relation(RelationSpec::new("may_be_caused_by", "What can cause it?"))?;
//! let session = Arc::new(LlmSession::new(backend, 5.0));
//! let report = RelationPopulator::new(session)
//!     .test_terms(&set, "fever\ncough", &CancellationFlag::new())
//!     .await?;
//! println!("{} triples", report.triples.len());
//! # Ok(())
//! # }
//! ```

pub mod adjudicator;
pub mod expansion;
pub mod populator;
pub mod protocol;
pub mod session;
pub mod specificity;

// Re-export core types
pub use ontoloom_core::*;

pub use adjudicator::{categorical_winner, format_score, ConfidenceAdjudicator, Verdict};
pub use expansion::{CodeSummarizer, CodeSummaryReport, ExpansionPopulator, ExpansionReport};
pub use populator::{
    EmbeddingTarget, EmittedPairs, PopulationReport, PopulatorDefinition, RelationPopulator,
    RunMode,
};
pub use protocol::PromptTemplate;
pub use session::LlmSession;
pub use specificity::{Refinement, SpecificityMemo, SpecificityRefiner};
