//! Core traits for ontoloom abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;
use crate::shape::{ResponseMap, ResponseShape};

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Backend for generating text embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate embeddings for the given texts.
    ///
    /// Returns a vector of embedding vectors, one per input text.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>>;

    /// Get the expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// One generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Ask the backend for a JSON object response where supported.
    pub json_mode: bool,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, json_mode: bool) -> Self {
        Self {
            prompt: prompt.into(),
            json_mode,
        }
    }
}

/// Raw text plus the usage and cost of one generation call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Dollar cost of the call; 0 for local backends.
    pub cost: f64,
}

/// Backend for text generation (LLM).
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate text given a request.
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// Parsed gateway reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmResponse {
    pub responses: ResponseMap,
    /// Cost of this call alone.
    pub cost: f64,
    pub raw: String,
}

/// Boundary between the relation engine and a language model.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Send a fully rendered prompt and parse the reply into `shape`.
    async fn get_response(&self, prompt: &str, shape: &ResponseShape) -> Result<LlmResponse>;

    /// Model identifier recorded with populator registrations.
    fn model_name(&self) -> &str;

    /// Dollars spent through this gateway so far.
    fn total_spend(&self) -> f64;
}

// =============================================================================
// PERSISTENCE TRAITS
// =============================================================================

/// Resolves a selection into the concepts a full run processes.
#[async_trait]
pub trait ConceptSelector: Send + Sync {
    async fn select(&self, selection: &ConceptSelection) -> Result<Vec<ConceptItem>>;
}

/// Store for populator registrations and relation triples.
#[async_trait]
pub trait RelationRepository: Send + Sync {
    /// Upsert a populator by name, returning its id.
    async fn register_populator(&self, populator: &PopulatorRecord) -> Result<Uuid>;

    /// Whether any triple exists for this subject under this populator.
    async fn has_relations(&self, subject_code_id: Uuid, populator_id: Uuid) -> Result<bool>;

    /// Persist one triple (object string, its vector, then the relation row).
    async fn save_triple(&self, triple: &NewTriple) -> Result<SavedTriple>;
}

/// Store for embedder registrations and per-string vectors.
#[async_trait]
pub trait StringVectorRepository: Send + Sync {
    /// Upsert embedder metadata by name, returning its id.
    async fn register_embedder(&self, name: &str, model: &str, dimension: usize) -> Result<Uuid>;

    /// Whether `str_id` already has a vector from this embedder.
    async fn has_vector(&self, str_id: Uuid, embedder_id: Uuid) -> Result<bool>;

    /// Store one vector in the given slot.
    async fn store_vector(
        &self,
        str_id: Uuid,
        embedder_id: Uuid,
        slot: VectorSlot,
        vector: Vector,
    ) -> Result<()>;
}

/// Store for specificity scales and cached per-string scores.
#[async_trait]
pub trait SpecificityRepository: Send + Sync {
    /// Upsert a scale by name, returning its id.
    async fn register_scale(&self, scale: &SpecificityScale) -> Result<Uuid>;

    /// Cached score of `text` on the scale, if any.
    ///
    /// More than one cached row is a data-integrity error.
    async fn lookup(&self, scale_id: Uuid, text: &str) -> Result<Option<f64>>;

    /// Cache a score for `text` on the scale.
    async fn record(&self, scale_id: Uuid, text: &str, value: f64) -> Result<()>;
}

/// Store for expansion sets and the summary vectors built from them.
#[async_trait]
pub trait ExpansionRepository: Send + Sync {
    /// Upsert an expansion populator by name, returning its id.
    async fn register_expansion_populator(&self, record: &ExpansionPopulatorRecord)
        -> Result<Uuid>;

    /// Strings named by the selection, each once, ordered by text.
    async fn select_strs(&self, selection: &StrSelection) -> Result<Vec<SourceStr>>;

    /// Expansion set of `orig_str_id` under the populator, created if missing.
    async fn ensure_set(&self, orig_str_id: Uuid, populator_id: Uuid) -> Result<Uuid>;

    /// Whether the set already holds expansion strings.
    async fn has_expansions(&self, set_id: Uuid) -> Result<bool>;

    /// Intern `text` and add it to the set; returns the string id.
    async fn add_expansion(&self, set_id: Uuid, text: &str, priority: u32) -> Result<Uuid>;

    /// Write the missing summary vectors of the populator's sets.
    ///
    /// A set is summarised only once its original and every expansion string
    /// have a mean vector from the embedder. Returns the number written.
    async fn summarize_sets(&self, populator_id: Uuid, embedder_id: Uuid) -> Result<u64>;

    /// Write the missing summary vectors of the selected codes.
    ///
    /// The summary is the mean over the code's main and other string vectors.
    async fn summarize_codes(&self, selection: &StrSelection, embedder_id: Uuid) -> Result<u64>;
}

/// Configuration of one matching run, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatcherRecord {
    pub embedder_id: Uuid,
    pub spec: MatchQuerySpec,
}

/// Store backing the matching engine.
#[async_trait]
pub trait MatchRepository: Send + Sync {
    /// Upsert the matcher configuration, returning its id.
    async fn register_matcher(&self, matcher: &MatcherRecord) -> Result<Uuid>;

    /// Execute the unmatched-items query; returns left-side object string ids.
    async fn fetch_unmatched(&self, query: &BoundQuery) -> Result<Vec<Uuid>>;

    /// Execute the ranking query for one left-side item.
    ///
    /// Execution failure is a structural-query error.
    async fn rank(&self, query: &BoundQuery) -> Result<Vec<RankedCandidate>>;

    /// Persist one match row.
    async fn save_match(&self, record: &MatchRecord) -> Result<()>;
}

// =============================================================================
// STATUS TRAITS
// =============================================================================

/// Receives human-readable progress and status lines.
pub trait StatusSink: Send + Sync {
    fn emit_status(&self, message: &str);
}

/// Status sink writing to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn emit_status(&self, message: &str) {
        tracing::info!(subsystem = "core", component = "status", "{}", message);
    }
}

/// Status sink that drops every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpStatusSink;

impl StatusSink for NoOpStatusSink {
    fn emit_status(&self, _message: &str) {}
}
