//! OpenAI-compatible inference backend.
//!
//! Works with any OpenAI-compatible endpoint (OpenAI, Azure OpenAI, vLLM,
//! LocalAI, Ollama in compatibility mode). Generation requests ask for a
//! JSON object response when the relation set uses JSON output, and token
//! usage is converted to a dollar cost from the configured per-1000-token
//! rates so the session can enforce its spend ceiling.

mod backend;
mod error;
mod types;

pub use backend::{
    OpenAIBackend, OpenAIConfig, DEFAULT_DIMENSION, DEFAULT_EMBED_MODEL, DEFAULT_GEN_MODEL,
    DEFAULT_MAX_TOKENS, DEFAULT_OPENAI_URL,
};
pub use error::{error_from_body, ApiFailure};
pub use types::*;
