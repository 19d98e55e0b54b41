//! # ontoloom-inference
//!
//! LLM and embedding backends for ontoloom.
//!
//! This crate provides:
//! - OpenAI-compatible backend (chat completions with JSON mode, embeddings,
//!   token-usage cost accounting)
//! - Ollama backend (`/api/chat`, `/api/embed`)
//! - Scripted mock backends for tests and dry runs
//! - A closed backend enum selected from YAML or environment configuration
//! - An embedder registry handing out scoped handles
//!
//! # Example
//!
//! ```rust,no_run
//! use ontoloom_inference::config::LlmConfig;
//!
//! let config = LlmConfig::from_env().unwrap();
//! let backend = config.backend.build_generator().unwrap();
//! ```

pub mod config;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod registry;

// Re-export core types
pub use ontoloom_core::*;

pub use config::{BackendConfig, EmbedderConfig, LlmConfig, MockBackendConfig};
pub use mock::{MockEmbeddingBackend, MockLlmBackend};
pub use ollama::{OllamaBackend, OllamaConfig};
pub use openai::{OpenAIBackend, OpenAIConfig};
pub use registry::{EmbedderHandle, EmbedderRegistry};
