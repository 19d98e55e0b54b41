//! Backend selection and configuration.
//!
//! Backends form a closed set chosen by the `backend` key of a YAML
//! document (or the `LLM_BACKEND` environment variable):
//!
//! ```yaml
//! backend: openai
//! gen_model: gpt-4o-mini
//! prompt_cost_per_1k: 0.00015
//! completion_cost_per_1k: 0.0006
//! max_spend: 2.50
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use ontoloom_core::{defaults, EmbeddingBackend, Error, GenerationBackend, Result};

use crate::mock::{MockEmbeddingBackend, MockLlmBackend};
use crate::ollama::{OllamaBackend, OllamaConfig};
use crate::openai::{OpenAIBackend, OpenAIConfig};

/// Settings for the scripted mock backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MockBackendConfig {
    pub fixed_response: String,
    pub dimension: usize,
}

impl Default for MockBackendConfig {
    fn default() -> Self {
        Self {
            fixed_response: "{}".to_string(),
            dimension: defaults::EMBED_DIMENSION,
        }
    }
}

/// Inference backend type plus its settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum BackendConfig {
    Openai(OpenAIConfig),
    Ollama(OllamaConfig),
    Mock(MockBackendConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Openai(OpenAIConfig::default())
    }
}

impl BackendConfig {
    /// Select a backend from `LLM_BACKEND` (default `openai`).
    pub fn from_env() -> Result<Self> {
        let name = std::env::var("LLM_BACKEND").unwrap_or_else(|_| "openai".to_string());
        match name.to_lowercase().as_str() {
            "openai" => Ok(BackendConfig::Openai(OpenAIConfig::from_env())),
            "ollama" => Ok(BackendConfig::Ollama(OllamaConfig::from_env())),
            "mock" => Ok(BackendConfig::Mock(MockBackendConfig::default())),
            other => Err(Error::Config(format!("Invalid backend: {}", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackendConfig::Openai(_) => "openai",
            BackendConfig::Ollama(_) => "ollama",
            BackendConfig::Mock(_) => "mock",
        }
    }

    /// Build the generation backend.
    pub fn build_generator(&self) -> Result<Arc<dyn GenerationBackend>> {
        info!(subsystem = "inference", component = "config", backend = self.name(), "Building generation backend");
        Ok(match self {
            BackendConfig::Openai(c) => Arc::new(OpenAIBackend::new(with_env_key(c))?),
            BackendConfig::Ollama(c) => Arc::new(OllamaBackend::new(c.clone())?),
            BackendConfig::Mock(c) => {
                Arc::new(MockLlmBackend::new().with_fixed_response(c.fixed_response.clone()))
            }
        })
    }

    /// Build the embedding backend.
    pub fn build_embedder(&self) -> Result<Arc<dyn EmbeddingBackend>> {
        Ok(match self {
            BackendConfig::Openai(c) => Arc::new(OpenAIBackend::new(with_env_key(c))?),
            BackendConfig::Ollama(c) => Arc::new(OllamaBackend::new(c.clone())?),
            BackendConfig::Mock(c) => Arc::new(MockEmbeddingBackend::new(c.dimension)),
        })
    }
}

/// Fill a missing API key from `OPENAI_API_KEY` so keys stay out of YAML.
fn with_env_key(config: &OpenAIConfig) -> OpenAIConfig {
    let mut config = config.clone();
    if config.api_key.is_none() {
        config.api_key = std::env::var("OPENAI_API_KEY").ok();
    }
    config
}

fn default_max_spend() -> f64 {
    defaults::LLM_MAX_SPEND
}

/// LLM configuration: backend plus the session spend ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(flatten)]
    pub backend: BackendConfig,
    /// Session spend ceiling in dollars.
    #[serde(default = "default_max_spend")]
    pub max_spend: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            max_spend: defaults::LLM_MAX_SPEND,
        }
    }
}

impl LlmConfig {
    /// Load from environment variables (`LLM_BACKEND`, `LLM_MAX_SPEND`, and
    /// the backend's own variables).
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            backend: BackendConfig::from_env()?,
            max_spend: std::env::var("LLM_MAX_SPEND")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults::LLM_MAX_SPEND),
        })
    }

    /// Load from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.max_spend >= 0.0) {
            return Err(Error::Config(format!(
                "max_spend must be non-negative, got {}",
                self.max_spend
            )));
        }
        if let BackendConfig::Ollama(c) = &self.backend {
            c.validate()?;
        }
        Ok(())
    }
}

/// A named embedder definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    /// Registry key and stored embedder name.
    pub name: String,
    #[serde(flatten)]
    pub backend: BackendConfig,
}
