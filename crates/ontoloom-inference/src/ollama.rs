//! Ollama inference backend.
//!
//! Local models cost nothing, so every [`Generation`] reports zero cost and
//! the session's spend ceiling never trips on this backend.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use ontoloom_core::{
    defaults, EmbeddingBackend, Error, Generation, GenerationBackend, GenerationRequest, Result,
    Vector,
};

/// Default Ollama API endpoint.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default embedding model.
pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";

/// Default generation model.
pub const DEFAULT_GEN_MODEL: &str = "llama3.1:8b";

/// Ollama backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub gen_model: String,
    pub embed_model: String,
    pub embed_dimension: usize,
    pub timeout_seconds: u64,
    /// Sampling temperature; zero keeps repeated confirmation prompts stable.
    pub temperature: Option<f32>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            gen_model: DEFAULT_GEN_MODEL.to_string(),
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            embed_dimension: defaults::EMBED_DIMENSION,
            timeout_seconds: defaults::LLM_TIMEOUT_SECS,
            temperature: Some(0.0),
        }
    }
}

impl OllamaConfig {
    /// Load configuration from `OLLAMA_*` environment variables.
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            base_url: std::env::var("OLLAMA_BASE").unwrap_or(base.base_url),
            gen_model: std::env::var("OLLAMA_GEN_MODEL").unwrap_or(base.gen_model),
            embed_model: std::env::var("OLLAMA_EMBED_MODEL").unwrap_or(base.embed_model),
            embed_dimension: std::env::var("OLLAMA_EMBED_DIM")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(base.embed_dimension),
            timeout_seconds: std::env::var("OLLAMA_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(base.timeout_seconds),
            temperature: std::env::var("OLLAMA_TEMPERATURE")
                .ok()
                .and_then(|s| s.parse().ok())
                .or(base.temperature),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_gen_model(mut self, model: impl Into<String>) -> Self {
        self.gen_model = model.into();
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "Ollama base_url must start with http:// or https://, got: {}",
                self.base_url
            )));
        }
        if self.gen_model.is_empty() {
            return Err(Error::Config("Ollama gen_model cannot be empty".into()));
        }
        Ok(())
    }
}

/// Ollama inference backend.
pub struct OllamaBackend {
    client: Client,
    config: OllamaConfig,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Chat API message for `/api/chat`.
#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Request payload for the Ollama `/api/chat` endpoint.
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    /// Set to `"json"` for guaranteed valid JSON output.
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ChatOptions>,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

/// Response from the Ollama `/api/chat` endpoint.
#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

impl OllamaBackend {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "ollama",
            "Initializing Ollama backend: url={}, embed={}, gen={}",
            config.base_url, config.embed_model, config.gen_model
        );

        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(OllamaConfig::from_env())
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    async fn post_json<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let response = self
            .client
            .post(format!("{}{}", self.config.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Request to {} failed: {}", path, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Inference(format!("Ollama returned {}: {}", status, text.trim())));
        }

        response
            .json()
            .await
            .map_err(|e| Error::MalformedResponse(format!("Unexpected {} reply: {}", path, e)))
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    #[instrument(skip(self, texts), fields(subsystem = "inference", component = "ollama", op = "embed_texts", model = %self.config.embed_model, input_count = texts.len()))]
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let request = EmbeddingRequest {
            model: self.config.embed_model.clone(),
            input: texts.to_vec(),
        };

        let result: EmbeddingResponse = self.post_json("/api/embed", &request).await?;

        if result.embeddings.len() != texts.len() {
            return Err(Error::MalformedResponse(format!(
                "asked for {} embeddings, got {}",
                texts.len(),
                result.embeddings.len()
            )));
        }
        // vectors land in fixed-width columns
        if let Some(bad) = result
            .embeddings
            .iter()
            .find(|e| e.len() != self.config.embed_dimension)
        {
            return Err(Error::Config(format!(
                "{} returns {}-dimensional vectors, configured for {}",
                self.config.embed_model,
                bad.len(),
                self.config.embed_dimension
            )));
        }

        Ok(result.embeddings.into_iter().map(Vector::from).collect())
    }

    fn dimension(&self) -> usize {
        self.config.embed_dimension
    }

    fn model_name(&self) -> &str {
        &self.config.embed_model
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    #[instrument(skip(self, request), fields(subsystem = "inference", component = "ollama", op = "generate", model = %self.config.gen_model, prompt_len = request.prompt.len()))]
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        let start = Instant::now();

        let body = ChatRequest {
            model: self.config.gen_model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            stream: false,
            format: request.json_mode.then(|| serde_json::json!("json")),
            options: self
                .config
                .temperature
                .map(|temperature| ChatOptions { temperature }),
        };

        let result: ChatResponse = self.post_json("/api/chat", &body).await?;

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            response_len = result.message.content.len(),
            duration_ms = elapsed,
            "Generation complete"
        );
        if elapsed > 30000 {
            warn!(duration_ms = elapsed, slow = true, "Slow generation operation");
        }

        Ok(Generation {
            text: result.message.content,
            prompt_tokens: result.prompt_eval_count.unwrap_or(0),
            completion_tokens: result.eval_count.unwrap_or(0),
            cost: 0.0,
        })
    }

    fn model_name(&self) -> &str {
        &self.config.gen_model
    }
}
