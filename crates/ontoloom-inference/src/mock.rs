//! Mock inference backends for deterministic testing.
//!
//! [`MockLlmBackend`] answers prompts from scripted rules instead of a model:
//!
//! ```rust
//! use ontoloom_inference::mock::MockLlmBackend;
//!
//! let backend = MockLlmBackend::new()
//!     .with_rule("are you sure", r#"{"ays": {"1": null}}"#)
//!     .with_fixed_response(r#"{"has_symptom": {"fever": null}}"#);
//! ```
//!
//! Replies are chosen in this order: queued replies, then the first rule
//! whose needle occurs in the prompt, then the fixed response.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use ontoloom_core::{
    EmbeddingBackend, Error, Generation, GenerationBackend, GenerationRequest, Result, Vector,
};

/// Scripted generation backend.
#[derive(Clone)]
pub struct MockLlmBackend {
    config: Arc<MockConfig>,
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Clone)]
struct MockConfig {
    model: String,
    rules: Vec<(String, String)>,
    default_response: String,
    cost_per_call: f64,
}

#[derive(Debug, Default)]
struct MockState {
    queued: VecDeque<String>,
    failures_remaining: u32,
    calls: Vec<MockCall>,
}

/// One logged generation call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub prompt: String,
    pub json_mode: bool,
    pub timestamp: std::time::Instant,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            model: "mock-llm".to_string(),
            rules: Vec::new(),
            default_response: "{}".to_string(),
            cost_per_call: 0.0,
        }
    }
}

impl MockLlmBackend {
    /// Create a new mock backend with default configuration.
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Response used when no queued reply or rule applies.
    pub fn with_fixed_response(mut self, response: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).default_response = response.into();
        self
    }

    /// Answer any prompt containing `needle` with `response`.
    ///
    /// Rules are tried in the order they were added.
    pub fn with_rule(mut self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config)
            .rules
            .push((needle.into(), response.into()));
        self
    }

    /// Queue a reply consumed by the next call, ahead of any rule.
    pub fn with_queued_response(self, response: impl Into<String>) -> Self {
        self.lock().queued.push_back(response.into());
        self
    }

    /// Fail the next `n` calls with a transient inference error.
    pub fn with_failures(self, n: u32) -> Self {
        self.lock().failures_remaining = n;
        self
    }

    /// Charge a fixed cost for every successful call.
    pub fn with_cost_per_call(mut self, cost: f64) -> Self {
        Arc::make_mut(&mut self.config).cost_per_call = cost;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).model = model.into();
        self
    }

    /// Get all logged calls for assertion.
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Number of generation calls, failed ones included.
    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Number of calls whose prompt contains `needle`.
    pub fn calls_containing(&self, needle: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.prompt.contains(needle))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A test that panicked while holding the lock has already failed.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn reply_for(&self, prompt: &str) -> String {
        self.config
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| self.config.default_response.clone())
    }
}

impl Default for MockLlmBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationBackend for MockLlmBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        let queued = {
            let mut state = self.lock();
            state.calls.push(MockCall {
                prompt: request.prompt.clone(),
                json_mode: request.json_mode,
                timestamp: std::time::Instant::now(),
            });
            if state.failures_remaining > 0 {
                state.failures_remaining -= 1;
                return Err(Error::Inference("Simulated failure for testing".to_string()));
            }
            state.queued.pop_front()
        };

        let text = queued.unwrap_or_else(|| self.reply_for(&request.prompt));
        Ok(Generation {
            text,
            prompt_tokens: 0,
            completion_tokens: 0,
            cost: self.config.cost_per_call,
        })
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Deterministic embedding backend.
#[derive(Debug, Clone)]
pub struct MockEmbeddingBackend {
    dimension: usize,
    model: String,
}

impl MockEmbeddingBackend {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model: "mock-embed".to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbeddingBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        Ok(texts
            .iter()
            .map(|t| Vector::from(MockEmbeddingGenerator::generate(t, self.dimension)))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Mock embedding generator with deterministic output.
pub struct MockEmbeddingGenerator;

impl MockEmbeddingGenerator {
    /// Generate a deterministic unit vector from text.
    pub fn generate(text: &str, dimension: usize) -> Vec<f32> {
        let mut vec = vec![0.0; dimension.max(1)];
        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize + i) % vec.len();
            vec[idx] += 0.1;
        }
        let magnitude: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            vec.iter_mut().for_each(|x| *x /= magnitude);
        }
        vec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(prompt: &str) -> GenerationRequest {
        GenerationRequest::new(prompt, true)
    }

    #[tokio::test]
    async fn test_fixed_response() {
        let backend = MockLlmBackend::new().with_fixed_response("Custom");
        let g = backend.generate(&req("anything")).await.unwrap();
        assert_eq!(g.text, "Custom");
    }

    #[tokio::test]
    async fn test_rules_first_match_wins() {
        let backend = MockLlmBackend::new()
            .with_rule("are you sure", "A")
            .with_rule("sure", "B");
        assert_eq!(backend.generate(&req("are you sure?")).await.unwrap().text, "A");
        assert_eq!(backend.generate(&req("pretty sure")).await.unwrap().text, "B");
    }

    #[tokio::test]
    async fn test_queue_precedes_rules() {
        let backend = MockLlmBackend::new()
            .with_rule("x", "rule")
            .with_queued_response("queued");
        assert_eq!(backend.generate(&req("x")).await.unwrap().text, "queued");
        assert_eq!(backend.generate(&req("x")).await.unwrap().text, "rule");
    }

    #[tokio::test]
    async fn test_failures_then_success() {
        let backend = MockLlmBackend::new().with_failures(2);
        assert!(backend.generate(&req("p")).await.is_err());
        assert!(backend.generate(&req("p")).await.is_err());
        assert!(backend.generate(&req("p")).await.is_ok());
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_cost_and_call_log() {
        let backend = MockLlmBackend::new().with_cost_per_call(0.25);
        let g = backend.generate(&req("hello world")).await.unwrap();
        assert_eq!(g.cost, 0.25);
        assert_eq!(backend.calls_containing("world"), 1);
        assert!(backend.get_calls()[0].json_mode);
    }

    #[tokio::test]
    async fn test_mock_embedding_deterministic() {
        let backend = MockEmbeddingBackend::new(16);
        let texts = vec!["fever".to_string(), "fever".to_string()];
        let v = backend.embed_texts(&texts).await.unwrap();
        assert_eq!(v[0].as_slice(), v[1].as_slice());
        assert_eq!(v[0].as_slice().len(), 16);
    }

    #[test]
    fn test_embedding_generator_normalized() {
        let embedding = MockEmbeddingGenerator::generate("test", 128);
        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 0.01);
    }
}
