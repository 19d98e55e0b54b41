//! LLM session: the gateway the relation engine talks to.
//!
//! Wraps a [`GenerationBackend`] with a bounded retry loop, response parsing,
//! and a spend accumulator. Once the accumulated spend exceeds the session
//! ceiling every call fails with [`Error::SpendLimitExceeded`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, instrument, trace, warn};

use ontoloom_core::{
    defaults, Error, Generation, GenerationBackend, GenerationRequest, LlmGateway, LlmResponse,
    ResponseShape, Result,
};

#[derive(Debug, Default)]
struct SessionState {
    total_spend: f64,
    calls: u64,
    last_prompt: Option<String>,
    last_raw: Option<String>,
}

/// Retrying, spend-limited gateway over one generation backend.
pub struct LlmSession {
    backend: Arc<dyn GenerationBackend>,
    max_spend: f64,
    max_attempts: u32,
    retry_delay: Duration,
    state: Mutex<SessionState>,
}

impl LlmSession {
    pub fn new(backend: Arc<dyn GenerationBackend>, max_spend: f64) -> Self {
        Self {
            backend,
            max_spend,
            max_attempts: defaults::LLM_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(defaults::LLM_RETRY_DELAY_MS),
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Override the attempt bound and the fixed delay between attempts.
    pub fn with_retry(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = delay;
        self
    }

    pub fn max_spend(&self) -> f64 {
        self.max_spend
    }

    /// Number of successful generation calls.
    pub fn call_count(&self) -> u64 {
        self.lock().calls
    }

    /// Last prompt sent, for diagnostics.
    pub fn last_prompt(&self) -> Option<String> {
        self.lock().last_prompt.clone()
    }

    /// Last raw model output, for diagnostics.
    pub fn last_raw(&self) -> Option<String> {
        self.lock().last_raw.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn generate_with_retry(&self, request: &GenerationRequest) -> Result<Generation> {
        let mut attempt = 1;
        loop {
            match self.backend.generate(request).await {
                Ok(generation) => return Ok(generation),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        subsystem = "relations",
                        component = "session",
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "LLM call failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    warn!(
                        subsystem = "relations",
                        component = "session",
                        attempt,
                        error = %e,
                        "LLM call failed"
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl LlmGateway for LlmSession {
    #[instrument(skip(self, prompt, shape), fields(
        subsystem = "relations",
        component = "session",
        op = "get_response",
        prompt_len = prompt.len(),
    ))]
    async fn get_response(&self, prompt: &str, shape: &ResponseShape) -> Result<LlmResponse> {
        {
            let state = self.lock();
            if state.total_spend > self.max_spend {
                return Err(Error::SpendLimitExceeded {
                    spent: state.total_spend,
                    limit: self.max_spend,
                });
            }
        }

        let start = Instant::now();
        trace!(prompt = %prompt, "Sending prompt");
        let request = GenerationRequest::new(prompt, shape.json);
        let generation = self.generate_with_retry(&request).await?;

        let total = {
            let mut state = self.lock();
            state.total_spend += generation.cost;
            state.calls += 1;
            state.last_prompt = Some(prompt.to_string());
            state.last_raw = Some(generation.text.clone());
            state.total_spend
        };
        debug!(
            cost = generation.cost,
            spend = total,
            response_len = generation.text.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "LLM call complete"
        );
        trace!(response = %generation.text, "Raw response");

        if total > self.max_spend {
            tracing::error!(
                subsystem = "relations",
                component = "session",
                spend = total,
                max_spend = self.max_spend,
                "Exceeded max spend, stopping"
            );
            return Err(Error::SpendLimitExceeded {
                spent: total,
                limit: self.max_spend,
            });
        }

        let responses = shape.parse(&generation.text)?;
        Ok(LlmResponse {
            responses,
            cost: generation.cost,
            raw: generation.text,
        })
    }

    fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    fn total_spend(&self) -> f64 {
        self.lock().total_spend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ontoloom_core::{CaseChange, Separator, ShapeField};
    use std::collections::VecDeque;

    /// Backend replaying a script of results.
    struct Scripted {
        script: Mutex<VecDeque<Result<Generation>>>,
    }

    impl Scripted {
        fn new(items: Vec<Result<Generation>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(items.into()),
            })
        }
    }

    #[async_trait]
    impl GenerationBackend for Scripted {
        async fn generate(&self, _request: &GenerationRequest) -> Result<Generation> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Internal("script exhausted".into())))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn ok(text: &str, cost: f64) -> Result<Generation> {
        Ok(Generation {
            text: text.to_string(),
            cost,
            ..Default::default()
        })
    }

    fn ays_shape() -> ResponseShape {
        ResponseShape {
            fields: vec![ShapeField::new("ays", false, false)],
            json: true,
            separator: Separator::Tab,
            surrounder: "__resp__".into(),
            case_change: CaseChange::Lower,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures() {
        let backend = Scripted::new(vec![
            Err(Error::Inference("503".into())),
            Err(Error::Request("reset".into())),
            ok(r#"{"ays": {"1": null}}"#, 0.01),
        ]);
        let session = LlmSession::new(backend, 1.0);
        let resp = session.get_response("p", &ays_shape()).await.unwrap();
        assert_eq!(resp.responses.get("ays").unwrap()[0].text, "1");
        assert_eq!(session.call_count(), 1);
        assert_eq!(session.last_prompt().as_deref(), Some("p"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let backend = Scripted::new(vec![
            Err(Error::Inference("1".into())),
            Err(Error::Inference("2".into())),
            Err(Error::Inference("3".into())),
            ok("{}", 0.0),
        ]);
        let session = LlmSession::new(backend, 1.0);
        let err = session.get_response("p", &ays_shape()).await.unwrap_err();
        assert_eq!(err.to_string(), "Inference error: 3");
    }

    #[tokio::test]
    async fn test_config_errors_are_not_retried() {
        let backend = Scripted::new(vec![Err(Error::Config("bad key".into())), ok("{}", 0.0)]);
        let session = LlmSession::new(backend, 1.0);
        let err = session.get_response("p", &ays_shape()).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_malformed_response_is_not_retried() {
        let backend = Scripted::new(vec![ok("no json here", 0.5), ok(r#"{"ays": {"1": null}}"#, 0.5)]);
        let session = LlmSession::new(backend, 10.0);
        let err = session.get_response("p", &ays_shape()).await.unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
        // The failed parse was still paid for.
        assert_eq!(session.total_spend(), 0.5);
    }

    #[tokio::test]
    async fn test_spend_ceiling_stops_session() {
        let reply = r#"{"ays": {"1": null}}"#;
        let backend = Scripted::new(vec![ok(reply, 0.6), ok(reply, 0.6), ok(reply, 0.6)]);
        let session = LlmSession::new(backend, 1.0);

        assert!(session.get_response("p", &ays_shape()).await.is_ok());
        let err = session.get_response("p", &ays_shape()).await.unwrap_err();
        assert!(matches!(err, Error::SpendLimitExceeded { .. }));
        assert!(err.is_fatal());

        // No further calls go out once over the ceiling.
        let err = session.get_response("p", &ays_shape()).await.unwrap_err();
        assert!(matches!(err, Error::SpendLimitExceeded { .. }));
        assert_eq!(session.call_count(), 2);
    }
}
