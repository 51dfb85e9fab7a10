//! Adapter Abstraction - a uniform interface over several LLM execution
//! backends with differing capabilities (spec.md §4.2).
//!
//! Grounded on the teacher's `llm::LlmClient` trait and `create_client_from_resolved`
//! registry.

mod anthropic;
mod cooperative;
mod minimal;
mod openai;
mod tokenizer;

pub use anthropic::AnthropicAdapter;
pub use cooperative::CooperativeAdapter;
pub use minimal::MinimalAdapter;
pub use openai::OpenAIAdapter;
pub use tokenizer::count_tokens_heuristic;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors an adapter can surface. A thrown `Network`/`Api`/`RateLimited` error
/// signals a transport failure (retryable per spec.md §7); `InvalidResponse`
/// signals the model itself misbehaved.
#[derive(Debug, Error, Clone)]
pub enum AdapterError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("adapter '{0}' permanently unavailable")]
    Unavailable(String),
}

impl AdapterError {
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited { .. } | Self::Api { .. })
    }
}

/// A tool call the model requested during a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// The adapter's response to a single `aexecute` call (spec.md §4.2).
///
/// `success = false` means the adapter completed but the model reported an
/// error in-band; a thrown `AdapterError` signals a transport failure instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    pub output: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_seconds: f64,
    pub tool_calls: Vec<ToolCall>,
    pub error: Option<String>,
}

impl Response {
    pub fn synthetic_success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            input_tokens: 0,
            output_tokens: 0,
            duration_seconds: 0.0,
            tool_calls: Vec::new(),
            error: None,
        }
    }
}

/// Exponential backoff with up to 20% random jitter, shared by every
/// adapter's retry loop so concurrent adapter instances hitting the same
/// rate limit don't all retry in lockstep.
pub(crate) fn backoff_with_jitter(initial_ms: u64, attempt: u32) -> Duration {
    let base = initial_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let jitter_fraction: f64 = rand::random::<f64>() * 0.2;
    Duration::from_millis((base as f64 * (1.0 + jitter_fraction)).round() as u64)
}

/// Uniform contract over LLM execution backends (spec.md §4.2).
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;
    fn context_limit_tokens(&self) -> u64;
    fn supports_streaming(&self) -> bool;
    fn supports_tool_calls(&self) -> bool;

    /// Execute a completion request against this backend.
    async fn aexecute(
        &self,
        prompt: &str,
        prompt_path: &std::path::Path,
        verbose: bool,
    ) -> Result<Response, AdapterError>;

    /// Count tokens using the backend's own tokenizer when available;
    /// otherwise the caller falls back to `count_tokens_heuristic`.
    fn count_tokens(&self, text: &str) -> u64 {
        count_tokens_heuristic(text)
    }

    /// Default prompt-enrichment hook (spec.md §4.2): a templated header
    /// (runtime context, instructions, skill block) followed by the raw
    /// prompt. Adapters may override to respect their own instruction format
    /// but must preserve semantic content.
    fn enhance_prompt(&self, prompt: &str, iteration: u32, skillbook_excerpt: &str) -> String {
        format!(
            "<!-- iteration {iteration} -->\n{skillbook_excerpt}\n{prompt}",
        )
    }
}

/// Registry of available adapters, selected by name, with a fallback order
/// consulted only on transport failure (spec.md §4.2 "Selection").
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Adapter>, AdapterError> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| AdapterError::Unavailable(name.to_string()))
    }

    /// Execute against the primary adapter, falling back to the given names in
    /// order only when the primary call fails with a transport error.
    pub async fn execute_with_fallback(
        &self,
        primary: &str,
        fallback: &[String],
        prompt: &str,
        prompt_path: &std::path::Path,
        verbose: bool,
    ) -> Result<(String, Response), AdapterError> {
        debug!(primary, ?fallback, "AdapterRegistry::execute_with_fallback: called");
        let mut names = vec![primary.to_string()];
        names.extend(fallback.iter().cloned());

        let mut last_err = None;
        for name in &names {
            let adapter = self.get(name)?;
            match adapter.aexecute(prompt, prompt_path, verbose).await {
                Ok(response) => return Ok((name.clone(), response)),
                Err(e) if e.is_transport() => {
                    warn!(adapter = %name, error = %e, "adapter transport failure, trying fallback");
                    last_err = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| AdapterError::Unavailable(primary.to_string())))
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Mock adapter for unit tests, modeled on the teacher's `MockLlmClient`.
    pub struct MockAdapter {
        name: String,
        responses: Mutex<Vec<Result<Response, AdapterError>>>,
        call_count: AtomicUsize,
        context_limit: u64,
    }

    impl MockAdapter {
        pub fn new(name: &str, responses: Vec<Result<Response, AdapterError>>) -> Self {
            Self {
                name: name.to_string(),
                responses: Mutex::new(responses),
                call_count: AtomicUsize::new(0),
                context_limit: 200_000,
            }
        }

        pub fn with_context_limit(mut self, limit: u64) -> Self {
            self.context_limit = limit;
            self
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Adapter for MockAdapter {
        fn name(&self) -> &str {
            &self.name
        }

        fn context_limit_tokens(&self) -> u64 {
            self.context_limit
        }

        fn supports_streaming(&self) -> bool {
            false
        }

        fn supports_tool_calls(&self) -> bool {
            false
        }

        async fn aexecute(
            &self,
            _prompt: &str,
            _prompt_path: &std::path::Path,
            _verbose: bool,
        ) -> Result<Response, AdapterError> {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if idx >= responses.len() {
                return Err(AdapterError::InvalidResponse("no more mock responses".into()));
            }
            responses[idx].clone()
        }
    }

    #[tokio::test]
    async fn registry_falls_back_on_transport_error() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(MockAdapter::new(
            "primary",
            vec![Err(AdapterError::Network("boom".into()))],
        )));
        registry.register(Arc::new(MockAdapter::new(
            "secondary",
            vec![Ok(Response::synthetic_success("ok"))],
        )));

        let (used, response) = registry
            .execute_with_fallback("primary", &["secondary".to_string()], "hi", std::path::Path::new("p"), false)
            .await
            .unwrap();

        assert_eq!(used, "secondary");
        assert!(response.success);
    }

    #[tokio::test]
    async fn registry_does_not_fall_back_on_semantic_failure() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(MockAdapter::new(
            "primary",
            vec![Err(AdapterError::InvalidResponse("bad json".into()))],
        )));
        registry.register(Arc::new(MockAdapter::new(
            "secondary",
            vec![Ok(Response::synthetic_success("ok"))],
        )));

        let result = registry
            .execute_with_fallback("primary", &["secondary".to_string()], "hi", std::path::Path::new("p"), false)
            .await;

        assert!(result.is_err());
    }

    #[test]
    fn unknown_adapter_name_fails() {
        let registry = AdapterRegistry::new();
        assert!(registry.get("nonexistent").is_err());
    }
}
