//! Minimal adapter: a ~8,000-token-window backend with no tool-use support,
//! for constrained or low-cost models (spec.md §4.2).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{backoff_with_jitter, count_tokens_heuristic, Adapter, AdapterError, Response};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;
const CONTEXT_LIMIT_TOKENS: u64 = 8_000;

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

pub struct MinimalAdapter {
    model: String,
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl MinimalAdapter {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("reqwest client"),
        }
    }
}

#[async_trait]
impl Adapter for MinimalAdapter {
    fn name(&self) -> &str {
        "minimal"
    }

    fn context_limit_tokens(&self) -> u64 {
        CONTEXT_LIMIT_TOKENS
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    fn supports_tool_calls(&self) -> bool {
        false
    }

    fn count_tokens(&self, text: &str) -> u64 {
        count_tokens_heuristic(text)
    }

    /// Unlike the richer adapters, `MinimalAdapter` sends the raw prompt with
    /// no system role and ignores tool-use entirely; callers must not ask it
    /// to execute tool calls.
    async fn aexecute(
        &self,
        prompt: &str,
        prompt_path: &std::path::Path,
        verbose: bool,
    ) -> Result<Response, AdapterError> {
        debug!(%self.model, ?prompt_path, verbose, "MinimalAdapter::aexecute: called");
        let started = std::time::Instant::now();
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": 2048,
        });
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut last_error = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = backoff_with_jitter(INITIAL_BACKOFF_MS, attempt);
                warn!(attempt, backoff_ms = backoff.as_millis() as u64, "aexecute: retrying after transient error");
                tokio::time::sleep(backoff).await;
            }

            let response = match self.http.post(&url).bearer_auth(&self.api_key).json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(AdapterError::Network(e.to_string()));
                    continue;
                }
            };

            let status = response.status().as_u16();

            if is_retryable_status(status) && attempt < MAX_RETRIES {
                let text = response.text().await.unwrap_or_default();
                last_error = Some(AdapterError::Api { status, message: text });
                continue;
            }

            if !response.status().is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(AdapterError::Api { status, message: text });
            }

            let api_response: MinimalChatResponse = response
                .json()
                .await
                .map_err(|e| AdapterError::InvalidResponse(e.to_string()))?;

            let text = api_response
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .unwrap_or_default();

            return Ok(Response {
                success: true,
                output: text,
                input_tokens: count_tokens_heuristic(prompt),
                output_tokens: 0,
                duration_seconds: started.elapsed().as_secs_f64(),
                tool_calls: Vec::new(),
                error: None,
            });
        }

        Err(last_error.unwrap_or_else(|| AdapterError::InvalidResponse("max retries exceeded".to_string())))
    }
}

#[derive(Debug, Deserialize)]
struct MinimalChatResponse {
    choices: Vec<MinimalChoice>,
}

#[derive(Debug, Deserialize)]
struct MinimalChoice {
    message: MinimalMessage,
}

#[derive(Debug, Deserialize)]
struct MinimalMessage {
    content: String,
}
