//! Anthropic-backed adapter: the first-tier 200,000-token-window adapter with
//! tool-use support (spec.md §4.2). Grounded on the teacher's
//! `llm::OpenAIClient`/`llm::AnthropicClient` request/retry shape.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{backoff_with_jitter, Adapter, AdapterError, Response, ToolCall};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;
const CONTEXT_LIMIT_TOKENS: u64 = 200_000;

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

pub struct AnthropicAdapter {
    model: String,
    api_key: String,
    base_url: String,
    http: reqwest::Client,
    max_tokens: u32,
}

impl AnthropicAdapter {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".to_string(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .expect("reqwest client"),
            max_tokens: 8192,
        }
    }

    /// Construct from the `ANTHROPIC_API_KEY` environment variable.
    pub fn from_env(model: impl Into<String>) -> Result<Self, AdapterError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| AdapterError::Unavailable("anthropic (no ANTHROPIC_API_KEY)".to_string()))?;
        Ok(Self::new(model, api_key))
    }

    fn build_request_body(&self, system_prompt: &str, user_prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system_prompt,
            "messages": [{"role": "user", "content": user_prompt}],
        })
    }
}

#[async_trait]
impl Adapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn context_limit_tokens(&self) -> u64 {
        CONTEXT_LIMIT_TOKENS
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn supports_tool_calls(&self) -> bool {
        true
    }

    async fn aexecute(
        &self,
        prompt: &str,
        prompt_path: &std::path::Path,
        verbose: bool,
    ) -> Result<Response, AdapterError> {
        debug!(%self.model, ?prompt_path, verbose, "AnthropicAdapter::aexecute: called");
        let started = std::time::Instant::now();
        let system_prompt = "You are Ralph, an autonomous coding agent working iteratively on a task file.";
        let body = self.build_request_body(system_prompt, prompt);
        let url = format!("{}/v1/messages", self.base_url);

        let mut last_error = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = backoff_with_jitter(INITIAL_BACKOFF_MS, attempt);
                warn!(attempt, backoff_ms = backoff.as_millis() as u64, "aexecute: retrying after transient error");
                tokio::time::sleep(backoff).await;
            }

            let response = match self
                .http
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(AdapterError::Network(e.to_string()));
                    continue;
                }
            };

            let status = response.status().as_u16();

            if status == 429 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(60);
                return Err(AdapterError::RateLimited {
                    retry_after: Duration::from_secs(retry_after),
                });
            }

            if is_retryable_status(status) && attempt < MAX_RETRIES {
                let text = response.text().await.unwrap_or_default();
                last_error = Some(AdapterError::Api { status, message: text });
                continue;
            }

            if !response.status().is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(AdapterError::Api { status, message: text });
            }

            let api_response: AnthropicResponse = response
                .json()
                .await
                .map_err(|e| AdapterError::InvalidResponse(e.to_string()))?;

            return Ok(parse_response(api_response, started.elapsed()));
        }

        Err(last_error.unwrap_or_else(|| AdapterError::InvalidResponse("max retries exceeded".to_string())))
    }
}

fn parse_response(api_response: AnthropicResponse, elapsed: Duration) -> Response {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in &api_response.content {
        match block {
            AnthropicBlock::Text { text: t } => text.push_str(t),
            AnthropicBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
        }
    }

    Response {
        success: true,
        output: text,
        input_tokens: api_response.usage.input_tokens,
        output_tokens: api_response.usage.output_tokens,
        duration_seconds: elapsed.as_secs_f64(),
        tool_calls,
        error: None,
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text { text: String },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_and_tool_use_blocks() {
        let api_response = AnthropicResponse {
            content: vec![
                AnthropicBlock::Text {
                    text: "hello ".to_string(),
                },
                AnthropicBlock::ToolUse {
                    id: "tool-1".to_string(),
                    name: "edit_file".to_string(),
                    input: serde_json::json!({"path": "a.rs"}),
                },
            ],
            usage: AnthropicUsage {
                input_tokens: 10,
                output_tokens: 20,
            },
        };

        let response = parse_response(api_response, Duration::from_millis(500));
        assert_eq!(response.output, "hello ");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "edit_file");
        assert!(response.success);
    }

    #[test]
    fn context_limit_is_200k() {
        let adapter = AnthropicAdapter::new("claude-test", "key");
        assert_eq!(adapter.context_limit_tokens(), 200_000);
    }
}
