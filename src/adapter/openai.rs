//! OpenAI-backed adapter: the ~32,000-token-window adapter, modeled
//! line-for-line on the teacher's `llm::OpenAIClient` request construction,
//! retry/backoff policy and SSE handling (spec.md §4.2).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{backoff_with_jitter, count_tokens_heuristic, Adapter, AdapterError, Response, ToolCall};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;
const CONTEXT_LIMIT_TOKENS: u64 = 32_000;

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// `o1`/`o3`/`gpt-5`-family models take `max_completion_tokens` instead of
/// `max_tokens` and reject the `temperature` field entirely.
fn is_reasoning_model(model: &str) -> bool {
    model.starts_with("o1") || model.starts_with("o3") || model.starts_with("gpt-5")
}

pub struct OpenAIAdapter {
    model: String,
    api_key: String,
    base_url: String,
    http: reqwest::Client,
    max_tokens: u32,
}

impl OpenAIAdapter {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com".to_string(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .expect("reqwest client"),
            max_tokens: 4096,
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self, AdapterError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AdapterError::Unavailable("openai (no OPENAI_API_KEY)".to_string()))?;
        Ok(Self::new(model, api_key))
    }

    fn build_request_body(&self, system_prompt: &str, user_prompt: &str) -> serde_json::Value {
        let messages = convert_messages(system_prompt, user_prompt);
        let capped_tokens = self.max_tokens.min(16_384);

        if is_reasoning_model(&self.model) {
            serde_json::json!({
                "model": self.model,
                "messages": messages,
                "max_completion_tokens": capped_tokens,
            })
        } else {
            serde_json::json!({
                "model": self.model,
                "messages": messages,
                "max_tokens": capped_tokens,
                "temperature": 0.2,
            })
        }
    }
}

fn convert_messages(system_prompt: &str, user_prompt: &str) -> serde_json::Value {
    serde_json::json!([
        {"role": "system", "content": system_prompt},
        {"role": "user", "content": user_prompt},
    ])
}

#[async_trait]
impl Adapter for OpenAIAdapter {
    fn name(&self) -> &str {
        "openai"
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

    fn count_tokens(&self, text: &str) -> u64 {
        count_tokens_heuristic(text)
    }

    async fn aexecute(
        &self,
        prompt: &str,
        prompt_path: &std::path::Path,
        verbose: bool,
    ) -> Result<Response, AdapterError> {
        debug!(%self.model, ?prompt_path, verbose, "OpenAIAdapter::aexecute: called");
        let started = std::time::Instant::now();
        let system_prompt = "You are Ralph, an autonomous coding agent working iteratively on a task file.";
        let body = self.build_request_body(system_prompt, prompt);
        let url = format!("{}/v1/chat/completions", self.base_url);

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
                .bearer_auth(&self.api_key)
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
                if attempt < MAX_RETRIES {
                    warn!(retry_after, "rate limited, honoring Retry-After before next attempt");
                    tokio::time::sleep(Duration::from_secs(retry_after)).await;
                    last_error = Some(AdapterError::RateLimited {
                        retry_after: Duration::from_secs(retry_after),
                    });
                    continue;
                }
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

            let api_response: OpenAIChatResponse = response
                .json()
                .await
                .map_err(|e| AdapterError::InvalidResponse(e.to_string()))?;

            return parse_response(api_response, started.elapsed());
        }

        Err(last_error.unwrap_or_else(|| AdapterError::InvalidResponse("max retries exceeded".to_string())))
    }
}

fn parse_response(api_response: OpenAIChatResponse, elapsed: Duration) -> Result<Response, AdapterError> {
    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AdapterError::InvalidResponse("no choices in response".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter_map(|tc| {
            let input = serde_json::from_str(&tc.function.arguments).unwrap_or(serde_json::Value::Null);
            Some(ToolCall {
                id: tc.id,
                name: tc.function.name,
                input,
            })
        })
        .collect();

    Ok(Response {
        success: true,
        output: choice.message.content.unwrap_or_default(),
        input_tokens: api_response.usage.prompt_tokens,
        output_tokens: api_response.usage.completion_tokens,
        duration_seconds: elapsed.as_secs_f64(),
        tool_calls,
        error: None,
    })
}

#[derive(Debug, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChoice>,
    usage: OpenAIUsage,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCall {
    id: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}
