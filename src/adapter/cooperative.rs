//! Cooperative adapter: proxies execution to a locally-running agent runtime
//! subprocess rather than calling an HTTP API directly (spec.md §4.2).
//! Grounded on the teacher's subprocess spawn/await pattern in its worktree
//! and coordinator managers: a child process is spawned with the prompt on
//! stdin, its stdout is captured whole, and its exit status maps to
//! success/failure.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{count_tokens_heuristic, Adapter, AdapterError, Response};

const CONTEXT_LIMIT_TOKENS: u64 = 100_000;
const SUBPROCESS_TIMEOUT: Duration = Duration::from_secs(600);

pub struct CooperativeAdapter {
    /// Path to the local agent runtime executable (e.g. a `claude`/`codex`
    /// style CLI already authenticated out-of-band).
    binary: String,
    extra_args: Vec<String>,
}

impl CooperativeAdapter {
    pub fn new(binary: impl Into<String>, extra_args: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            extra_args,
        }
    }
}

#[async_trait]
impl Adapter for CooperativeAdapter {
    fn name(&self) -> &str {
        "cooperative"
    }

    fn context_limit_tokens(&self) -> u64 {
        CONTEXT_LIMIT_TOKENS
    }

    fn supports_streaming(&self) -> bool {
        false
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
        debug!(binary = %self.binary, ?prompt_path, verbose, "CooperativeAdapter::aexecute: called");
        let started = std::time::Instant::now();

        let working_dir = prompt_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::path::PathBuf::from("."));

        let mut child = Command::new(&self.binary)
            .args(&self.extra_args)
            .current_dir(&working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AdapterError::Unavailable(format!("spawn {}: {}", self.binary, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| AdapterError::Network(format!("write to subprocess stdin: {e}")))?;
        }

        let output = tokio::time::timeout(SUBPROCESS_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| AdapterError::Network("subprocess timed out".to_string()))?
            .map_err(|e| AdapterError::Network(format!("subprocess wait failed: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            warn!(status = ?output.status, %stderr, "cooperative subprocess exited non-zero");
            return Ok(Response {
                success: false,
                output: stdout,
                input_tokens: count_tokens_heuristic(prompt),
                output_tokens: 0,
                duration_seconds: started.elapsed().as_secs_f64(),
                tool_calls: Vec::new(),
                error: Some(stderr),
            });
        }

        Ok(Response {
            success: true,
            output: stdout.clone(),
            input_tokens: count_tokens_heuristic(prompt),
            output_tokens: count_tokens_heuristic(&stdout),
            duration_seconds: started.elapsed().as_secs_f64(),
            tool_calls: Vec::new(),
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_prompt_through_cat() {
        let adapter = CooperativeAdapter::new("cat", vec![]);
        let tmp = tempfile::tempdir().unwrap();
        let prompt_path = tmp.path().join("PROMPT.md");
        std::fs::write(&prompt_path, "unused").unwrap();

        let response = adapter.aexecute("hello from ralph", &prompt_path, false).await.unwrap();
        assert!(response.success);
        assert_eq!(response.output, "hello from ralph");
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_as_unsuccessful_not_an_error() {
        let adapter = CooperativeAdapter::new("false", vec![]);
        let tmp = tempfile::tempdir().unwrap();
        let prompt_path = tmp.path().join("PROMPT.md");
        std::fs::write(&prompt_path, "unused").unwrap();

        let response = adapter.aexecute("hi", &prompt_path, false).await.unwrap();
        assert!(!response.success);
    }
}
