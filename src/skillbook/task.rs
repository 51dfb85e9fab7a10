//! LearningTask / ExecutionTrace — message-passed records produced by the
//! engine and consumed by the learning worker (spec.md §3).

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::adapter::ToolCall;

#[derive(Debug, Clone)]
pub struct ExecutionTrace {
    pub prompt_excerpt: String,
    pub adapter_name: String,
    pub duration: Duration,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub tool_calls: Vec<ToolCall>,
    pub error: Option<String>,
}

/// Message-passed record; never persisted (spec.md §3 "LearningTask").
#[derive(Debug, Clone)]
pub struct LearningTask {
    pub task_text: String,
    pub output_excerpt: String,
    pub success_flag: bool,
    pub error_detail: Option<String>,
    pub execution_trace: ExecutionTrace,
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
}

impl LearningTask {
    pub fn rollback(iteration: u32, trace: ExecutionTrace) -> Self {
        Self {
            task_text: "rollback".to_string(),
            output_excerpt: String::new(),
            success_flag: false,
            error_detail: Some("rollback".to_string()),
            execution_trace: trace,
            iteration,
            timestamp: Utc::now(),
        }
    }
}
