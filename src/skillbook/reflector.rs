//! Reflector protocol: turns one execution trace into skill deltas via a
//! configured reflection LLM (spec.md §4.4 "Reflector protocol"). Grounded on
//! the teacher's narrow single-purpose LLM calls (a strict prompt, a
//! schema-validated parse of the reply, no retries beyond the adapter's own).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::adapter::Adapter;

use super::SkillbookError;

const MAX_EVIDENCE_CHARS: usize = 4000;

pub struct ReflectionRequest {
    pub goal: String,
    pub success: bool,
    pub evidence: String,
    pub existing_skill_titles: Vec<String>,
}

impl ReflectionRequest {
    pub fn new(goal: impl Into<String>, success: bool, evidence: &str, existing_skill_titles: Vec<String>) -> Self {
        let evidence = if evidence.len() > MAX_EVIDENCE_CHARS {
            evidence[..MAX_EVIDENCE_CHARS].to_string()
        } else {
            evidence.to_string()
        };
        Self {
            goal: goal.into(),
            success,
            evidence,
            existing_skill_titles,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSkillProposal {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatedSkillProposal {
    pub id: String,
    pub body: String,
}

/// The reflector's structured JSON reply (spec.md §4.4): the LLM "MUST return
/// a JSON object `{new_skills, updated_skills, discard_skills}`".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReflectorOutcome {
    #[serde(default)]
    pub new_skills: Vec<NewSkillProposal>,
    #[serde(default)]
    pub updated_skills: Vec<UpdatedSkillProposal>,
    #[serde(default)]
    pub discard_skills: Vec<String>,
}

#[async_trait]
pub trait Reflector: Send + Sync {
    async fn reflect(&self, request: ReflectionRequest) -> Result<ReflectorOutcome, SkillbookError>;
}

/// Drives the configured reflection LLM through an `Adapter` and parses its
/// reply strictly against the skill-update schema.
pub struct AdapterReflector {
    adapter: Arc<dyn Adapter>,
}

impl AdapterReflector {
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self { adapter }
    }

    fn build_prompt(request: &ReflectionRequest) -> String {
        format!(
            "You are a reflection agent. Given a completed task attempt, decide what \
             reusable skills should be recorded. Respond with ONLY a JSON object of the \
             form {{\"new_skills\":[{{\"title\":str,\"body\":str,\"tags\":[str]}}],\
             \"updated_skills\":[{{\"id\":str,\"body\":str}}],\"discard_skills\":[str]}}.\n\n\
             Goal: {}\nOutcome: {}\nEvidence:\n{}\nExisting skills: {}\n",
            request.goal,
            if request.success { "success" } else { "failure" },
            request.evidence,
            request.existing_skill_titles.join(", "),
        )
    }
}

#[async_trait]
impl Reflector for AdapterReflector {
    async fn reflect(&self, request: ReflectionRequest) -> Result<ReflectorOutcome, SkillbookError> {
        debug!(goal = %request.goal, "AdapterReflector::reflect: called");
        let prompt = Self::build_prompt(&request);
        let scratch_path = std::path::Path::new(".");

        let response = self
            .adapter
            .aexecute(&prompt, scratch_path, false)
            .await
            .map_err(|e| SkillbookError::Schema(format!("reflector adapter call failed: {e}")))?;

        if !response.success {
            return Err(SkillbookError::Schema(
                response.error.unwrap_or_else(|| "reflector adapter reported failure".to_string()),
            ));
        }

        serde_json::from_str::<ReflectorOutcome>(response.output.trim()).map_err(|e| {
            warn!(error = %e, "reflector reply failed schema validation");
            SkillbookError::Schema(e.to_string())
        })
    }
}

/// Deterministic reflector for tests: always proposes a fixed set of deltas.
pub struct MockReflector {
    pub outcome: ReflectorOutcome,
}

impl MockReflector {
    pub fn new(outcome: ReflectorOutcome) -> Self {
        Self { outcome }
    }
}

#[async_trait]
impl Reflector for MockReflector {
    async fn reflect(&self, _request: ReflectionRequest) -> Result<ReflectorOutcome, SkillbookError> {
        Ok(self.outcome.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evidence_is_capped_at_4000_chars() {
        let huge = "x".repeat(10_000);
        let request = ReflectionRequest::new("goal", true, &huge, vec![]);
        assert_eq!(request.evidence.len(), MAX_EVIDENCE_CHARS);
    }

    #[test]
    fn malformed_json_is_a_schema_error() {
        let result = serde_json::from_str::<ReflectorOutcome>("not json");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn mock_reflector_returns_configured_outcome() {
        let outcome = ReflectorOutcome {
            new_skills: vec![NewSkillProposal {
                title: "t".to_string(),
                body: "b".to_string(),
                tags: vec![],
            }],
            updated_skills: vec![],
            discard_skills: vec![],
        };
        let reflector = MockReflector::new(outcome);
        let request = ReflectionRequest::new("goal", true, "evidence", vec![]);
        let result = reflector.reflect(request).await.unwrap();
        assert_eq!(result.new_skills.len(), 1);
    }
}
