//! SubagentProfile templates and the keyword-based selection heuristic
//! (spec.md §4.5 "Subagent selection heuristic"). Grounded on the teacher's
//! `prompts::FocusArea` closed-enum-plus-keyword-dispatch pattern.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubagentProfileKind {
    Analyst,
    Validator,
    Researcher,
    Implementer,
}

impl fmt::Display for SubagentProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Analyst => "analyst",
            Self::Validator => "validator",
            Self::Researcher => "researcher",
            Self::Implementer => "implementer",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct SubagentProfile {
    pub name: String,
    pub description: String,
    pub required_tools: Vec<String>,
    pub required_mcps: Vec<String>,
    pub optional_mcps: Vec<String>,
    pub prompt_template: String,
}

impl SubagentProfile {
    pub fn for_kind(kind: SubagentProfileKind) -> Self {
        match kind {
            SubagentProfileKind::Analyst => Self {
                name: "analyst".to_string(),
                description: "Investigates root causes and explains failures.".to_string(),
                required_tools: vec!["read_file".to_string(), "search".to_string()],
                required_mcps: vec![],
                optional_mcps: vec!["logs".to_string()],
                prompt_template: ANALYST_TEMPLATE.to_string(),
            },
            SubagentProfileKind::Validator => Self {
                name: "validator".to_string(),
                description: "Checks that a claimed change actually works.".to_string(),
                required_tools: vec!["run_tests".to_string(), "read_file".to_string()],
                required_mcps: vec![],
                optional_mcps: vec![],
                prompt_template: VALIDATOR_TEMPLATE.to_string(),
            },
            SubagentProfileKind::Researcher => Self {
                name: "researcher".to_string(),
                description: "Finds relevant prior art and documentation.".to_string(),
                required_tools: vec!["search".to_string()],
                required_mcps: vec![],
                optional_mcps: vec!["web_search".to_string()],
                prompt_template: RESEARCHER_TEMPLATE.to_string(),
            },
            SubagentProfileKind::Implementer => Self {
                name: "implementer".to_string(),
                description: "Makes the requested change directly.".to_string(),
                required_tools: vec!["read_file".to_string(), "edit_file".to_string()],
                required_mcps: vec![],
                optional_mcps: vec![],
                prompt_template: IMPLEMENTER_TEMPLATE.to_string(),
            },
        }
    }

    /// Substitute the task description, criteria, filtered skills, filtered
    /// tool definitions, and coordination paths into `prompt_template`
    /// (spec.md §4.5 "Prompt generation").
    pub fn render(&self, task_description: &str, criteria: &[String], skills: &[String], coord_dir: &std::path::Path) -> String {
        self.prompt_template
            .replace("{{task}}", task_description)
            .replace("{{criteria}}", &criteria.join("\n- "))
            .replace("{{skills}}", &skills.join("\n- "))
            .replace("{{coord_dir}}", &coord_dir.display().to_string())
    }
}

const ANALYST_TEMPLATE: &str = "You are the analyst subagent. Investigate: {{task}}\nCriteria:\n- {{criteria}}\nRelevant skills:\n- {{skills}}\nWrite your verdict to {{coord_dir}}/results/analyst.json";
const VALIDATOR_TEMPLATE: &str = "You are the validator subagent. Verify: {{task}}\nCriteria:\n- {{criteria}}\nRelevant skills:\n- {{skills}}\nWrite your verdict to {{coord_dir}}/results/validator.json";
const RESEARCHER_TEMPLATE: &str = "You are the researcher subagent. Research: {{task}}\nCriteria:\n- {{criteria}}\nRelevant skills:\n- {{skills}}\nWrite your verdict to {{coord_dir}}/results/researcher.json";
const IMPLEMENTER_TEMPLATE: &str = "You are the implementer subagent. Implement: {{task}}\nCriteria:\n- {{criteria}}\nRelevant skills:\n- {{skills}}\nWrite your verdict to {{coord_dir}}/results/implementer.json";

const ANALYST_KEYWORDS: &[&str] = &["debug", "analyze", "investigate", "root cause"];
const VALIDATOR_KEYWORDS: &[&str] = &["test", "validate", "verify", "check"];
const RESEARCHER_KEYWORDS: &[&str] = &["research", "find", "search", "look up"];

/// Keyword-based, case-insensitive, priority-ordered selection (spec.md
/// §4.5): analyst keywords checked first, then validator, then researcher,
/// falling back to implementer.
pub fn select_profile(prompt_text: &str) -> SubagentProfileKind {
    let lower = prompt_text.to_lowercase();

    if ANALYST_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return SubagentProfileKind::Analyst;
    }
    if VALIDATOR_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return SubagentProfileKind::Validator;
    }
    if RESEARCHER_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return SubagentProfileKind::Researcher;
    }
    SubagentProfileKind::Implementer
}
