//! SubagentResult and verdict aggregation (spec.md §3 "SubagentResult", §4.5
//! "Result aggregation").

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    Uncertain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentResult {
    pub subagent_type: String,
    pub verdict: Verdict,
    pub summary: String,
    #[serde(default)]
    pub evidence_paths: Vec<String>,
    #[serde(default, flatten)]
    pub raw_json: serde_json::Map<String, serde_json::Value>,
}

impl SubagentResult {
    pub fn synthesize_failure(subagent_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            subagent_type: subagent_type.into(),
            verdict: Verdict::Fail,
            summary: reason.into(),
            evidence_paths: Vec::new(),
            raw_json: serde_json::Map::new(),
        }
    }
}

/// `pass` iff every result is `pass`; `fail` if any is `fail`; otherwise
/// `uncertain` (spec.md §4.5).
pub fn aggregate_verdicts(results: &[SubagentResult]) -> Verdict {
    if results.is_empty() {
        return Verdict::Uncertain;
    }
    if results.iter().any(|r| r.verdict == Verdict::Fail) {
        return Verdict::Fail;
    }
    if results.iter().all(|r| r.verdict == Verdict::Pass) {
        return Verdict::Pass;
    }
    Verdict::Uncertain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(verdict: Verdict) -> SubagentResult {
        SubagentResult {
            subagent_type: "validator".to_string(),
            verdict,
            summary: String::new(),
            evidence_paths: vec![],
            raw_json: serde_json::Map::new(),
        }
    }

    #[test]
    fn all_pass_is_pass() {
        let results = vec![result(Verdict::Pass), result(Verdict::Pass)];
        assert_eq!(aggregate_verdicts(&results), Verdict::Pass);
    }

    #[test]
    fn any_fail_is_fail_even_with_passes() {
        let results = vec![result(Verdict::Pass), result(Verdict::Fail)];
        assert_eq!(aggregate_verdicts(&results), Verdict::Fail);
    }

    #[test]
    fn mixed_pass_and_uncertain_is_uncertain() {
        let results = vec![result(Verdict::Pass), result(Verdict::Uncertain)];
        assert_eq!(aggregate_verdicts(&results), Verdict::Uncertain);
    }

    #[test]
    fn empty_results_is_uncertain() {
        assert_eq!(aggregate_verdicts(&[]), Verdict::Uncertain);
    }
}
