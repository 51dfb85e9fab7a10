//! Jaccard-similarity deduplication and pruning-score arithmetic (spec.md
//! §4.4 "Deduplication", "Pruning").

use std::collections::HashSet;

use chrono::Utc;

use super::skill::Skill;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "to", "of", "in", "on", "for", "with", "is", "are", "be",
    "this", "that", "it", "as", "at", "by", "from",
];

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !STOP_WORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

/// Word-set Jaccard similarity over lower-cased, stop-word-filtered tokens.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a = word_set(a);
    let set_b = word_set(b);
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Returns the id of the most similar existing skill and its similarity, if
/// it meets or exceeds `threshold`.
pub fn find_duplicate<'a>(
    existing: &'a [Skill],
    candidate_title: &str,
    candidate_body: &str,
    threshold: f64,
) -> Option<(&'a Skill, f64)> {
    let candidate_text = format!("{candidate_title} {candidate_body}");
    existing
        .iter()
        .map(|s| (s, jaccard_similarity(&candidate_text, &format!("{} {}", s.title, s.body))))
        .filter(|(_, sim)| *sim >= threshold)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
}

const ALPHA_SUCCESS: f64 = 0.5;
const BETA_RECENCY: f64 = 0.3;
const GAMMA_USAGE: f64 = 0.2;

/// `score = alpha * success_correlation + beta * recency + gamma * usage_count`
/// (spec.md §4.4, coefficients fixed at 0.5/0.3/0.2). Recency and usage are
/// normalized to `[0, 1]` so the weighted sum stays comparable across skills:
/// recency decays with age in days, usage saturates at 50 uses.
pub fn pruning_score(skill: &Skill) -> f64 {
    let age_days = (Utc::now() - skill.last_used_at).num_seconds().max(0) as f64 / 86_400.0;
    let recency = 1.0 / (1.0 + age_days);
    let usage = (skill.usage_count as f64 / 50.0).min(1.0);

    ALPHA_SUCCESS * skill.success_correlation + BETA_RECENCY * recency + GAMMA_USAGE * usage
}
