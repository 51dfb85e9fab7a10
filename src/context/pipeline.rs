//! Deterministic prompt assembly (spec.md §4.3 "Assembly order").
//!
//! Six sections, each tagged with a stable `<!-- SECTION: ... -->` marker so
//! the LLM (and any adapter-level prefix cache) sees a structurally
//! consistent document every iteration.

use tracing::debug;

use super::budget::BudgetAllocation;
use super::instructions::instruction_block;

/// A ranked skill excerpt ready for injection, decoupled from the skillbook
/// module's own `Skill` type so the pipeline does not need to depend on
/// skillbook internals.
#[derive(Debug, Clone)]
pub struct SkillExcerpt {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Default)]
pub struct SectionTokenCounts {
    pub runtime: u64,
    pub instructions: u64,
    pub skills: u64,
    pub scratchpad: u64,
    pub history: u64,
    pub prompt: u64,
}

#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub text: String,
    pub section_tokens: SectionTokenCounts,
}

pub struct ContextPipeline;

impl ContextPipeline {
    /// Assemble the enriched prompt. `count_tokens` should be the active
    /// adapter's own counter (or the UTF-8-byte heuristic fallback).
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        runtime_header: &str,
        iteration: u32,
        condense_at: u32,
        skills: &[SkillExcerpt],
        scratchpad: Option<&str>,
        history_summary: Option<&str>,
        user_prompt: &str,
        budget: BudgetAllocation,
        count_tokens: &dyn Fn(&str) -> u64,
    ) -> AssembledPrompt {
        debug!(iteration, skills = skills.len(), "ContextPipeline::assemble: called");

        let runtime_section = runtime_header.to_string();
        let runtime_tokens = count_tokens(&runtime_section);

        let instructions_section = instruction_block(iteration, condense_at);
        let instructions_tokens = count_tokens(&instructions_section);

        let remaining_middle = budget.middle_budget.saturating_sub(instructions_tokens);
        let skills_budget = remaining_middle / 2;
        let scratchpad_budget = remaining_middle.saturating_sub(skills_budget) / 2;
        let history_budget = remaining_middle.saturating_sub(skills_budget).saturating_sub(scratchpad_budget);

        let (skills_section, skills_tokens) = render_skills(skills, skills_budget, count_tokens);
        let (scratchpad_section, scratchpad_tokens) =
            render_scratchpad(scratchpad.unwrap_or(""), scratchpad_budget, count_tokens);
        let (history_section, history_tokens) =
            render_history(history_summary.unwrap_or(""), history_budget, count_tokens);

        let (prompt_section, prompt_tokens) = render_prompt(user_prompt, budget.prompt_budget, count_tokens);

        let text = [
            runtime_section,
            instructions_section,
            skills_section,
            scratchpad_section,
            history_section,
            prompt_section,
        ]
        .join("\n");

        AssembledPrompt {
            text,
            section_tokens: SectionTokenCounts {
                runtime: runtime_tokens,
                instructions: instructions_tokens,
                skills: skills_tokens,
                scratchpad: scratchpad_tokens,
                history: history_tokens,
                prompt: prompt_tokens,
            },
        }
    }
}

/// Drop lowest-ranked skills (the tail of an already-ranked slice) until the
/// rendered block fits its budget.
fn render_skills(skills: &[SkillExcerpt], budget: u64, count_tokens: &dyn Fn(&str) -> u64) -> (String, u64) {
    let mut included = Vec::new();
    let mut used = 0u64;

    for skill in skills {
        let entry = format!("- **{}**: {}", skill.title, skill.body);
        let entry_tokens = count_tokens(&entry);
        if used + entry_tokens > budget && !included.is_empty() {
            break;
        }
        included.push(entry);
        used += entry_tokens;
    }

    let body = if included.is_empty() {
        "(no skills injected)".to_string()
    } else {
        included.join("\n")
    };
    let section = format!("<!-- SECTION: SKILLS -->\n{body}");
    let tokens = count_tokens(&section);
    (section, tokens)
}

/// Tail-truncate: keep the most recent scratchpad content.
fn render_scratchpad(scratchpad: &str, budget: u64, count_tokens: &dyn Fn(&str) -> u64) -> (String, u64) {
    let truncated = tail_truncate_to_budget(scratchpad, budget, count_tokens);
    let section = format!("<!-- SECTION: SCRATCHPAD -->\n{truncated}");
    let tokens = count_tokens(&section);
    (section, tokens)
}

/// Drop oldest: keep the most recent portion of the rolling summary.
fn render_history(history: &str, budget: u64, count_tokens: &dyn Fn(&str) -> u64) -> (String, u64) {
    let truncated = tail_truncate_to_budget(history, budget, count_tokens);
    let section = format!("<!-- SECTION: HISTORY -->\n{truncated}");
    let tokens = count_tokens(&section);
    (section, tokens)
}

/// The user prompt is never silently truncated: if it overflows its budget,
/// prepend a note and keep the last 2 000 characters verbatim (spec.md
/// §4.3).
fn render_prompt(prompt: &str, budget: u64, count_tokens: &dyn Fn(&str) -> u64) -> (String, u64) {
    let body = if count_tokens(prompt) <= budget {
        prompt.to_string()
    } else {
        let tail_start = prompt.len().saturating_sub(2000);
        let tail = &prompt[nearest_char_boundary(prompt, tail_start)..];
        format!(
            "(prompt exceeded its budget and was summarized; last 2000 characters follow verbatim)\n{tail}"
        )
    };
    let section = format!("<!-- SECTION: PROMPT -->\n{body}");
    let tokens = count_tokens(&section);
    (section, tokens)
}

fn tail_truncate_to_budget(text: &str, budget: u64, count_tokens: &dyn Fn(&str) -> u64) -> String {
    if text.is_empty() || count_tokens(text) <= budget {
        return text.to_string();
    }
    // Binary search for the largest suffix (by character boundary) fitting the budget.
    let chars: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let mut lo = 0usize;
    let mut hi = chars.len();
    while lo < hi {
        let mid = (lo + hi) / 2;
        let candidate = &text[chars[mid]..];
        if count_tokens(candidate) <= budget {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    let start_idx = chars.get(lo).copied().unwrap_or(text.len());
    text[start_idx..].to_string()
}

fn nearest_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
