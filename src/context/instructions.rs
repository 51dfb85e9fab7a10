//! Dynamic instruction templates (spec.md §4.3): a verbose block for the
//! first iterations, a condensed variant once the agent has internalized the
//! invariants. Rendered with `handlebars`, matching the teacher's
//! `PromptLoader` (template lookup chain is dropped here since user/repo
//! override directories are part of the external CLI surface; the
//! conditional-rendering mechanism is preserved).
//!
//! The rendered text depends only on `condensed`, never on the raw iteration
//! number: spec.md §4.3's prefix-stable-caching rule requires this section to
//! be byte-identical across consecutive iterations within the same band.

use handlebars::Handlebars;
use serde::Serialize;

const INSTRUCTIONS_TEMPLATE: &str = r#"<!-- SECTION: INSTRUCTIONS -->
{{#if condensed}}
Reminder of standing invariants: edit the prompt file in place; signal
completion with `TASK_COMPLETE` or `LOOP_COMPLETE`; never fabricate
validation evidence; prefer small reversible edits.
{{else}}
You are operating inside an iterative agent loop. Follow these rules:

1. Edit the prompt file in place to record progress; use GitHub-flavored
   checkboxes (`- [ ]` / `- [x]`) for discrete tasks.
2. When the overall goal is complete, emit the literal token `TASK_COMPLETE`
   on its own line, or the token `LOOP_COMPLETE` anywhere in your response.
3. Never fabricate validation evidence; write real artifacts under the
   validation-evidence directory only when you have actually verified them.
4. Prefer small, reversible edits. A checkpoint is taken periodically; if a
   later iteration causes a rollback, your partial progress may be reverted.
5. Use the scratchpad for cross-iteration notes that do not belong in the
   prompt file itself.
6. If you are blocked, mark the current task `blocked` rather than silently
   stalling, and explain why in the prompt file.
7. Tool calls, when supported by the active adapter, should be precise and
   idempotent; avoid destructive operations without clear justification.
{{/if}}"#;

#[derive(Debug, Clone, Serialize)]
struct InstructionContext {
    condensed: bool,
}

/// Default iteration at which the instruction block condenses (spec.md §4.3:
/// "Iterations 1-5 receive the full instruction block... Iterations 6+
/// receive a condensed variant").
pub const DEFAULT_CONDENSE_AT: u32 = 6;

/// Render the instruction block for the given iteration. Falls back to a
/// minimal literal block if the template fails to render, which should only
/// happen if the embedded template itself is malformed.
pub fn instruction_block(iteration: u32, condense_at: u32) -> String {
    let context = InstructionContext {
        condensed: iteration >= condense_at,
    };

    Handlebars::new()
        .render_template(INSTRUCTIONS_TEMPLATE, &context)
        .unwrap_or_else(|_| "<!-- SECTION: INSTRUCTIONS -->\n(instruction template failed to render)".to_string())
}
