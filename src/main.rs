//! Ralph - CLI entry point for a single iterative-loop run.
//!
//! Grounded on the teacher's `main.rs`: `setup_logging` writing to a
//! `dirs::data_local_dir()`-rooted log directory, `eyre::Context` glue around
//! the library's own `thiserror` error types, and a short human-readable
//! summary printed at the end.

use std::sync::Arc;

use colored::Colorize;
use eyre::{Context, Result};
use tokio::sync::RwLock;
use tracing::info;

use ralph::adapter::{AdapterRegistry, AnthropicAdapter, MinimalAdapter, OpenAIAdapter};
use ralph::skillbook::{AdapterReflector, MockReflector, Reflector};
use ralph::{IterationEngine, RalphConfig, RalphOutcome};

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("ralph-orchestrator")
        .join("logs");
    std::fs::create_dir_all(&log_dir).context("failed to create log directory")?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!(dir = %log_dir.display(), "logging initialized");
    Ok(())
}

/// Register every adapter this process has credentials for. At least one
/// adapter must be available or the run cannot proceed (spec.md §4.2).
fn build_registry() -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();

    let anthropic_model = std::env::var("RALPH_ANTHROPIC_MODEL").unwrap_or_else(|_| "claude-sonnet-4-5".to_string());
    match AnthropicAdapter::from_env(anthropic_model) {
        Ok(adapter) => registry.register(Arc::new(adapter)),
        Err(e) => info!(%e, "anthropic adapter unavailable"),
    }

    let openai_model = std::env::var("RALPH_OPENAI_MODEL").unwrap_or_else(|_| "gpt-5".to_string());
    match OpenAIAdapter::from_env(openai_model) {
        Ok(adapter) => registry.register(Arc::new(adapter)),
        Err(e) => info!(%e, "openai adapter unavailable"),
    }

    if let (Ok(model), Ok(api_key), Ok(base_url)) = (
        std::env::var("RALPH_MINIMAL_MODEL"),
        std::env::var("RALPH_MINIMAL_API_KEY"),
        std::env::var("RALPH_MINIMAL_BASE_URL"),
    ) {
        registry.register(Arc::new(MinimalAdapter::new(model, api_key, base_url)));
    }

    registry
}

/// Pick a reflector backend: reuse a registered adapter under the configured
/// learning model name if one exists, otherwise fall back to a no-op mock so
/// the learning worker degrades gracefully instead of failing the whole run.
fn build_reflector(registry: &AdapterRegistry, config: &RalphConfig) -> Arc<dyn Reflector> {
    match registry.get(&config.adapter_name) {
        Ok(adapter) => Arc::new(AdapterReflector::new(adapter)),
        Err(_) => {
            info!("no adapter available for reflection; learning worker will record nothing");
            Arc::new(MockReflector::new(Default::default()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging().context("failed to set up logging")?;

    let config = RalphConfig::from_env();
    info!(
        adapter = %config.adapter_name,
        max_iterations = config.max_iterations,
        learning_enabled = config.learning.enabled,
        orchestration_enabled = config.orchestration_enabled,
        "ralph starting"
    );

    let registry = build_registry();
    let reflector = build_reflector(&registry, &config);

    let mut engine = IterationEngine::new(config, registry, reflector).context("failed to initialize the iteration engine")?;

    let result = engine.run().await;

    let skillbook_len = {
        let book: Arc<RwLock<_>> = engine.skillbook_handle();
        book.read().await.len()
    };
    let context_summary = engine.context_summary();

    print_summary(&result, skillbook_len, &context_summary);

    std::process::exit(match result.outcome {
        RalphOutcome::Completed => 0,
        RalphOutcome::ExhaustedIterations | RalphOutcome::ExhaustedTime | RalphOutcome::Cancelled => 1,
        RalphOutcome::FatalError(_) => 2,
    });
}

fn print_summary(result: &ralph::engine::RunResult, skillbook_len: usize, context_summary: &ralph::context::TimelineSummary) {
    let (label, colored_label) = match &result.outcome {
        RalphOutcome::Completed => ("completed", "completed".green().bold()),
        RalphOutcome::ExhaustedIterations => ("exhausted_iterations", "exhausted_iterations".yellow().bold()),
        RalphOutcome::ExhaustedTime => ("exhausted_time", "exhausted_time".yellow().bold()),
        RalphOutcome::Cancelled => ("cancelled", "cancelled".yellow().bold()),
        RalphOutcome::FatalError(msg) => {
            println!("{} {}", "ralph:".bold(), format!("fatal_error: {msg}").red().bold());
            ("fatal_error", "fatal_error".red().bold())
        }
    };
    let _ = label;

    println!("{}", "Ralph run summary".bold());
    println!("  outcome:            {colored_label}");
    println!("  iterations:         {} attempted, {} completed", result.metrics.iterations_attempted, result.metrics.iterations_completed);
    println!("  successes/failures: {}/{}", result.metrics.successes, result.metrics.failures);
    println!("  rollbacks:          {}", result.metrics.rollback_count);
    println!("  duration:           {:.1}s", result.metrics.duration_seconds);
    println!("  skills known:       {skillbook_len}");
    println!(
        "  peak context usage: {} tokens ({:.1}% of limit)",
        context_summary.peak_tokens, context_summary.peak_usage_percent
    );
}
