//! CLI subcommand handlers.

use crate::render::{RenderMode, Renderer, drive};
use crate::{Commands, ConfigAction};
use firesearch_core::config::{FireSearchConfig, load_config, user_config_path, workspace_config_path};
use firesearch_core::providers::create_llm_provider;
use firesearch_core::{IndustryQuestions, InMemoryQuestionStore, QuestionGenerator, ResearchEngine};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Research { question, json } => run_research(&question, json, workspace).await,
        Commands::Questions {
            industry,
            description,
            no_cache,
            json,
        } => run_questions(&industry, description.as_deref(), no_cache, json, workspace).await,
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn load(workspace: &Path) -> anyhow::Result<FireSearchConfig> {
    let config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    for warning in config.validate() {
        warn!(%warning, "Configuration warning");
    }
    Ok(config)
}

/// Research `question`, rendering progress to stdout.
pub async fn run_research(question: &str, json: bool, workspace: &Path) -> anyhow::Result<()> {
    let config = load(workspace)?;
    let engine = ResearchEngine::from_config(&config)
        .map_err(|e| anyhow::anyhow!("Failed to set up providers: {}", e))?;

    let mode = if json {
        RenderMode::Json
    } else {
        RenderMode::Terminal
    };
    let mut renderer = Renderer::new(std::io::stdout().lock(), mode);
    let report = drive(engine.spawn(question), &mut renderer).await?;

    if report.is_success() {
        Ok(())
    } else {
        anyhow::bail!("research session {} did not complete", report.session_id)
    }
}

async fn run_questions(
    industry: &str,
    description: Option<&str>,
    no_cache: bool,
    json: bool,
    workspace: &Path,
) -> anyhow::Result<()> {
    let config = load(workspace)?;
    let provider = match create_llm_provider(&config.llm) {
        Ok(provider) => Some(provider),
        Err(e) => {
            warn!(error = %e, "Model service unavailable, questions will use the fallback set");
            None
        }
    };
    let generator = QuestionGenerator::new(
        provider,
        config.questions.clone(),
        config.retry.clone(),
        Arc::new(InMemoryQuestionStore::new()),
    );
    let questions = generator
        .get_or_generate(industry, description, !no_cache)
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&questions)?);
    } else {
        print!("{}", format_questions(&questions));
    }
    Ok(())
}

fn format_questions(set: &IndustryQuestions) -> String {
    let mut out = format!("Research questions for {}", set.industry);
    if set.is_fallback() {
        out.push_str(" (fallback set)");
    }
    out.push('\n');
    for (i, q) in set.questions.iter().enumerate() {
        let category = serde_json::to_value(q.category)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        out.push_str(&format!("\n{:>2}. {} [{}]\n", i + 1, q.text, category));
        out.push_str(&format!("    {}\n", q.estimated_value));
    }
    out
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load(workspace)?;
            println!("{}", render_config(&config)?);
        }
        ConfigAction::Path => print!("{}", config_paths(workspace)),
    }
    Ok(())
}

/// TOML view of `config` with inline secrets masked.
fn render_config(config: &FireSearchConfig) -> anyhow::Result<String> {
    let mut shown = config.clone();
    if shown.llm.api_key.is_some() {
        shown.llm.api_key = Some("********".to_string());
    }
    Ok(toml::to_string_pretty(&shown)?)
}

fn config_paths(workspace: &Path) -> String {
    let marker = |path: &Path| if path.exists() { "found" } else { "not found" };
    let mut out = String::new();
    match user_config_path() {
        Some(path) => out.push_str(&format!("user:      {} ({})\n", path.display(), marker(&path))),
        None => out.push_str("user:      (no home directory)\n"),
    }
    let ws = workspace_config_path(workspace);
    out.push_str(&format!("workspace: {} ({})\n", ws.display(), marker(&ws)));
    out
}
