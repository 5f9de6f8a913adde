//! FireSearch CLI: run streamed web research sessions from the terminal.
//!
//! `firesearch "<question>"` researches a question and prints a cited
//! answer as it is written. Subcommands cover industry question generation
//! and configuration inspection.

mod commands;
mod render;

use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// FireSearch: turn a question into a cited, streamed answer
#[derive(Parser, Debug)]
#[command(name = "firesearch", version, about, long_about = None)]
struct Cli {
    /// Question to research
    question: Option<String>,

    /// Workspace directory (holds `.firesearch/config.toml`)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Emit progress events as newline-delimited JSON
    #[arg(long)]
    json: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Research a question
    Research {
        /// The question
        question: String,
        /// Emit progress events as newline-delimited JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate research questions for an industry
    Questions {
        /// Industry name, e.g. "fintech" or "real estate"
        industry: String,
        /// Industry context to use instead of the built-in description
        #[arg(short, long)]
        description: Option<String>,
        /// Regenerate even if a cached set exists
        #[arg(long)]
        no_cache: bool,
        /// Print the question set as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Show where configuration files are read from
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "firesearch", "firesearch")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "firesearch.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if let Some(command) = cli.command {
        return commands::handle_command(command, &workspace).await;
    }

    match cli.question {
        Some(question) => commands::run_research(&question, cli.json, &workspace).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    }
}
