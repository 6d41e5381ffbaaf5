//! FinRAG CLI: command-line interface for the FinRAG engine.
//!
//! Answers questions over a pre-chunked document set and inspects the
//! persisted evaluation metrics.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// FinRAG: hybrid retrieval and online evaluation for financial QA
#[derive(Parser, Debug)]
#[command(name = "finrag", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Answer a question over a chunked document set
    Ask {
        /// The question
        question: String,
        /// JSON array of chunk documents to index
        #[arg(short, long)]
        index: PathBuf,
        /// Conversation id (a new one is generated if omitted)
        #[arg(short, long)]
        conversation: Option<String>,
        /// JSON array of prior chat messages
        #[arg(long)]
        history: Option<PathBuf>,
        /// Doc id considered relevant (repeatable)
        #[arg(long = "relevant")]
        relevant: Vec<String>,
        /// Reference answer to evaluate against
        #[arg(long)]
        ground_truth: Option<String>,
    },
    /// Inspect or reset persisted metrics
    Metrics {
        #[command(subcommand)]
        action: MetricsAction,
    },
    /// Print the financial entities found in a text as JSON
    Entities {
        /// Text to analyse
        text: String,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum MetricsAction {
    /// Print the aggregate metrics report
    Show {
        /// Also list the history entries
        #[arg(long)]
        history: bool,
    },
    /// Reset the history and aggregate to empty
    Reset,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "finrag", "finrag")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "finrag.log");
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

    commands::handle_command(cli.command, &workspace).await
}
