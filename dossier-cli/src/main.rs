//! Dossier CLI: deep research briefs from the terminal.

mod commands;
mod render;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Dossier: plan, search, read and summarize a topic into a cited brief
#[derive(Parser, Debug)]
#[command(name = "dossier", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (its `.dossier/config.toml` is loaded)
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Research a topic and produce a brief
    Research(ResearchArgs),
    /// Inspect saved briefs
    Briefs {
        #[command(subcommand)]
        action: BriefsAction,
    },
    /// Manage the content cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Show configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug)]
struct ResearchArgs {
    /// Free-text topic to research
    topic: String,

    /// Maximum number of sources kept in the brief
    #[arg(short = 'n', long)]
    max_sources: Option<usize>,

    /// Only use results from this window: 24h, 7d, 30d, 1y
    #[arg(long)]
    since: Option<String>,

    /// Generation model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Search backend: duckduckgo, serpapi, google, mock
    #[arg(long)]
    search: Option<String>,

    /// Render pages with a headless browser (needs the `browser` feature)
    #[arg(long)]
    js: bool,

    /// Ignore cached page content
    #[arg(long)]
    refresh: bool,

    /// Output format: markdown or json
    #[arg(short, long)]
    format: Option<String>,

    /// Write the brief to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Do not save the brief to the brief store
    #[arg(long)]
    no_save: bool,
}

#[derive(clap::Subcommand, Debug)]
enum BriefsAction {
    /// List saved briefs, newest first
    List,
    /// Print a saved brief
    Show {
        /// Brief id or a unique prefix of it
        id: String,
        /// Output format: markdown or json
        #[arg(short, long)]
        format: Option<String>,
    },
}

#[derive(clap::Subcommand, Debug)]
enum CacheAction {
    /// Delete cached pages older than the given age
    Prune {
        /// Age in hours (defaults to fetch.freshness_hours)
        #[arg(long)]
        older_than_hours: Option<u64>,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Print the merged configuration as TOML
    Show,
    /// Print the configuration search paths and data locations
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr; RUST_LOG wins over -v.
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)));

    // JSON file layer for structured logging
    let log_dir = dossier_core::config::data_dir().join("logs");
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "dossier.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("dossier_core=debug,dossier=debug,info"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let ctx = commands::Context {
        workspace,
        config_path: cli.config,
        quiet: cli.quiet,
    };
    commands::handle_command(cli.command, &ctx).await
}
