//! # Index Bot CLI (`ibot`)
//!
//! ## Usage
//!
//! ```bash
//! ibot --config ./config/ibot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ibot serve` | Run the HTTP protocol adapter until SIGINT/SIGTERM |
//! | `ibot query "<text>"` | Answer one question and print the result |
//! | `ibot ingest <root>` | Add every matching file under `root`, then persist |
//! | `ibot settings` | Print the bot settings as JSON |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use index_bot::backend::BackendRegistry;
use index_bot::config::{load_config, Config};
use index_bot::handler::ConversationHandler;
use index_bot::ingest::{default_include_globs, scan_documents, ScanOptions};
use index_bot::models::{AddDocumentsRequest, QueryRequest, ResponseEvent};
use index_bot::server::run_server;

/// Index Bot: answer questions from a persisted document index.
///
/// All commands accept `--config`. See `config/ibot.example.toml`.
#[derive(Parser)]
#[command(name = "ibot", version, about = "Answer questions from a persisted document index")]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/ibot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the bot protocol over HTTP.
    ///
    /// The index is persisted to `index.persist_path` on shutdown.
    Serve,

    /// Answer a single question and print the answer.
    Query {
        /// The question text.
        text: String,
    },

    /// Ingest text files from a directory and persist the index.
    ///
    /// Each file becomes one document whose id is its path relative to
    /// `root`. `.git`, `target` and `node_modules` are always skipped.
    Ingest {
        /// Directory to scan.
        root: PathBuf,

        /// Glob of files to include. Repeatable. Defaults to `**/*.md` and `**/*.txt`.
        #[arg(long = "include")]
        include: Vec<String>,

        /// Glob of files to exclude. Repeatable.
        #[arg(long = "exclude")]
        exclude: Vec<String>,

        /// Follow symbolic links while scanning.
        #[arg(long)]
        follow_symlinks: bool,
    },

    /// Print the bot settings as JSON.
    Settings,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Query { text } => query(&config, text).await,
        Commands::Ingest {
            root,
            include,
            exclude,
            follow_symlinks,
        } => {
            let mut opts = ScanOptions::new(root);
            if !include.is_empty() {
                opts.include_globs = include;
            }
            opts.exclude_globs = exclude;
            opts.follow_symlinks = follow_symlinks;
            ingest(&config, &opts).await
        }
        Commands::Settings => {
            println!("{}", serde_json::to_string_pretty(&config.settings)?);
            Ok(())
        }
    }
}

fn handler(config: &Config) -> anyhow::Result<ConversationHandler> {
    ConversationHandler::initialize(config, BackendRegistry::with_builtins())
        .context("Failed to initialize the bot")
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let bot = Arc::new(handler(&config)?);
    run_server(&config.server.bind, bot).await
}

async fn query(config: &Config, text: String) -> anyhow::Result<()> {
    let bot = handler(config)?;
    let events: Vec<ResponseEvent> = bot.handle_query(QueryRequest::from_text(text)).collect().await;
    for event in events {
        match event {
            ResponseEvent::Text { text } => println!("{text}"),
            ResponseEvent::Error { text, .. } => bail!("Query failed: {text}"),
        }
    }
    Ok(())
}

async fn ingest(config: &Config, opts: &ScanOptions) -> anyhow::Result<()> {
    let bot = handler(config)?;
    let documents = scan_documents(opts)?;
    if documents.is_empty() {
        let globs = if opts.include_globs == default_include_globs() {
            "default globs".to_string()
        } else {
            opts.include_globs.join(", ")
        };
        println!("No files matched under {} ({globs})", opts.root.display());
        return Ok(());
    }

    let count = documents.len();
    bot.add_documents(AddDocumentsRequest { documents }).await?;
    let nodes = bot.node_count().await;
    bot.shutdown().await?;

    println!(
        "Ingested {count} documents ({nodes} nodes in index), saved to {}",
        config.index.persist_path.display()
    );
    Ok(())
}
